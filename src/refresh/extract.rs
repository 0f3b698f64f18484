//! Declarative extraction of token pairs from refresh responses whose schema is not fixed.

// crates.io
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::{TokenPair, TokenSecret},
};

type Object = Map<String, Value>;

/// Ordered field paths probed when reading a refresh response.
///
/// Probing walks the payload and up to `max_envelope_depth` nested envelope objects, outermost
/// first. In each layer it checks the flat field names, then the same names inside each
/// container object. The first non-blank string wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenExtractor {
	/// Envelope keys unwrapped to reach the payload (`data`, `result`).
	pub envelope_fields: Vec<String>,
	/// Maximum number of envelope levels unwrapped.
	pub max_envelope_depth: usize,
	/// Field names holding the access token.
	pub access_fields: Vec<String>,
	/// Field names holding the refresh token.
	pub refresh_fields: Vec<String>,
	/// Container objects that may hold either token (`tokens`, `auth`, `jwt`).
	pub container_fields: Vec<String>,
}
impl TokenExtractor {
	/// Extracts the pair; `None` when no access token is present.
	pub fn extract(&self, payload: &Value) -> Option<TokenPair> {
		let layers = self.layers(payload);
		let access = self.probe(&layers, &self.access_fields)?;
		let refresh = self.probe(&layers, &self.refresh_fields);

		Some(TokenPair::new(access, refresh))
	}

	fn layers<'a>(&self, payload: &'a Value) -> Vec<&'a Object> {
		let mut layers = Vec::new();
		let mut current = payload.as_object();

		while let Some(object) = current {
			layers.push(object);

			if layers.len() > self.max_envelope_depth {
				break;
			}

			current = self
				.envelope_fields
				.iter()
				.find_map(|field| object.get(field).and_then(Value::as_object));
		}

		layers
	}

	fn probe(&self, layers: &[&Object], fields: &[String]) -> Option<TokenSecret> {
		layers.iter().find_map(|layer| {
			read_field(layer, fields).or_else(|| {
				self.container_fields
					.iter()
					.filter_map(|container| layer.get(container).and_then(Value::as_object))
					.find_map(|container| read_field(container, fields))
			})
		})
	}
}
impl Default for TokenExtractor {
	fn default() -> Self {
		let owned = |names: &[&str]| names.iter().map(|name| (*name).to_owned()).collect();

		Self {
			envelope_fields: owned(&["data", "result"]),
			max_envelope_depth: 2,
			access_fields: owned(&["token", "accessToken", "access_token"]),
			refresh_fields: owned(&["refreshToken", "refresh_token"]),
			container_fields: owned(&["tokens", "auth", "jwt"]),
		}
	}
}

fn read_field(object: &Object, fields: &[String]) -> Option<TokenSecret> {
	fields
		.iter()
		.find_map(|field| object.get(field).and_then(Value::as_str).and_then(TokenSecret::non_blank))
}
