//! Transport primitives shared by the refresh coordinator and the request pipeline.
//!
//! [`HttpTransport`] is the crate's only dependency on an HTTP stack. The coordinator uses it
//! for `POST <base>/auth/refresh`; [`RequestPipeline`](crate::pipeline::RequestPipeline) uses the
//! same transport for application requests, so cookie jars and connection pools are shared.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
use http::{
	HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
	header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, auth::TokenSecret, error::TransportError};

const BODY_PREVIEW_LIMIT: usize = 256;
const MESSAGE_FIELDS: [&str; 4] = ["message", "error_description", "error", "detail"];

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP transports.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be shared by the
/// coordinator, the pipeline, and any number of spawned request tasks. Non-success statuses are
/// responses, not errors; only failures to obtain a response map to [`TransportError`].
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends the request and returns the full response.
	fn send(&self, request: ApiRequest) -> TransportFuture<'_, ApiResponse>;
}

/// Outgoing API request.
#[derive(Clone)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute request URL.
	pub url: Url,
	/// Request headers.
	pub headers: HeaderMap,
	/// Raw request body.
	pub body: Option<Vec<u8>>,
	/// Per-request timeout, when the transport should enforce one.
	pub timeout: Option<Duration>,
	/// Set once the pipeline has retried this request after a refresh.
	pub retried: bool,
}
impl ApiRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, headers: HeaderMap::new(), body: None, timeout: None, retried: false }
	}

	/// Creates a `GET` request.
	pub fn get(url: Url) -> Self {
		Self::new(Method::GET, url)
	}

	/// Creates a `POST` request.
	pub fn post(url: Url) -> Self {
		Self::new(Method::POST, url)
	}

	/// Sets a JSON body and the matching content type.
	pub fn with_json(mut self, value: &serde_json::Value) -> Self {
		self.body = Some(value.to_string().into_bytes());
		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		self
	}

	/// Inserts a header, replacing previous values.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Sets the per-request timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Returns the bearer token currently attached, if any.
	pub fn bearer_token(&self) -> Option<&str> {
		bearer_from(&self.headers)
	}

	/// Attaches `Authorization: Bearer <token>`.
	///
	/// Returns `false` (and leaves the request without an `Authorization` header) when the token
	/// is not a valid header value.
	pub fn set_bearer_token(&mut self, token: &TokenSecret) -> bool {
		match sensitive_value(&format!("Bearer {}", token.expose())) {
			Some(value) => {
				self.headers.insert(AUTHORIZATION, value);

				true
			},
			None => {
				self.headers.remove(AUTHORIZATION);

				false
			},
		}
	}

	/// Removes the `Authorization` header.
	pub fn clear_bearer_token(&mut self) {
		self.headers.remove(AUTHORIZATION);
	}
}
impl Debug for ApiRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiRequest")
			.field("method", &self.method)
			.field("url", &self.url.as_str())
			.field("authorized", &self.headers.contains_key(AUTHORIZATION))
			.field("body_len", &self.body.as_ref().map(Vec::len))
			.field("timeout", &self.timeout)
			.field("retried", &self.retried)
			.finish()
	}
}

/// Response returned by an [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Creates an empty response with the provided status.
	pub fn new(status: StatusCode) -> Self {
		Self { status, headers: HeaderMap::new(), body: Vec::new() }
	}

	/// Sets a JSON body and the matching content type.
	pub fn with_json(mut self, value: &serde_json::Value) -> Self {
		self.body = value.to_string().into_bytes();
		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		self
	}

	/// Inserts a header, replacing previous values.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	/// Parses the body as JSON, returning `None` for empty or non-JSON bodies.
	pub fn json_value(&self) -> Option<serde_json::Value> {
		if self.body.is_empty() {
			return None;
		}

		serde_json::from_slice(&self.body).ok()
	}

	/// Retry-After hint expressed as a relative duration.
	pub fn retry_after(&self) -> Option<Duration> {
		parse_retry_after(&self.headers)
	}

	/// Best-effort error message: a string `message`/`error_description`/`error`/`detail` field
	/// (top level or under `error`), else a preview of a plain-text body.
	pub fn error_message(&self) -> Option<String> {
		if let Some(payload) = self.json_value() {
			return message_from_payload(&payload);
		}

		let text = String::from_utf8_lossy(&self.body);
		let text = text.trim();

		if text.is_empty() { None } else { Some(truncate_preview(text)) }
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Use [`ReqwestHttpClient::with_credentials`] when the backend relies on cookies for the
/// refresh call; the default client keeps no cookie jar.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client with a cookie store so credentialed refresh calls carry session cookies.
	pub fn with_credentials() -> Result<Self, crate::error::ConfigError> {
		Ok(Self(ReqwestClient::builder().cookie_store(true).build()?))
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestHttpClient {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_, ApiResponse> {
		Box::pin(async move {
			let ApiRequest { method, url, headers, body, timeout, .. } = request;
			let mut builder = self.0.request(method, url.clone()).headers(headers);

			if let Some(body) = body {
				builder = builder.body(body);
			}
			if let Some(timeout) = timeout {
				builder = builder.timeout(std_duration(timeout));
			}

			let response = builder.send().await.map_err(|e| map_reqwest_error(&url, e))?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response.bytes().await.map_err(|e| map_reqwest_error(&url, e))?.to_vec();

			Ok(ApiResponse { status, headers, body })
		})
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(url: &Url, err: ReqwestError) -> TransportError {
	if err.is_timeout() {
		TransportError::Timeout { url: url.to_string() }
	} else {
		TransportError::network(url, err)
	}
}

/// Builds a header value flagged as sensitive so it never shows up in `Debug` output.
pub(crate) fn sensitive_value(raw: &str) -> Option<HeaderValue> {
	let mut value = HeaderValue::from_str(raw).ok()?;

	value.set_sensitive(true);

	Some(value)
}

pub(crate) fn bearer_from(headers: &HeaderMap) -> Option<&str> {
	let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
	let (scheme, token) = raw.split_once(' ')?;

	if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
		Some(token.trim())
	} else {
		None
	}
}

pub(crate) fn truncate_preview(text: &str) -> String {
	if text.chars().count() <= BODY_PREVIEW_LIMIT {
		return text.to_owned();
	}

	let mut preview: String = text.chars().take(BODY_PREVIEW_LIMIT).collect();

	preview.push('…');

	preview
}

fn message_from_payload(payload: &serde_json::Value) -> Option<String> {
	let object = payload.as_object()?;
	let direct = MESSAGE_FIELDS.iter().find_map(|field| {
		object
			.get(*field)
			.and_then(serde_json::Value::as_str)
			.map(str::trim)
			.filter(|s| !s.is_empty())
	});

	match direct {
		Some(message) => Some(truncate_preview(message)),
		None => object.get("error").and_then(message_from_payload),
	}
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
