//! Strongly typed tab identifiers used as lock owners and broadcast origins.

// std
use std::{borrow::Borrow, ops::Deref};
// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::_prelude::*;

const IDENTIFIER_MAX_LEN: usize = 128;
const GENERATED_LEN: usize = 16;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("Tab identifier cannot be empty.")]
	Empty,
	/// The identifier contains whitespace characters.
	#[error("Tab identifier contains whitespace.")]
	ContainsWhitespace,
	/// The identifier exceeded the allowed character count.
	#[error("Tab identifier exceeds {max} characters.")]
	TooLong {
		/// Maximum permitted character count.
		max: usize,
	},
}

/// Identifies one client instance ("tab") among the peers sharing persisted credentials.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TabId(String);
impl TabId {
	/// Creates a new identifier after validation.
	pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
		let view = value.as_ref();

		validate_view(view)?;

		Ok(Self(view.to_owned()))
	}

	/// Generates a random alphanumeric identifier for a freshly started tab.
	pub fn generate() -> Self {
		Self(rand::rng().sample_iter(Alphanumeric).take(GENERATED_LEN).map(char::from).collect())
	}
}
impl Deref for TabId {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl AsRef<str> for TabId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl From<TabId> for String {
	fn from(value: TabId) -> Self {
		value.0
	}
}
impl TryFrom<String> for TabId {
	type Error = IdentifierError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		validate_view(&value)?;

		Ok(Self(value))
	}
}
impl Borrow<str> for TabId {
	fn borrow(&self) -> &str {
		&self.0
	}
}
impl Debug for TabId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Tab({})", self.0)
	}
}
impl Display for TabId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}
impl FromStr for TabId {
	type Err = IdentifierError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}

fn validate_view(view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty);
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace);
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_validate() {
		assert!(TabId::new(" tab-1").is_err(), "Leading whitespace must be rejected.");
		assert!(TabId::new("").is_err());
		assert!(TabId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());

		let tab = TabId::new("tab-1").expect("Tab fixture should be considered valid.");

		assert_eq!(tab.as_ref(), "tab-1");
		assert_eq!(format!("{tab:?}"), "Tab(tab-1)");
	}

	#[test]
	fn generated_identifiers_are_valid_and_distinct() {
		let first = TabId::generate();
		let second = TabId::generate();

		assert_eq!(first.len(), GENERATED_LEN);
		assert!(TabId::new(first.as_ref()).is_ok());
		assert_ne!(first, second);
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let tab: TabId =
			serde_json::from_str("\"tab-42\"").expect("Tab should deserialize successfully.");

		assert_eq!(tab.as_ref(), "tab-42");
		assert!(serde_json::from_str::<TabId>("\"with space\"").is_err());
	}
}
