//! Crate-level error types shared across the token store, coordinator, and request pipeline.

// self
use crate::{_prelude::*, auth::TabId};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeouts) while sending an API request.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Token refresh failed; see [`RefreshError`] for the classification.
	#[error(transparent)]
	Refresh(#[from] RefreshError),
	/// The API answered with a non-success status.
	#[error(transparent)]
	Api(#[from] ApiError),

	/// Caller supplied a token that cannot be stored.
	#[error("Token was rejected: {reason}.")]
	InvalidToken {
		/// Human-readable rejection reason.
		reason: String,
	},
}
impl Error {
	/// Returns `true` when the error means the refresh credential is invalid and the session
	/// has been cleared.
	pub fn is_definitive_refresh_failure(&self) -> bool {
		matches!(self, Self::Refresh(err) if err.is_definitive())
	}

	/// HTTP status associated with the failure, when one is known.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Api(err) => Some(err.status),
			Self::Refresh(err) => err.status(),
			_ => None,
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Base or endpoint URL cannot be parsed.
	#[error("The {endpoint} URL is invalid.")]
	InvalidUrl {
		/// Which URL failed to parse.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Base URL cannot carry a path (e.g., `mailto:`).
	#[error("Base URL `{url}` cannot be used as a base for API paths.")]
	CannotBeABase {
		/// Offending URL.
		url: String,
	},
	/// A duration setting must be strictly positive.
	#[error("The {setting} duration must be positive.")]
	NonPositiveDuration {
		/// Setting label.
		setting: &'static str,
	},
	/// Retry policy must allow at least one attempt.
	#[error("Retry policy must allow at least one attempt.")]
	ZeroAttempts,
	/// A storage slot name is blank.
	#[error("The {slot} storage key cannot be blank.")]
	BlankStorageKey {
		/// Slot role label.
		slot: &'static str,
	},
	/// Two storage roles share one slot name.
	#[error("Storage key `{key}` is assigned to more than one slot.")]
	DuplicateStorageKey {
		/// Duplicated slot name.
		key: String,
	},
	/// Token extractor has no field names to probe for the access token.
	#[error("Token extractor must probe at least one access token field.")]
	EmptyAccessFields,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network errors and timeouts).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {url}.")]
	Network {
		/// Target URL.
		url: String,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The request did not complete within its timeout.
	#[error("Request to {url} timed out.")]
	Timeout {
		/// Target URL.
		url: String,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(url: &Url, src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { url: url.to_string(), source: Box::new(src) }
	}

	/// Returns `true` when the failure was a timeout rather than a connection problem.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}
}

/// Coarse classification that drives retry and session handling for refresh failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureClass {
	/// The refresh credential is known to be invalid or expired.
	Definitive,
	/// Temporary failure; safe to retry.
	Transient,
	/// Unknown failure shape; retried, but never treated as proof the session is dead.
	Ambiguous,
}
impl FailureClass {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Definitive => "definitive",
			Self::Transient => "transient",
			Self::Ambiguous => "ambiguous",
		}
	}
}
impl Display for FailureClass {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Refresh failures.
///
/// The type is `Clone` because one outcome is delivered to every caller that queued behind the
/// in-flight refresh.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// Network failure, timeout, or 408/429/5xx.
	#[error("Refresh endpoint failed temporarily: {message}.")]
	Transient {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// 401, 403, or 400 with an invalid/expired refresh message.
	#[error("Refresh token was rejected: {message}.")]
	InvalidRefresh {
		/// Server-supplied or synthesized message.
		message: String,
		/// HTTP status code returned by the refresh endpoint.
		status: u16,
	},
	/// Any other failure shape.
	#[error("Refresh endpoint returned an unexpected response: {message}.")]
	Ambiguous {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The refresh succeeded on the wire but no access token could be extracted.
	#[error("Refresh response did not contain an access token.")]
	MissingAccessToken,
	/// The tab holding the cross-tab lock never reported an outcome.
	#[error("Timed out after {waited} waiting for another tab to finish refreshing.")]
	CrossTabTimeout {
		/// How long the caller waited.
		waited: Duration,
	},
	/// The tab holding the cross-tab lock reported a failed refresh.
	#[error("Tab `{owner}` reported a failed refresh.")]
	CrossTabFailure {
		/// Tab that performed the refresh.
		owner: TabId,
	},
	/// The broadcast channel closed before an outcome arrived.
	#[error("Cross-tab channel closed before a refresh outcome arrived.")]
	SignalClosed,
	/// The refresh leader was dropped before settling its queue.
	#[error("Refresh was abandoned before it settled.")]
	Abandoned,
	/// Lock, signal, or token slots could not be read or written.
	#[error(transparent)]
	Storage(#[from] crate::store::StoreError),
}
impl RefreshError {
	/// Classifies the failure for retry and session handling.
	pub fn class(&self) -> FailureClass {
		match self {
			Self::InvalidRefresh { .. } => FailureClass::Definitive,
			Self::Transient { .. } | Self::CrossTabTimeout { .. } => FailureClass::Transient,
			_ => FailureClass::Ambiguous,
		}
	}

	/// Returns `true` when the refresh credential is known to be bad.
	pub fn is_definitive(&self) -> bool {
		matches!(self.class(), FailureClass::Definitive)
	}

	/// HTTP status associated with the failure, when known.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Transient { status, .. } | Self::Ambiguous { status, .. } => *status,
			Self::InvalidRefresh { status, .. } => Some(*status),
			_ => None,
		}
	}
}

/// Non-success API response, carrying a message suitable for end users.
#[derive(Clone, Debug, PartialEq, ThisError)]
#[error("{message}")]
pub struct ApiError {
	/// HTTP status code.
	pub status: u16,
	/// User-facing message (rewritten for 401 and 429).
	pub message: String,
	/// Retry-After hint, when the server supplied one.
	pub retry_after: Option<Duration>,
	/// Parsed JSON body, when the response carried one.
	pub body: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn refresh_classes_follow_taxonomy() {
		let definitive = RefreshError::InvalidRefresh { message: "expired".into(), status: 401 };
		let transient =
			RefreshError::Transient { message: "503".into(), status: Some(503), retry_after: None };
		let ambiguous = RefreshError::Ambiguous { message: "418".into(), status: Some(418) };

		assert_eq!(definitive.class(), FailureClass::Definitive);
		assert_eq!(transient.class(), FailureClass::Transient);
		assert_eq!(ambiguous.class(), FailureClass::Ambiguous);
		assert_eq!(RefreshError::MissingAccessToken.class(), FailureClass::Ambiguous);
		assert!(definitive.is_definitive());
		assert_eq!(definitive.status(), Some(401));
		assert_eq!(RefreshError::Abandoned.status(), None);
	}

	#[test]
	fn crate_error_exposes_refresh_details() {
		let err: Error = RefreshError::InvalidRefresh { message: "revoked".into(), status: 403 }.into();

		assert!(err.is_definitive_refresh_failure());
		assert_eq!(err.status(), Some(403));

		let storage: Error = StoreError::Backend { message: "disk full".into() }.into();

		assert!(!storage.is_definitive_refresh_failure());
		assert!(storage.to_string().contains("disk full"));
	}
}
