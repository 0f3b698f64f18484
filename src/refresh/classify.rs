//! Failure classification for refresh attempts.
//!
//! The classifier keeps only primitive data (status, message, transport flags) so it stays
//! independent of the HTTP stack. Definitive failures end the session; everything else is
//! retried and, once attempts run out, keeps the session alive under a cooldown.

// self
use crate::{
	_prelude::*,
	error::{RefreshError, TransportError},
	http::ApiResponse,
};

const SUBJECT_WORDS: [&str; 2] = ["refresh", "token"];
const VERDICT_WORDS: [&str; 5] = ["invalid", "expired", "revoked", "malformed", "not found"];

/// Context passed to [`classify`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FailureContext {
	/// HTTP status code, when a response arrived.
	pub status: Option<u16>,
	/// Best-effort message from the response body or transport.
	pub message: Option<String>,
	/// Retry-After hint from the response.
	pub retry_after: Option<Duration>,
	/// The failure originated from the network layer.
	pub network_error: bool,
	/// The attempt exceeded its timeout.
	pub timed_out: bool,
}
impl FailureContext {
	/// Context for a response with the provided status.
	pub fn with_status(status: u16) -> Self {
		Self { status: Some(status), ..Self::default() }
	}

	/// Context for a non-success response.
	pub fn from_response(response: &ApiResponse) -> Self {
		Self {
			status: Some(response.status.as_u16()),
			message: response.error_message(),
			retry_after: response.retry_after(),
			..Self::default()
		}
	}

	/// Context for a transport failure.
	pub fn from_transport(err: &TransportError) -> Self {
		Self {
			message: Some(err.to_string()),
			network_error: !err.is_timeout(),
			timed_out: err.is_timeout(),
			..Self::default()
		}
	}

	/// Context for an attempt that exceeded the refresh timeout.
	pub fn timeout(limit: Duration) -> Self {
		Self {
			message: Some(format!("refresh call exceeded {limit}")),
			timed_out: true,
			..Self::default()
		}
	}

	/// Adds a message.
	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());

		self
	}
}

/// Maps a failed attempt into the [`RefreshError`] taxonomy.
pub fn classify(ctx: &FailureContext) -> RefreshError {
	let message = ctx.message.clone().unwrap_or_else(|| match ctx.status {
		Some(status) => format!("HTTP {status}"),
		None => "no response".into(),
	});

	if ctx.network_error || ctx.timed_out {
		return RefreshError::Transient { message, status: ctx.status, retry_after: ctx.retry_after };
	}

	match ctx.status {
		Some(status @ (401 | 403)) => RefreshError::InvalidRefresh { message, status },
		Some(400) if mentions_invalid_refresh(&message) =>
			RefreshError::InvalidRefresh { message, status: 400 },
		Some(408 | 429) => {
			RefreshError::Transient { message, status: ctx.status, retry_after: ctx.retry_after }
		},
		Some(code) if code >= 500 => {
			RefreshError::Transient { message, status: ctx.status, retry_after: ctx.retry_after }
		},
		status => RefreshError::Ambiguous { message, status },
	}
}

fn mentions_invalid_refresh(message: &str) -> bool {
	let lowered = message.to_ascii_lowercase();

	if lowered.contains("invalid_grant") {
		return true;
	}

	SUBJECT_WORDS.iter().any(|word| lowered.contains(word))
		&& VERDICT_WORDS.iter().any(|word| lowered.contains(word))
}
