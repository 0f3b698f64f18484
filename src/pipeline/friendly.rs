//! User-facing rewrites of error responses.

// crates.io
use serde_json::Value;
// self
use crate::{_prelude::*, error::ApiError, http::ApiResponse};

const PERMISSION_HINTS: [&str; 5] =
	["permission", "forbidden", "not authorized", "not allowed", "access denied"];
const SESSION_EXPIRED: &str = "Your session has expired. Please sign in again.";
const PERMISSION_DENIED: &str = "You do not have permission to perform this action.";

/// Builds the [`ApiError`] for a non-success response.
///
/// A 429 carries a wait hint; a 401 from a non-auth endpoint reads as either an expired session
/// or a missing permission, depending on what the payload says. Other statuses keep the
/// server-supplied message.
pub fn api_error(response: &ApiResponse, auth_endpoint: bool) -> ApiError {
	let status = response.status.as_u16();
	let retry_after = response.retry_after();
	let body = response.json_value();
	let message = match status {
		429 => too_many_requests(retry_after),
		401 if !auth_endpoint => unauthorized(response, body.as_ref()),
		_ => response.error_message().unwrap_or_else(|| generic(response)),
	};

	ApiError { status, message, retry_after, body }
}

/// Rate-limit message with a wait hint rounded up to whole seconds.
pub fn too_many_requests(retry_after: Option<Duration>) -> String {
	let seconds = retry_after.filter(|d| d.is_positive()).map(|d| {
		let whole = d.whole_seconds();

		if d.subsec_nanoseconds() > 0 { whole + 1 } else { whole }
	});

	match seconds {
		Some(1) => "Too many requests. Please wait 1 second before trying again.".into(),
		Some(n) => format!("Too many requests. Please wait {n} seconds before trying again."),
		None => "Too many requests. Please wait a moment before trying again.".into(),
	}
}

fn unauthorized(response: &ApiResponse, body: Option<&Value>) -> String {
	let haystack = match body {
		Some(payload) => payload.to_string(),
		None => response.error_message().unwrap_or_default(),
	}
	.to_ascii_lowercase();

	if PERMISSION_HINTS.iter().any(|hint| haystack.contains(hint)) {
		PERMISSION_DENIED.into()
	} else {
		SESSION_EXPIRED.into()
	}
}

fn generic(response: &ApiResponse) -> String {
	let status = response.status.as_u16();

	match response.status.canonical_reason() {
		Some(reason) => format!("Request failed with status {status} ({reason})."),
		None => format!("Request failed with status {status}."),
	}
}
