//! Session fingerprints tying advisory state to one access/refresh pair.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::TokenSecret};

/// Access/refresh pair as held by the token store.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
	/// Access token attached to outgoing requests.
	pub access: TokenSecret,
	/// Refresh token, if the backend issued one.
	pub refresh: Option<TokenSecret>,
}
impl TokenPair {
	/// Creates a pair.
	pub fn new(access: TokenSecret, refresh: Option<TokenSecret>) -> Self {
		Self { access, refresh }
	}

	/// Fingerprint of this pair.
	pub fn signature(&self) -> SessionSignature {
		SessionSignature::of(Some(&self.access), self.refresh.as_ref())
	}
}
impl Debug for TokenPair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenPair")
			.field("access", &"<redacted>")
			.field("refresh", &self.refresh.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Fingerprint of the live (access, refresh) pair.
///
/// Two signatures are equal exactly when both slots hold the same secrets (or are both empty),
/// so any login or refresh produces a different signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionSignature(String);
impl SessionSignature {
	/// Computes the signature for the provided slots.
	pub fn of(access: Option<&TokenSecret>, refresh: Option<&TokenSecret>) -> Self {
		let mut hasher = Sha256::new();

		for slot in [access, refresh] {
			match slot {
				Some(secret) => {
					hasher.update(b"1:");
					hasher.update(secret.fingerprint().as_bytes());
				},
				None => hasher.update(b"0:"),
			}

			hasher.update(b"|");
		}

		Self(STANDARD_NO_PAD.encode(hasher.finalize()))
	}

	/// Returns the encoded signature.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
