//! Auth-domain identifiers, token secrets, and session fingerprints.

pub mod id;
pub mod secret;
pub mod session;

pub use id::*;
pub use secret::*;
pub use session::*;
