//! Single-flight bearer-token refresh for REST clients: persisted token slots, cross-tab locks
//! and signals, and 401-aware request interception in one crate.
//!
//! Each "tab" (an independent client instance sharing persisted credentials with its peers)
//! owns one [`refresh::RefreshCoordinator`]. The coordinator keeps exactly one refresh call in
//! flight per tab, waits on peers that already hold the cross-tab lock, and classifies terminal
//! failures into logout or cooldown. [`pipeline::RequestPipeline`] wraps a transport so every
//! request carries the current bearer token and a 401 is retried once after a refresh.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod cooldown;
pub mod cross_tab;
pub mod error;
pub mod http;
pub mod obs;
pub mod pipeline;
pub mod refresh;
pub mod store;
pub mod tokens;

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};

	/// Converts a signed [`Duration`] into the std flavor used by tokio timers, clamping
	/// negative spans to zero.
	pub fn std_duration(duration: Duration) -> std::time::Duration {
		if duration.is_negative() { std::time::Duration::ZERO } else { duration.unsigned_abs() }
	}
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
