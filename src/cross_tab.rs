//! Coordination between tabs sharing one slot store: an advisory refresh lock and a broadcast
//! signal carrying refresh outcomes.

pub mod lock;
pub mod signal;

pub use lock::*;
pub use signal::*;

/// Serde adapter storing instants as Unix epoch milliseconds.
pub(crate) mod unix_millis {
	// crates.io
	use serde::{Deserializer, Serializer, de::Error as _, ser::Error as _};
	// self
	use crate::_prelude::*;

	const NANOS_PER_MILLI: i128 = 1_000_000;

	pub(crate) fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let millis = i64::try_from(value.unix_timestamp_nanos() / NANOS_PER_MILLI)
			.map_err(S::Error::custom)?;

		serializer.serialize_i64(millis)
	}

	pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
	where
		D: Deserializer<'de>,
	{
		let millis = i64::deserialize(deserializer)?;

		OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI)
			.map_err(D::Error::custom)
	}
}
