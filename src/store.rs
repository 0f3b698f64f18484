//! Slot storage contracts and built-in backends for persisted session state.
//!
//! A slot store is a flat string key/value map shared by every tab of one client profile,
//! the same shape as browser `localStorage`. Token slots, the cross-tab lock, and the broadcast
//! slot all live here.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::_prelude::*;

/// Storage backend contract for persisted slots.
pub trait SlotStore
where
	Self: Send + Sync,
{
	/// Reads a slot.
	fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

	/// Writes a slot, replacing any previous value.
	fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

	/// Deletes a slot; deleting a missing slot is not an error.
	fn remove(&self, key: &str) -> Result<(), StoreError>;

	/// Replaces the slot only if it still holds `expected` (`None` = absent).
	///
	/// A `replacement` of `None` deletes the slot. The default implementation is a plain
	/// read-then-write and therefore only advisory; backends that can do better override it.
	fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&str>,
		replacement: Option<&str>,
	) -> Result<CompareAndSwapOutcome, StoreError> {
		if self.get(key)?.as_deref() != expected {
			return Ok(CompareAndSwapOutcome::Mismatch);
		}

		match replacement {
			Some(value) => self.set(key, value)?,
			None => self.remove(key)?,
		}

		Ok(CompareAndSwapOutcome::Updated)
	}
}

/// Result of a slot compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The slot matched the expected value and was replaced.
	Updated,
	/// The slot held something else; nothing was written.
	Mismatch,
}

/// Error type produced by [`SlotStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend or by slot payload decoding.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Decodes a JSON slot payload, reporting the failing path on error.
pub(crate) fn decode_slot<T>(key: &str, raw: &str) -> Result<T, StoreError>
where
	T: for<'de> Deserialize<'de>,
{
	let mut de = serde_json::Deserializer::from_str(raw);

	serde_path_to_error::deserialize(&mut de).map_err(|e| StoreError::Serialization {
		message: format!("Slot `{key}` holds an unreadable value at `{}`: {}", e.path(), e.inner()),
	})
}

/// Encodes a JSON slot payload.
pub(crate) fn encode_slot<T>(key: &str, value: &T) -> Result<String, StoreError>
where
	T: Serialize,
{
	serde_json::to_string(value).map_err(|e| StoreError::Serialization {
		message: format!("Failed to encode slot `{key}`: {e}"),
	})
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;

	/// Store that only implements the required methods so the default CAS is exercised.
	#[derive(Default)]
	struct PlainStore(RwLock<HashMap<String, String>>);
	impl SlotStore for PlainStore {
		fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
			Ok(self.0.read().get(key).cloned())
		}

		fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
			self.0.write().insert(key.to_owned(), value.to_owned());

			Ok(())
		}

		fn remove(&self, key: &str) -> Result<(), StoreError> {
			self.0.write().remove(key);

			Ok(())
		}
	}

	#[test]
	fn store_error_converts_into_crate_error_with_source() {
		let store_error = StoreError::Backend { message: "quota exceeded".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("quota exceeded"));

		let source = StdError::source(&error)
			.expect("Crate error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn default_compare_and_swap_respects_expected_value() {
		let store = PlainStore::default();

		assert_eq!(
			store.compare_and_swap("slot", None, Some("a")).expect("CAS on empty slot should run."),
			CompareAndSwapOutcome::Updated
		);
		assert_eq!(
			store.compare_and_swap("slot", None, Some("b")).expect("CAS should run."),
			CompareAndSwapOutcome::Mismatch
		);
		assert_eq!(
			store.compare_and_swap("slot", Some("a"), None).expect("CAS delete should run."),
			CompareAndSwapOutcome::Updated
		);
		assert_eq!(store.get("slot").expect("Read should succeed."), None);
	}

	#[test]
	fn decode_slot_reports_path() {
		#[derive(Debug, Deserialize)]
		struct Probe {
			#[allow(dead_code)]
			owner: String,
		}

		let err = decode_slot::<Probe>("lock", "{\"owner\":7}")
			.expect_err("Numeric owner should fail to decode.");

		assert!(err.to_string().contains("owner"));
	}
}
