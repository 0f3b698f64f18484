//! Thread-safe in-memory [`SlotStore`] implementation.
//!
//! Clones share the same map, so handing one clone to each simulated tab gives them the same
//! view of persisted slots.

// self
use crate::{
	_prelude::*,
	store::{CompareAndSwapOutcome, SlotStore, StoreError},
};

type SlotMap = Arc<RwLock<HashMap<String, String>>>;

/// Storage backend that keeps slots in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(SlotMap);
impl MemoryStore {
	/// Number of populated slots.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no slot is populated.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl SlotStore for MemoryStore {
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

	fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&str>,
		replacement: Option<&str>,
	) -> Result<CompareAndSwapOutcome, StoreError> {
		let mut guard = self.0.write();

		if guard.get(key).map(String::as_str) != expected {
			return Ok(CompareAndSwapOutcome::Mismatch);
		}

		match replacement {
			Some(value) => {
				guard.insert(key.to_owned(), value.to_owned());
			},
			None => {
				guard.remove(key);
			},
		}

		Ok(CompareAndSwapOutcome::Updated)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn clones_share_slots() {
		let tab_a = MemoryStore::default();
		let tab_b = tab_a.clone();

		tab_a.set("auth.access_token", "token").expect("Write should succeed.");

		assert_eq!(
			tab_b.get("auth.access_token").expect("Read should succeed.").as_deref(),
			Some("token")
		);

		tab_b.remove("auth.access_token").expect("Remove should succeed.");

		assert!(tab_a.is_empty());
	}

	#[test]
	fn compare_and_swap_is_atomic_under_the_write_lock() {
		let store = MemoryStore::default();

		store.set("lock", "a").expect("Seed write should succeed.");

		assert_eq!(
			store.compare_and_swap("lock", Some("b"), Some("c")).expect("CAS should run."),
			CompareAndSwapOutcome::Mismatch
		);
		assert_eq!(
			store.compare_and_swap("lock", Some("a"), Some("c")).expect("CAS should run."),
			CompareAndSwapOutcome::Updated
		);
		assert_eq!(store.get("lock").expect("Read should succeed.").as_deref(), Some("c"));
		assert_eq!(store.len(), 1);
	}
}
