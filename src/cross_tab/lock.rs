//! Advisory refresh lock stored in a shared slot.

// self
use crate::{
	_prelude::*,
	auth::TabId,
	cross_tab::unix_millis,
	store::{CompareAndSwapOutcome, SlotStore, StoreError, decode_slot, encode_slot},
};

/// Mutual exclusion between tabs for the refresh call.
pub trait DistributedLock
where
	Self: Send + Sync,
{
	/// Tab this handle acts for.
	fn owner(&self) -> &TabId;

	/// Takes the lock for `ttl` unless a live lock owned by another tab exists.
	///
	/// Returns `false` when another tab holds the lock or won a concurrent acquisition.
	fn try_acquire(&self, ttl: Duration) -> Result<bool, StoreError>;

	/// Releases the lock if this tab owns it; otherwise does nothing.
	fn release(&self) -> Result<(), StoreError>;

	/// Returns `true` when a live lock owned by another tab exists.
	fn is_held_by_other(&self) -> Result<bool, StoreError>;
}

/// Lock record persisted in the lock slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshLock {
	/// Tab holding the lock.
	pub owner: TabId,
	/// Instant the lock lapses.
	#[serde(with = "unix_millis")]
	pub expires_at: OffsetDateTime,
}
impl RefreshLock {
	/// Returns `true` while the lock has not lapsed.
	pub fn is_live_at(&self, now: OffsetDateTime) -> bool {
		self.expires_at > now
	}
}

/// [`DistributedLock`] over a [`SlotStore`] slot, written through compare-and-swap.
///
/// Exclusion is as strong as the backend's compare-and-swap: atomic for the built-in stores,
/// advisory for backends relying on the default read-then-write.
pub struct StorageLock {
	slots: Arc<dyn SlotStore>,
	key: String,
	owner: TabId,
}
impl StorageLock {
	/// Creates a lock handle for `owner` over the provided slot.
	pub fn new(slots: Arc<dyn SlotStore>, key: impl Into<String>, owner: TabId) -> Self {
		Self { slots, key: key.into(), owner }
	}

	/// Reads the current lock record, if one is readable.
	pub fn current(&self) -> Result<Option<RefreshLock>, StoreError> {
		match self.slots.get(&self.key)? {
			Some(raw) => Ok(decode_slot(&self.key, &raw).ok()),
			None => Ok(None),
		}
	}

	fn discard(&self, raw: &str) -> Result<(), StoreError> {
		self.slots.compare_and_swap(&self.key, Some(raw), None).map(|_| ())
	}
}
impl DistributedLock for StorageLock {
	fn owner(&self) -> &TabId {
		&self.owner
	}

	fn try_acquire(&self, ttl: Duration) -> Result<bool, StoreError> {
		let now = OffsetDateTime::now_utc();
		let current = self.slots.get(&self.key)?;

		let held_by_other = current
			.as_deref()
			.and_then(|raw| decode_slot::<RefreshLock>(&self.key, raw).ok())
			.is_some_and(|lock| lock.is_live_at(now) && lock.owner != self.owner);

		if held_by_other {
			return Ok(false);
		}

		let next =
			encode_slot(&self.key, &RefreshLock { owner: self.owner.clone(), expires_at: now + ttl })?;
		let outcome = self.slots.compare_and_swap(&self.key, current.as_deref(), Some(&next))?;

		Ok(outcome == CompareAndSwapOutcome::Updated)
	}

	fn release(&self) -> Result<(), StoreError> {
		let Some(raw) = self.slots.get(&self.key)? else {
			return Ok(());
		};

		match decode_slot::<RefreshLock>(&self.key, &raw) {
			Ok(lock) if lock.owner == self.owner => self.discard(&raw),
			_ => Ok(()),
		}
	}

	fn is_held_by_other(&self) -> Result<bool, StoreError> {
		let Some(raw) = self.slots.get(&self.key)? else {
			return Ok(false);
		};

		match decode_slot::<RefreshLock>(&self.key, &raw) {
			Ok(lock) if lock.is_live_at(OffsetDateTime::now_utc()) => Ok(lock.owner != self.owner),
			_ => {
				self.discard(&raw)?;

				Ok(false)
			},
		}
	}
}
impl Debug for StorageLock {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StorageLock").field("key", &self.key).field("owner", &self.owner).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStore;

	const KEY: &str = "auth.refresh_lock";

	fn tab(id: &str) -> TabId {
		TabId::new(id).expect("Tab identifier should be valid.")
	}

	fn pair() -> (MemoryStore, StorageLock, StorageLock) {
		let slots = MemoryStore::default();
		let shared: Arc<dyn SlotStore> = Arc::new(slots.clone());

		(
			slots,
			StorageLock::new(shared.clone(), KEY, tab("tab-a")),
			StorageLock::new(shared, KEY, tab("tab-b")),
		)
	}

	#[test]
	fn second_tab_cannot_take_a_live_lock() {
		let (_, a, b) = pair();

		assert!(a.try_acquire(Duration::seconds(15)).expect("Acquire should succeed."));
		assert!(!b.try_acquire(Duration::seconds(15)).expect("Acquire should succeed."));
		assert!(b.is_held_by_other().expect("Lock read should succeed."));
		assert!(!a.is_held_by_other().expect("Lock read should succeed."));
		assert!(a.try_acquire(Duration::seconds(15)).expect("Owner may re-acquire."));
	}

	#[test]
	fn only_the_owner_releases() {
		let (slots, a, b) = pair();

		a.try_acquire(Duration::seconds(15)).expect("Acquire should succeed.");
		b.release().expect("Foreign release should be a no-op.");

		assert!(slots.get(KEY).expect("Slot read should succeed.").is_some());

		a.release().expect("Owner release should succeed.");
		a.release().expect("Second release should be a no-op.");

		assert!(slots.is_empty());
		assert!(b.try_acquire(Duration::seconds(15)).expect("Acquire should succeed."));
	}

	#[test]
	fn stale_and_unreadable_locks_are_discarded() {
		let (slots, a, b) = pair();
		let stale = RefreshLock {
			owner: tab("tab-a"),
			expires_at: OffsetDateTime::now_utc() - Duration::seconds(1),
		};

		slots
			.set(KEY, &encode_slot(KEY, &stale).expect("Lock should encode."))
			.expect("Seeding should succeed.");

		assert!(!b.is_held_by_other().expect("Lock read should succeed."));
		assert!(slots.is_empty());

		slots.set(KEY, "{not json").expect("Seeding should succeed.");

		assert!(!a.is_held_by_other().expect("Lock read should succeed."));
		assert!(slots.is_empty());
	}

	#[test]
	fn record_uses_camel_case_and_epoch_millis() {
		let lock = RefreshLock {
			owner: tab("tab-a"),
			expires_at: OffsetDateTime::from_unix_timestamp(1_700_000_000)
				.expect("Timestamp should be valid."),
		};
		let raw = encode_slot(KEY, &lock).expect("Lock should encode.");

		assert_eq!(raw, r#"{"owner":"tab-a","expiresAt":1700000000000}"#);
		assert_eq!(decode_slot::<RefreshLock>(KEY, &raw).expect("Lock should decode."), lock);
	}
}
