//! Persisted access/refresh token slots with legacy-slot migration and sanitization.
//!
//! [`TokenStore`] is the only writer of token slots. Reads prefer the in-memory copy, then the
//! canonical slot, then legacy slots; a hit in a legacy slot is copied to the canonical one.
//! Writes go to the canonical slot and the first legacy alias so older builds sharing the same
//! storage keep working.

// crates.io
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	auth::{SessionSignature, TokenPair, TokenSecret},
	config::StorageKeys,
	cooldown::FailureCooldown,
	obs,
	store::{SlotStore, StoreError},
};

const EVENT_CAPACITY: usize = 16;

/// Process-wide session events emitted by [`TokenStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthEvent {
	/// Tokens were cleared; the session is over.
	Logout,
	/// A new token pair was installed.
	TokenUpdated,
}

/// Token persistence for one tab.
pub struct TokenStore {
	slots: Arc<dyn SlotStore>,
	keys: StorageKeys,
	access: RwLock<Option<TokenSecret>>,
	cooldown: FailureCooldown,
	events: broadcast::Sender<AuthEvent>,
}
impl TokenStore {
	/// Creates a store over the provided slots with the given cooldown window.
	pub fn new(slots: Arc<dyn SlotStore>, keys: StorageKeys, cooldown: Duration) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);

		Self {
			slots,
			keys,
			access: RwLock::new(None),
			cooldown: FailureCooldown::new(cooldown),
			events,
		}
	}

	/// Slot names used by this store.
	pub fn keys(&self) -> &StorageKeys {
		&self.keys
	}

	/// Underlying slot backend.
	pub fn slots(&self) -> &Arc<dyn SlotStore> {
		&self.slots
	}

	/// Failure cooldown attached to this tab's session.
	pub fn cooldown(&self) -> &FailureCooldown {
		&self.cooldown
	}

	/// Subscribes to [`AuthEvent`]s.
	pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
		self.events.subscribe()
	}

	/// Current access token.
	///
	/// Storage failures are logged and read as "no token".
	pub fn get_access_token(&self) -> Option<TokenSecret> {
		if let Some(token) = self.access.read().clone() {
			return Some(token);
		}

		let (slot, token) =
			self.keys.access_slots().find_map(|key| self.read_slot(key).map(|token| (key, token)))?;

		if slot != self.keys.access {
			self.write_slot(&self.keys.access, &token);
		}

		*self.access.write() = Some(token.clone());

		Some(token)
	}

	/// Current refresh token, never equal to the access token.
	///
	/// A refresh token that duplicates the access token is purged from every refresh slot.
	pub fn get_refresh_token(&self) -> Option<TokenSecret> {
		let refresh = self.keys.refresh_slots().find_map(|key| self.read_slot(key))?;

		if self.get_access_token().as_ref() == Some(&refresh) {
			for key in self.keys.refresh_slots() {
				self.remove_slot(key);
			}

			return None;
		}

		Some(refresh)
	}

	/// Current pair, when an access token is present.
	pub fn token_pair(&self) -> Option<TokenPair> {
		let access = self.get_access_token()?;

		Some(TokenPair::new(access, self.get_refresh_token()))
	}

	/// Returns `true` when either token is present.
	pub fn has_any_token(&self) -> bool {
		self.get_access_token().is_some() || self.get_refresh_token().is_some()
	}

	/// Fingerprint of the live pair.
	pub fn session_signature(&self) -> SessionSignature {
		let access = self.get_access_token();
		let refresh = self.get_refresh_token();

		SessionSignature::of(access.as_ref(), refresh.as_ref())
	}

	/// Returns `true` while the failure cooldown applies to the live pair.
	pub fn is_cooldown_active(&self) -> bool {
		self.cooldown.is_active(&self.session_signature())
	}

	/// Opens the failure cooldown for the live pair.
	pub fn activate_cooldown(&self) {
		self.cooldown.activate(self.session_signature());
	}

	/// Installs a new pair.
	///
	/// The access token is trimmed and must not be blank. A refresh token that is blank or equal
	/// to the access token is dropped and every refresh slot is purged. The pair is live in this
	/// tab even when persisting it fails; the storage error is still returned.
	pub fn set_tokens(&self, access: &str, refresh: Option<&str>) -> Result<()> {
		let access = TokenSecret::non_blank(access)
			.ok_or_else(|| Error::InvalidToken { reason: "access token is blank".into() })?;
		let refresh = refresh.and_then(TokenSecret::non_blank).filter(|refresh| refresh != &access);

		*self.access.write() = Some(access.clone());

		let persisted = self.store_pair(&TokenPair::new(access, refresh));

		self.cooldown.reset();

		let _ = self.events.send(AuthEvent::TokenUpdated);

		persisted.map_err(Error::from)
	}

	/// Drops the in-memory access token so the next read goes to storage.
	pub fn reload(&self) {
		self.access.write().take();
	}

	/// Installs an access token delivered by another tab, keeping the persisted refresh token.
	pub fn adopt_access_token(&self, access: &TokenSecret) -> Result<()> {
		let refresh = self.keys.refresh_slots().find_map(|key| self.read_slot(key));

		self.set_tokens(access.expose(), refresh.as_ref().map(TokenSecret::expose))
	}

	/// Purges every token slot and ends the session.
	///
	/// All slots are attempted; the first storage failure is returned after the in-memory state
	/// is cleared and [`AuthEvent::Logout`] is emitted.
	pub fn clear_tokens(&self) -> Result<()> {
		self.access.write().take();

		let mut first_error = None;

		for key in self.keys.access_slots().chain(self.keys.refresh_slots()) {
			if let Err(e) = self.slots.remove(key) {
				obs::warn_storage_degraded("remove", key, &e);

				first_error = first_error.or(Some(e));
			}
		}

		self.cooldown.reset();

		let _ = self.events.send(AuthEvent::Logout);

		match first_error {
			Some(e) => Err(e.into()),
			None => Ok(()),
		}
	}

	/// Writes the refresh slots before the access slots and attempts every slot; the first
	/// storage error is returned once all writes have been tried.
	fn store_pair(&self, pair: &TokenPair) -> Result<(), StoreError> {
		let keys = &self.keys;
		let refresh_keys =
			[Some(&keys.refresh), keys.legacy_refresh.first()].map(|k| k.map(String::as_str));
		let access_keys =
			[Some(&keys.access), keys.legacy_access.first()].map(|k| k.map(String::as_str));
		let mut first_error = None;
		let mut record = |key: &str, result: Result<(), StoreError>| {
			if let Err(e) = result {
				obs::warn_storage_degraded("set", key, &e);

				first_error = first_error.take().or(Some(e));
			}
		};

		match &pair.refresh {
			Some(refresh) =>
				for key in refresh_keys.into_iter().flatten() {
					record(key, self.slots.set(key, refresh.expose()));
				},
			None =>
				for key in keys.refresh_slots() {
					record(key, self.slots.remove(key));
				},
		}

		for key in access_keys.into_iter().flatten() {
			record(key, self.slots.set(key, pair.access.expose()));
		}

		first_error.map_or(Ok(()), Err)
	}

	fn read_slot(&self, key: &str) -> Option<TokenSecret> {
		match self.slots.get(key) {
			Ok(value) => value.as_deref().and_then(TokenSecret::non_blank),
			Err(e) => {
				obs::warn_storage_degraded("get", key, &e);

				None
			},
		}
	}

	fn write_slot(&self, key: &str, token: &TokenSecret) {
		if let Err(e) = self.slots.set(key, token.expose()) {
			obs::warn_storage_degraded("set", key, &e);
		}
	}

	fn remove_slot(&self, key: &str) {
		if let Err(e) = self.slots.remove(key) {
			obs::warn_storage_degraded("remove", key, &e);
		}
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenStore")
			.field("keys", &self.keys)
			.field("cooldown", &self.cooldown)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStore;

	fn store() -> (MemoryStore, TokenStore) {
		let slots = MemoryStore::default();
		let tokens =
			TokenStore::new(Arc::new(slots.clone()), StorageKeys::default(), Duration::seconds(15));

		(slots, tokens)
	}

	fn slot(slots: &MemoryStore, key: &str) -> Option<String> {
		slots.get(key).expect("Memory store reads should succeed.")
	}

	#[test]
	fn set_tokens_writes_canonical_and_first_alias() {
		let (slots, tokens) = store();

		tokens.set_tokens(" access ", Some("refresh")).expect("Tokens should be stored.");

		assert_eq!(slot(&slots, "auth.access_token").as_deref(), Some("access"));
		assert_eq!(slot(&slots, "accessToken").as_deref(), Some("access"));
		assert_eq!(slot(&slots, "token"), None);
		assert_eq!(slot(&slots, "auth.refresh_token").as_deref(), Some("refresh"));
		assert_eq!(slot(&slots, "refreshToken").as_deref(), Some("refresh"));
		assert_eq!(tokens.get_refresh_token(), Some(TokenSecret::new("refresh")));
	}

	#[test]
	fn failed_slot_write_still_persists_the_rest_of_the_pair() {
		struct RejectKey(MemoryStore, &'static str);
		impl SlotStore for RejectKey {
			fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
				self.0.get(key)
			}

			fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
				if key == self.1 {
					return Err(StoreError::Backend { message: "quota exceeded".into() });
				}

				self.0.set(key, value)
			}

			fn remove(&self, key: &str) -> Result<(), StoreError> {
				self.0.remove(key)
			}
		}

		let slots = MemoryStore::default();

		slots.set("auth.access_token", "old").expect("Seeding should succeed.");
		slots.set("auth.refresh_token", "r1").expect("Seeding should succeed.");

		let tokens = TokenStore::new(
			Arc::new(RejectKey(slots.clone(), "auth.access_token")),
			StorageKeys::default(),
			Duration::seconds(15),
		);
		let err = tokens.set_tokens("new", Some("r2")).expect_err("Rejected slot should surface.");

		assert!(matches!(err, Error::Storage(_)));
		assert_eq!(slot(&slots, "auth.refresh_token").as_deref(), Some("r2"));
		assert_eq!(slot(&slots, "refreshToken").as_deref(), Some("r2"));
		assert_eq!(slot(&slots, "accessToken").as_deref(), Some("new"));
		assert_eq!(tokens.get_access_token(), Some(TokenSecret::new("new")));
		assert_eq!(tokens.get_refresh_token(), Some(TokenSecret::new("r2")));
	}

	#[test]
	fn blank_access_token_is_rejected() {
		let (slots, tokens) = store();

		assert!(matches!(
			tokens.set_tokens("   ", Some("refresh")),
			Err(Error::InvalidToken { .. })
		));
		assert!(slots.is_empty());
	}

	#[test]
	fn refresh_equal_to_access_is_absent() {
		let (slots, tokens) = store();

		tokens.set_tokens("same", Some("same")).expect("Tokens should be stored.");

		assert!(tokens.get_refresh_token().is_none());
		assert_eq!(slot(&slots, "auth.refresh_token"), None);
	}

	#[test]
	fn duplicated_refresh_slot_is_purged_on_read() {
		let (slots, tokens) = store();

		slots.set("auth.access_token", "dup").expect("Seeding should succeed.");
		slots.set("refresh_token", "dup").expect("Seeding should succeed.");

		assert!(tokens.get_refresh_token().is_none());
		assert_eq!(slot(&slots, "refresh_token"), None);
	}

	#[test]
	fn legacy_access_slot_is_migrated() {
		let (slots, tokens) = store();

		slots.set("token", "legacy").expect("Seeding should succeed.");

		let token = tokens.get_access_token().expect("Legacy token should be found.");

		assert_eq!(token.expose(), "legacy");
		assert_eq!(slot(&slots, "auth.access_token").as_deref(), Some("legacy"));
	}

	#[test]
	fn clear_tokens_purges_every_slot_and_emits_logout() {
		let (slots, tokens) = store();
		let mut events = tokens.subscribe();

		slots.set("refresh_token", "old").expect("Seeding should succeed.");
		tokens.set_tokens("access", Some("refresh")).expect("Tokens should be stored.");
		tokens.clear_tokens().expect("Clearing should succeed.");

		assert!(slots.is_empty());
		assert!(tokens.get_access_token().is_none());
		assert!(!tokens.has_any_token());
		assert_eq!(
			events.try_recv().expect("Update event should be queued."),
			AuthEvent::TokenUpdated
		);
		assert_eq!(events.try_recv().expect("Logout event should be queued."), AuthEvent::Logout);
	}

	#[test]
	fn new_tokens_disarm_the_cooldown() {
		let (_, tokens) = store();

		tokens.set_tokens("a", Some("r")).expect("Tokens should be stored.");
		tokens.activate_cooldown();

		assert!(tokens.is_cooldown_active());

		tokens.set_tokens("b", Some("r")).expect("Tokens should be stored.");

		assert!(!tokens.is_cooldown_active());
	}

	#[test]
	fn adopting_keeps_persisted_refresh_token() {
		let (_, tokens) = store();

		tokens.set_tokens("old", Some("refresh")).expect("Tokens should be stored.");
		tokens.adopt_access_token(&TokenSecret::new("new")).expect("Adoption should succeed.");

		assert_eq!(tokens.get_access_token(), Some(TokenSecret::new("new")));
		assert_eq!(tokens.get_refresh_token(), Some(TokenSecret::new("refresh")));
	}
}
