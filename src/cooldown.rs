//! Per-session suppression window entered after a refresh could not be completed.
//!
//! While the window is open the request pipeline stops turning 401s into refresh attempts. The
//! window is pinned to the token pair that failed: once different tokens are installed it no
//! longer applies, even before it expires.

// self
use crate::{_prelude::*, auth::SessionSignature};

/// Snapshot of an active cooldown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CooldownState {
	/// Instant the cooldown lapses.
	pub active_until: OffsetDateTime,
	/// Session the cooldown applies to.
	pub session_signature: SessionSignature,
}

/// Failure cooldown guarded by a mutex so every clone of the owning store sees one window.
#[derive(Debug)]
pub struct FailureCooldown {
	window: Duration,
	state: Mutex<Option<CooldownState>>,
}
impl FailureCooldown {
	/// Creates an inactive cooldown with the provided window.
	pub fn new(window: Duration) -> Self {
		Self { window, state: Mutex::new(None) }
	}

	/// Configured window length.
	pub fn window(&self) -> Duration {
		self.window
	}

	/// Opens the window for the provided session, starting now.
	pub fn activate(&self, signature: SessionSignature) {
		self.activate_at(signature, OffsetDateTime::now_utc());
	}

	/// Opens the window for the provided session, starting at `now`.
	pub fn activate_at(&self, signature: SessionSignature, now: OffsetDateTime) {
		*self.state.lock() =
			Some(CooldownState { active_until: now + self.window, session_signature: signature });
	}

	/// Returns `true` while the window is open for the provided session.
	pub fn is_active(&self, current: &SessionSignature) -> bool {
		self.is_active_at(current, OffsetDateTime::now_utc())
	}

	/// Same as [`FailureCooldown::is_active`] evaluated at `now`.
	///
	/// Expired or foreign-session state is dropped on read.
	pub fn is_active_at(&self, current: &SessionSignature, now: OffsetDateTime) -> bool {
		let mut state = self.state.lock();
		let active = state
			.as_ref()
			.is_some_and(|s| s.active_until > now && &s.session_signature == current);

		if !active {
			*state = None;
		}

		active
	}

	/// Closes the window.
	pub fn reset(&self) {
		self.state.lock().take();
	}

	/// Current state, if a window was opened and not yet cleared.
	pub fn state(&self) -> Option<CooldownState> {
		self.state.lock().clone()
	}
}
impl Default for FailureCooldown {
	fn default() -> Self {
		Self::new(Duration::seconds(15))
	}
}
