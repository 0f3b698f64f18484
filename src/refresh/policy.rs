//! Retry policy applied to refresh attempts owned by this tab.

// self
use crate::{_prelude::*, error::RefreshError};

/// Predicate deciding whether a failed attempt may be retried.
pub type RetryPredicate = Arc<dyn Fn(&RefreshError) -> bool + Send + Sync>;

/// Delay schedule between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
	/// Retry immediately.
	None,
	/// Wait the same span before every retry.
	Constant(Duration),
	/// Wait `attempt × step` after the given (1-based) attempt.
	Linear(Duration),
}
impl Backoff {
	/// Delay to apply after the given 1-based attempt failed.
	pub fn delay_after(self, attempt: u32) -> Duration {
		match self {
			Self::None => Duration::ZERO,
			Self::Constant(step) => step,
			Self::Linear(step) => step.saturating_mul(i32::try_from(attempt).unwrap_or(i32::MAX)),
		}
	}
}

/// Max attempts, backoff schedule, and retryable predicate for one refresh.
#[derive(Clone)]
pub struct RetryPolicy {
	max_attempts: u32,
	backoff: Backoff,
	retryable: RetryPredicate,
}
impl RetryPolicy {
	/// Default number of attempts, counting the first one.
	pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
	/// Default linear backoff step.
	pub const DEFAULT_BACKOFF_STEP: Duration = Duration::milliseconds(500);

	/// Creates a policy that retries every non-definitive failure.
	pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
		Self { max_attempts, backoff, retryable: Arc::new(|err| !err.is_definitive()) }
	}

	/// Overrides the attempt budget.
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;

		self
	}

	/// Overrides the backoff schedule.
	pub fn with_backoff(mut self, backoff: Backoff) -> Self {
		self.backoff = backoff;

		self
	}

	/// Overrides the retryable predicate.
	pub fn with_retryable<F>(mut self, predicate: F) -> Self
	where
		F: 'static + Fn(&RefreshError) -> bool + Send + Sync,
	{
		self.retryable = Arc::new(predicate);

		self
	}

	/// Total attempts allowed, counting the first one.
	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	/// Backoff schedule.
	pub fn backoff(&self) -> Backoff {
		self.backoff
	}

	/// Returns `true` when another attempt should follow the failed `attempt` (1-based).
	pub fn should_retry(&self, attempt: u32, err: &RefreshError) -> bool {
		attempt < self.max_attempts && (self.retryable)(err)
	}

	/// Delay to wait after the failed `attempt` (1-based).
	pub fn delay_after(&self, attempt: u32) -> Duration {
		self.backoff.delay_after(attempt)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(Self::DEFAULT_MAX_ATTEMPTS, Backoff::Linear(Self::DEFAULT_BACKOFF_STEP))
	}
}
impl Debug for RetryPolicy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RetryPolicy")
			.field("max_attempts", &self.max_attempts)
			.field("backoff", &self.backoff)
			.finish_non_exhaustive()
	}
}
