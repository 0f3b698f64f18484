// self
use crate::{_prelude::*, error::RefreshError, obs::FlowKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// A span builder used by refresh and retry flows.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the provided flow kind + stage.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("bearer_session.flow", flow = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a warning for a refresh attempt that will be followed by another one.
pub(crate) fn warn_attempt_failed(attempt: u32, err: &RefreshError) {
	#[cfg(feature = "tracing")]
	tracing::warn!(attempt, class = err.class().as_str(), error = %err, "refresh attempt failed");

	#[cfg(not(feature = "tracing"))]
	let _ = (attempt, err);
}

/// Emits a warning for a storage operation whose failure was absorbed.
pub(crate) fn warn_storage_degraded(operation: &'static str, key: &str, err: &dyn Display) {
	#[cfg(feature = "tracing")]
	tracing::warn!(operation, key, error = %err, "slot storage degraded");

	#[cfg(not(feature = "tracing"))]
	let _ = (operation, key, err);
}

/// Emits a warning when a definitive refresh failure ends the session.
pub(crate) fn warn_session_cleared(err: &RefreshError) {
	#[cfg(feature = "tracing")]
	tracing::warn!(error = %err, "refresh credential rejected; session cleared");

	#[cfg(not(feature = "tracing"))]
	let _ = err;
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn warn_helpers_accept_any_input() {
		warn_attempt_failed(1, &RefreshError::MissingAccessToken);
		warn_storage_degraded("get", "auth.access_token", &StoreError::Backend {
			message: "offline".into(),
		});
		warn_session_cleared(&RefreshError::InvalidRefresh { message: "expired".into(), status: 401 });
	}

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = FlowSpan::new(FlowKind::Refresh, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
