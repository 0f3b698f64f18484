//! Single-flight access token refresh with cross-tab coordination and failure classification.
//!
//! Each tab owns one [`RefreshCoordinator`]. The first caller of
//! [`RefreshCoordinator::refresh_access_token`] becomes the leader; callers arriving while it
//! runs are queued and receive the leader's outcome in arrival order. The leader either waits
//! for another tab that already holds the cross-tab lock or takes the lock and calls the
//! refresh endpoint itself, retrying per the configured [`RetryPolicy`].
//!
//! A definitive failure (the refresh credential was rejected) clears the session. Any other
//! terminal failure keeps the tokens and opens the failure cooldown so a burst of 401s does not
//! turn into a burst of refresh calls.

pub mod classify;
pub mod extract;
pub mod policy;

mod metrics;

pub use classify::*;
pub use extract::*;
pub use metrics::RefreshMetrics;
pub use policy::*;

// crates.io
use http::HeaderName;
use serde_json::json;
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{TabId, TokenPair, TokenSecret},
	config::CoordinatorConfig,
	cross_tab::{BroadcastChannel, CrossTabSignal, DistributedLock, RefreshStatus, StorageLock},
	error::RefreshError,
	http::{ApiRequest, HttpTransport, sensitive_value},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::SlotStore,
	tokens::TokenStore,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Header carrying the refresh token alongside the JSON body.
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

type Settlement = Result<TokenSecret, RefreshError>;

#[cfg(feature = "reqwest")]
/// Coordinator specialized for the crate's default reqwest transport.
pub type ReqwestRefreshCoordinator = RefreshCoordinator<ReqwestHttpClient>;

/// Per-tab refresh coordinator.
///
/// The refresh itself runs as a spawned task, so a caller that stops waiting (dropped future,
/// aborted task, elapsed `select!` arm) never cancels the refresh for the callers queued
/// behind it. [`refresh_access_token`](Self::refresh_access_token) must therefore be called
/// from within a Tokio runtime.
pub struct RefreshCoordinator<C>
where
	C: ?Sized + HttpTransport,
{
	inner: Arc<Inner<C>>,
}
impl<C> RefreshCoordinator<C>
where
	C: ?Sized + HttpTransport,
{
	/// Creates a coordinator for a freshly generated tab.
	pub fn with_transport(
		config: CoordinatorConfig,
		slots: Arc<dyn SlotStore>,
		channel: Arc<dyn BroadcastChannel>,
		transport: impl Into<Arc<C>>,
	) -> Self {
		Self::new_in_tab(TabId::generate(), config, slots, channel, transport)
	}

	/// Creates a coordinator acting for `tab`.
	///
	/// Every tab sharing credentials must use the same `slots` and `channel`.
	pub fn new_in_tab(
		tab: TabId,
		config: CoordinatorConfig,
		slots: Arc<dyn SlotStore>,
		channel: Arc<dyn BroadcastChannel>,
		transport: impl Into<Arc<C>>,
	) -> Self {
		let keys = &config.keys;
		let tokens = TokenStore::new(slots.clone(), keys.clone(), config.cooldown);
		let lock = StorageLock::new(slots.clone(), keys.lock.clone(), tab.clone());
		let signal = CrossTabSignal::new(slots, channel, keys.event.clone(), tab);

		Self {
			inner: Arc::new(Inner {
				config: Arc::new(config),
				transport: transport.into(),
				tokens: Arc::new(tokens),
				lock: Arc::new(lock),
				signal: Arc::new(signal),
				metrics: Default::default(),
				flight: Mutex::new(FlightState::default()),
			}),
		}
	}

	/// Replaces the cross-tab lock (e.g. with a backend offering stronger exclusion).
	///
	/// Intended for construction time; the returned coordinator starts with an empty queue.
	pub fn with_lock(self, lock: Arc<dyn DistributedLock>) -> Self {
		let inner = &self.inner;

		Self {
			inner: Arc::new(Inner {
				config: inner.config.clone(),
				transport: inner.transport.clone(),
				tokens: inner.tokens.clone(),
				lock,
				signal: inner.signal.clone(),
				metrics: inner.metrics.clone(),
				flight: Mutex::new(FlightState::default()),
			}),
		}
	}

	/// Configuration in use.
	pub fn config(&self) -> &CoordinatorConfig {
		&self.inner.config
	}

	/// Token store for this tab.
	pub fn tokens(&self) -> &Arc<TokenStore> {
		&self.inner.tokens
	}

	/// Transport used for the refresh call.
	pub fn transport(&self) -> &Arc<C> {
		&self.inner.transport
	}

	/// Refresh counters for this tab.
	pub fn metrics(&self) -> &Arc<RefreshMetrics> {
		&self.inner.metrics
	}

	/// Identifier of this tab.
	pub fn tab(&self) -> &TabId {
		self.inner.signal.tab()
	}

	/// Returns `true` while a refresh is in flight in this tab.
	pub fn is_refreshing(&self) -> bool {
		self.inner.flight.lock().in_flight
	}

	/// Obtains a new access token.
	///
	/// Concurrent callers share one refresh: the first caller starts it (or the wait on another
	/// tab), every caller is queued for its outcome, and all receive the same result in arrival
	/// order.
	pub async fn refresh_access_token(&self) -> Result<TokenSecret, RefreshError> {
		let (rx, lead) = {
			let mut flight = self.inner.flight.lock();
			let (tx, rx) = oneshot::channel();
			let lead = !flight.in_flight;

			flight.in_flight = true;
			flight.waiters.push(tx);

			(rx, lead)
		};

		if lead {
			let inner = self.inner.clone();

			tokio::spawn(async move { inner.lead().await });
		} else {
			self.inner.metrics.record_queued();
		}

		rx.await.unwrap_or(Err(RefreshError::Abandoned))
	}
}
#[cfg(feature = "reqwest")]
impl RefreshCoordinator<ReqwestHttpClient> {
	/// Creates a coordinator with a cookie-enabled reqwest transport.
	pub fn new(
		config: CoordinatorConfig,
		slots: Arc<dyn SlotStore>,
		channel: Arc<dyn BroadcastChannel>,
	) -> Result<Self> {
		let transport = ReqwestHttpClient::with_credentials()?;

		Ok(Self::with_transport(config, slots, channel, transport))
	}
}
impl<C> Debug for RefreshCoordinator<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("tab", self.tab())
			.field("refresh_endpoint", &self.inner.config.refresh_endpoint.as_str())
			.field("in_flight", &self.is_refreshing())
			.finish_non_exhaustive()
	}
}

/// State shared between the coordinator handle and its spawned refresh task.
struct Inner<C>
where
	C: ?Sized + HttpTransport,
{
	config: Arc<CoordinatorConfig>,
	transport: Arc<C>,
	tokens: Arc<TokenStore>,
	lock: Arc<dyn DistributedLock>,
	signal: Arc<CrossTabSignal>,
	metrics: Arc<RefreshMetrics>,
	flight: Mutex<FlightState>,
}
impl<C> Inner<C>
where
	C: ?Sized + HttpTransport,
{
	async fn lead(&self) {
		const KIND: FlowKind = FlowKind::Refresh;

		let mut leader = Leader { flight: &self.flight, settled: false };
		let span = FlowSpan::new(KIND, "refresh_access_token");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.resolve_token()).await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));
		leader.settle(&result);
	}

	async fn resolve_token(&self) -> Result<TokenSecret, RefreshError> {
		let events = self.signal.subscribe();
		let acquired =
			!self.lock.is_held_by_other()? && self.lock.try_acquire(self.config.lock_ttl)?;

		if !acquired {
			let waited =
				self.signal.wait_for_result(events, &self.tokens, self.config.cross_tab_wait).await;

			if matches!(waited, Err(RefreshError::CrossTabFailure { .. })) {
				// The owner may have cleared the shared session.
				self.tokens.reload();
			}

			return waited;
		}

		let held = HeldLock { owner: self, finished: false };

		self.refresh_owned(held).await
	}

	async fn refresh_owned(&self, held: HeldLock<'_, C>) -> Result<TokenSecret, RefreshError> {
		let outcome = self.run_attempts().await;

		match outcome {
			Ok(pair) => {
				let refresh = pair.refresh.as_ref().map(TokenSecret::expose);

				if let Err(e) = self.tokens.set_tokens(pair.access.expose(), refresh) {
					obs::warn_storage_degraded("set", &self.config.keys.access, &e);
				}

				self.metrics.record_success();
				held.finish(RefreshStatus::Success, Some(&pair.access));

				Ok(pair.access)
			},
			Err(err) => {
				self.metrics.record_failure();

				if err.is_definitive() {
					obs::warn_session_cleared(&err);

					if let Err(e) = self.tokens.clear_tokens() {
						obs::warn_storage_degraded("remove", &self.config.keys.access, &e);
					}
				} else {
					self.tokens.activate_cooldown();
				}

				held.finish(RefreshStatus::Failure, None);

				Err(err)
			},
		}
	}

	async fn run_attempts(&self) -> Result<TokenPair, RefreshError> {
		let policy = &self.config.retry;
		let mut attempt = 0;

		loop {
			attempt += 1;

			self.metrics.record_attempt();

			match self.attempt_refresh().await {
				Ok(pair) => return Ok(pair),
				Err(err) if policy.should_retry(attempt, &err) => {
					obs::warn_attempt_failed(attempt, &err);

					tokio::time::sleep(std_duration(policy.delay_after(attempt))).await;
				},
				Err(err) => return Err(err),
			}
		}
	}

	async fn attempt_refresh(&self) -> Result<TokenPair, RefreshError> {
		let refresh = self.tokens.get_refresh_token();
		let request = self.refresh_request(refresh.as_ref());
		let limit = self.config.refresh_timeout;
		let response =
			match tokio::time::timeout(std_duration(limit), self.transport.send(request)).await {
				Ok(Ok(response)) => response,
				Ok(Err(e)) => return Err(classify(&FailureContext::from_transport(&e))),
				Err(_) => return Err(classify(&FailureContext::timeout(limit))),
			};

		if !response.is_success() {
			return Err(classify(&FailureContext::from_response(&response)));
		}

		let mut pair = response
			.json_value()
			.and_then(|payload| self.config.extractor.extract(&payload))
			.ok_or(RefreshError::MissingAccessToken)?;

		if pair.refresh.is_none() {
			pair.refresh = refresh;
		}

		Ok(pair)
	}

	fn refresh_request(&self, refresh: Option<&TokenSecret>) -> ApiRequest {
		let mut request = ApiRequest::post(self.config.refresh_endpoint.clone())
			.with_timeout(self.config.refresh_timeout);
		let Some(refresh) = refresh else {
			// Cookie-based session; the transport supplies credentials.
			return request.with_json(&json!({}));
		};

		if let Some(value) = sensitive_value(refresh.expose()) {
			request.headers.insert(HeaderName::from_static(REFRESH_TOKEN_HEADER), value);
			request.set_bearer_token(refresh);
		}

		request.with_json(&json!({ "refreshToken": refresh.expose() }))
	}

	fn release_lock(&self) {
		if let Err(e) = self.lock.release() {
			obs::warn_storage_degraded("release", &self.config.keys.lock, &e);
		}
	}

	fn broadcast(&self, status: RefreshStatus, token: Option<&TokenSecret>) {
		if let Err(e) = self.signal.publish(status, token) {
			obs::warn_storage_degraded("publish", &self.config.keys.event, &e);
		}
	}
}

#[derive(Debug, Default)]
struct FlightState {
	in_flight: bool,
	waiters: Vec<oneshot::Sender<Settlement>>,
}

/// Settles the queue exactly once, even when the refresh task is torn down mid-refresh.
struct Leader<'a> {
	flight: &'a Mutex<FlightState>,
	settled: bool,
}
impl Leader<'_> {
	fn settle(&mut self, result: &Settlement) {
		self.settled = true;

		let waiters = {
			let mut flight = self.flight.lock();

			flight.in_flight = false;

			std::mem::take(&mut flight.waiters)
		};

		for waiter in waiters {
			let _ = waiter.send(result.clone());
		}
	}
}
impl Drop for Leader<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.settle(&Err(RefreshError::Abandoned));
		}
	}
}

/// Cross-tab lock held by this tab.
///
/// The lock is released before the outcome is published: waiting tabs subscribe before they
/// inspect the lock, so they still observe the event. Dropping the guard without
/// [`finish`](Self::finish) publishes a failure so waiting tabs do not sit out their timeout.
struct HeldLock<'a, C>
where
	C: ?Sized + HttpTransport,
{
	owner: &'a Inner<C>,
	finished: bool,
}
impl<C> HeldLock<'_, C>
where
	C: ?Sized + HttpTransport,
{
	fn finish(mut self, status: RefreshStatus, token: Option<&TokenSecret>) {
		self.finished = true;
		self.owner.release_lock();
		self.owner.broadcast(status, token);
	}
}
impl<C> Drop for HeldLock<'_, C>
where
	C: ?Sized + HttpTransport,
{
	fn drop(&mut self) {
		if !self.finished {
			self.owner.release_lock();
			self.owner.broadcast(RefreshStatus::Failure, None);
		}
	}
}
