//! Broadcast of refresh outcomes from the tab that refreshed to the tabs that waited.

// crates.io
use tokio::sync::broadcast::{self, error::RecvError};
// self
use crate::{
	_prelude::*,
	auth::{TabId, TokenSecret},
	cross_tab::unix_millis,
	error::RefreshError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::{SlotStore, StoreError, decode_slot, encode_slot},
	tokens::TokenStore,
};

const CHANNEL_CAPACITY: usize = 64;

/// Publish/subscribe transport shared by every tab.
pub trait BroadcastChannel
where
	Self: Send + Sync,
{
	/// Publishes a payload to every current subscriber of `topic`, including the publisher.
	fn publish(&self, topic: &str, payload: String) -> Result<(), StoreError>;

	/// Subscribes to payloads published on `topic` from now on.
	fn subscribe(&self, topic: &str) -> Subscription;
}

/// Receiving end of a [`BroadcastChannel`] topic.
#[derive(Debug)]
pub struct Subscription(broadcast::Receiver<String>);
impl Subscription {
	/// Wraps a tokio broadcast receiver.
	pub fn new(receiver: broadcast::Receiver<String>) -> Self {
		Self(receiver)
	}

	/// Next payload; `None` once the channel is closed.
	///
	/// Payloads dropped because the subscriber lagged are skipped.
	pub async fn recv(&mut self) -> Option<String> {
		loop {
			match self.0.recv().await {
				Ok(payload) => return Some(payload),
				Err(RecvError::Lagged(_)) => continue,
				Err(RecvError::Closed) => return None,
			}
		}
	}
}

/// In-process [`BroadcastChannel`]; clones share topics.
#[derive(Clone, Debug, Default)]
pub struct MemoryChannel(Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>);
impl MemoryChannel {
	fn sender(&self, topic: &str) -> broadcast::Sender<String> {
		self.0
			.lock()
			.entry(topic.to_owned())
			.or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
			.clone()
	}
}
impl BroadcastChannel for MemoryChannel {
	fn publish(&self, topic: &str, payload: String) -> Result<(), StoreError> {
		// No subscribers is not a failure.
		let _ = self.sender(topic).send(payload);

		Ok(())
	}

	fn subscribe(&self, topic: &str) -> Subscription {
		Subscription::new(self.sender(topic).subscribe())
	}
}

/// Outcome reported by the refreshing tab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
	/// A new access token was obtained.
	Success,
	/// The refresh failed.
	Failure,
}

/// Refresh outcome as written to the event slot and published on the channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshEvent {
	/// Outcome.
	pub status: RefreshStatus,
	/// New access token on success.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub access_token: Option<TokenSecret>,
	/// Tab that refreshed.
	pub owner: TabId,
	/// Publication instant.
	#[serde(with = "unix_millis")]
	pub ts: OffsetDateTime,
}

/// Cross-tab signal for one tab.
pub struct CrossTabSignal {
	slots: Arc<dyn SlotStore>,
	channel: Arc<dyn BroadcastChannel>,
	key: String,
	tab: TabId,
}
impl CrossTabSignal {
	/// Creates a signal for `tab` publishing under `key`.
	pub fn new(
		slots: Arc<dyn SlotStore>,
		channel: Arc<dyn BroadcastChannel>,
		key: impl Into<String>,
		tab: TabId,
	) -> Self {
		Self { slots, channel, key: key.into(), tab }
	}

	/// Tab this signal publishes for.
	pub fn tab(&self) -> &TabId {
		&self.tab
	}

	/// Writes the outcome to the event slot and publishes it.
	pub fn publish(
		&self,
		status: RefreshStatus,
		access_token: Option<&TokenSecret>,
	) -> Result<(), StoreError> {
		let event = RefreshEvent {
			status,
			access_token: access_token.cloned(),
			owner: self.tab.clone(),
			ts: OffsetDateTime::now_utc(),
		};
		let payload = encode_slot(&self.key, &event)?;

		self.slots.set(&self.key, &payload)?;
		self.channel.publish(&self.key, payload)
	}

	/// Subscribes to outcomes.
	///
	/// Subscribe before inspecting the lock so an outcome published in between is not missed.
	pub fn subscribe(&self) -> Subscription {
		self.channel.subscribe(&self.key)
	}

	/// Last outcome written to the event slot, if readable.
	pub fn last_event(&self) -> Result<Option<RefreshEvent>, StoreError> {
		self.slots.get(&self.key)?.map(|raw| decode_slot(&self.key, &raw)).transpose()
	}

	/// Waits for another tab's outcome.
	///
	/// On success the delivered token is installed in `tokens` and returned. Own broadcasts and
	/// unreadable payloads are skipped.
	pub async fn wait_for_result(
		&self,
		mut events: Subscription,
		tokens: &TokenStore,
		timeout: Duration,
	) -> Result<TokenSecret, RefreshError> {
		const KIND: FlowKind = FlowKind::CrossTabWait;

		let span = FlowSpan::new(KIND, "wait_for_result");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let wait = async {
			while let Some(payload) = events.recv().await {
				let event = match decode_slot::<RefreshEvent>(&self.key, &payload) {
					Ok(event) => event,
					Err(e) => {
						obs::warn_storage_degraded("decode", &self.key, &e);

						continue;
					},
				};

				if event.owner == self.tab {
					continue;
				}

				return self.settle(event, tokens);
			}

			Err(RefreshError::SignalClosed)
		};
		let result = span
			.instrument(tokio::time::timeout(std_duration(timeout), wait))
			.await
			.unwrap_or(Err(RefreshError::CrossTabTimeout { waited: timeout }));

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	fn settle(&self, event: RefreshEvent, tokens: &TokenStore) -> Result<TokenSecret, RefreshError> {
		match event.status {
			RefreshStatus::Success => {
				let token = event.access_token.ok_or(RefreshError::MissingAccessToken)?;

				tokens.adopt_access_token(&token).map_err(|e| match e {
					Error::Storage(e) => RefreshError::Storage(e),
					_ => RefreshError::MissingAccessToken,
				})?;

				// Adoption trims; hand out what was stored.
				Ok(tokens.get_access_token().unwrap_or(token))
			},
			RefreshStatus::Failure => Err(RefreshError::CrossTabFailure { owner: event.owner }),
		}
	}
}
impl Debug for CrossTabSignal {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CrossTabSignal").field("key", &self.key).field("tab", &self.tab).finish()
	}
}
