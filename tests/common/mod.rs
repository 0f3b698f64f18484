//! Scripted transport and tab fixtures shared by the integration tests.

#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use bearer_session::{
	auth::TabId,
	config::CoordinatorConfig,
	cross_tab::{BroadcastChannel, MemoryChannel},
	error::TransportError,
	http::{ApiRequest, ApiResponse, HttpTransport, TransportFuture},
	refresh::{Backoff, RefreshCoordinator, RetryPolicy},
	store::{MemoryStore, SlotStore},
};
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::Value;
use time::Duration;

pub const BASE_URL: &str = "https://api.example.com/v1/";

type Handler = dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync;

/// Transport answering every request through a handler, recording what it saw.
///
/// Refresh calls can be delayed so concurrent callers pile up behind the first one.
pub struct FakeTransport {
	handler: Box<Handler>,
	refresh_delay: Option<std::time::Duration>,
	requests: Mutex<Vec<ApiRequest>>,
}
impl FakeTransport {
	pub fn new<F>(handler: F) -> Self
	where
		F: 'static + Fn(&ApiRequest) -> ApiResponse + Send + Sync,
	{
		Self { handler: Box::new(handler), refresh_delay: None, requests: Mutex::new(Vec::new()) }
	}

	/// Transport that fails the test if anything is sent.
	pub fn unreachable() -> Self {
		Self::new(|request| panic!("Unexpected request to {}.", request.url))
	}

	pub fn with_refresh_delay(mut self, delay: std::time::Duration) -> Self {
		self.refresh_delay = Some(delay);

		self
	}

	pub fn requests(&self) -> Vec<ApiRequest> {
		self.requests.lock().clone()
	}

	pub fn refresh_requests(&self) -> Vec<ApiRequest> {
		self.requests().into_iter().filter(is_refresh).collect()
	}

	pub fn refresh_calls(&self) -> usize {
		self.refresh_requests().len()
	}

	pub fn api_requests(&self) -> Vec<ApiRequest> {
		self.requests().into_iter().filter(|request| !is_refresh(request)).collect()
	}
}
impl HttpTransport for FakeTransport {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_, ApiResponse> {
		Box::pin(async move {
			self.requests.lock().push(request.clone());

			if let Some(delay) = self.refresh_delay.filter(|_| is_refresh(&request)) {
				tokio::time::sleep(delay).await;
			}

			Ok::<_, TransportError>((self.handler)(&request))
		})
	}
}

pub fn is_refresh(request: &ApiRequest) -> bool {
	request.url.path().ends_with("/auth/refresh")
}

pub fn respond(status: StatusCode, body: Value) -> ApiResponse {
	ApiResponse::new(status).with_json(&body)
}

pub fn tab(id: &str) -> TabId {
	TabId::new(id).expect("Tab identifier fixture should be valid.")
}

/// Defaults with millisecond backoff and a short cross-tab wait.
pub fn fast_config() -> CoordinatorConfig {
	CoordinatorConfig::builder(BASE_URL)
		.retry(RetryPolicy::default().with_backoff(Backoff::Linear(Duration::milliseconds(1))))
		.cross_tab_wait(Duration::seconds(2))
		.build()
		.expect("Test configuration should build.")
}

/// Slot store and broadcast channel shared by every tab of one profile.
#[derive(Clone, Default)]
pub struct Profile {
	pub slots: MemoryStore,
	pub channel: MemoryChannel,
}
impl Profile {
	pub fn tab_with(
		&self,
		id: &str,
		config: CoordinatorConfig,
		transport: Arc<FakeTransport>,
	) -> Arc<RefreshCoordinator<FakeTransport>> {
		let slots: Arc<dyn SlotStore> = Arc::new(self.slots.clone());
		let channel: Arc<dyn BroadcastChannel> = Arc::new(self.channel.clone());

		Arc::new(RefreshCoordinator::new_in_tab(tab(id), config, slots, channel, transport))
	}

	pub fn tab(
		&self,
		id: &str,
		transport: Arc<FakeTransport>,
	) -> Arc<RefreshCoordinator<FakeTransport>> {
		self.tab_with(id, fast_config(), transport)
	}

	pub fn slot(&self, key: &str) -> Option<String> {
		self.slots.get(key).expect("Memory slot reads should succeed.")
	}
}
