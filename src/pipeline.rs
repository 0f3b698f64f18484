//! Request pipeline attaching the bearer token and recovering from 401s with one refresh.

pub mod friendly;

// crates.io
use http::{Method, StatusCode};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	http::{ApiRequest, ApiResponse, HttpTransport},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	refresh::RefreshCoordinator,
	tokens::TokenStore,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

#[cfg(feature = "reqwest")]
/// Pipeline specialized for the crate's default reqwest transport.
pub type ReqwestPipeline = RequestPipeline<ReqwestHttpClient>;

/// Sends application requests through the coordinator's transport.
///
/// Every request carries the current access token. A 401 from a non-auth endpoint is answered
/// with one refresh (shared with any concurrent 401s in the tab) and one resend; refresh errors
/// surface unchanged. Other non-success responses become [`Error::Api`] with a user-facing
/// message.
pub struct RequestPipeline<C>
where
	C: ?Sized + HttpTransport,
{
	coordinator: Arc<RefreshCoordinator<C>>,
}
impl<C> RequestPipeline<C>
where
	C: ?Sized + HttpTransport,
{
	/// Creates a pipeline over the provided coordinator.
	pub fn new(coordinator: Arc<RefreshCoordinator<C>>) -> Self {
		Self { coordinator }
	}

	/// Coordinator used for refreshes.
	pub fn coordinator(&self) -> &Arc<RefreshCoordinator<C>> {
		&self.coordinator
	}

	fn tokens(&self) -> &TokenStore {
		self.coordinator.tokens()
	}

	/// Builds a request for `path` relative to the API base URL.
	pub fn request(&self, method: Method, path: &str) -> Result<ApiRequest> {
		Ok(ApiRequest::new(method, self.coordinator.config().endpoint(path)?))
	}

	/// Sends `GET <base>/<path>`.
	pub async fn get(&self, path: &str) -> Result<ApiResponse> {
		self.send(self.request(Method::GET, path)?).await
	}

	/// Sends `POST <base>/<path>` with a JSON body.
	pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<ApiResponse> {
		self.send(self.request(Method::POST, path)?.with_json(body)).await
	}

	/// Sends the request and applies both interceptors.
	pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
		self.intercept_request(&mut request);

		let response = self.coordinator.transport().send(request.clone()).await?;

		self.intercept_response(request, response).await
	}

	/// Attaches `Authorization: Bearer <access>`, or removes the header when no token exists.
	pub fn intercept_request(&self, request: &mut ApiRequest) {
		match self.tokens().get_access_token() {
			Some(token) => {
				request.set_bearer_token(&token);
			},
			None => request.clear_bearer_token(),
		}
	}

	/// Resolves a response to the request that produced it.
	///
	/// `request` must be the request as sent, so the token it carried can be compared with the
	/// current one.
	pub async fn intercept_response(
		&self,
		request: ApiRequest,
		response: ApiResponse,
	) -> Result<ApiResponse> {
		if response.is_success() {
			return Ok(response);
		}
		if response.status != StatusCode::UNAUTHORIZED || !self.may_refresh(&request) {
			return Err(self.reject(&request, &response));
		}

		let token = match self.tokens().get_access_token() {
			// Sent with a token that has since been replaced; no refresh needed.
			Some(current) if request.bearer_token() != Some(current.expose()) => current,
			_ => self.coordinator.refresh_access_token().await?,
		};

		self.resend(request, &token).await
	}

	/// Returns `true` when a 401 for this request may trigger a refresh.
	pub fn may_refresh(&self, request: &ApiRequest) -> bool {
		!request.retried
			&& !self.coordinator.config().is_auth_endpoint(&request.url)
			&& self.tokens().has_any_token()
			&& !self.tokens().is_cooldown_active()
	}

	async fn resend(&self, mut request: ApiRequest, token: &TokenSecret) -> Result<ApiResponse> {
		const KIND: FlowKind = FlowKind::RequestRetry;

		let span = FlowSpan::new(KIND, "resend");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		request.retried = true;
		request.set_bearer_token(token);

		let result = span
			.instrument(async {
				let response = self.coordinator.transport().send(request.clone()).await?;

				if response.is_success() { Ok(response) } else { Err(self.reject(&request, &response)) }
			})
			.await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	fn reject(&self, request: &ApiRequest, response: &ApiResponse) -> Error {
		let auth_endpoint = self.coordinator.config().is_auth_endpoint(&request.url);

		friendly::api_error(response, auth_endpoint).into()
	}
}
impl<C> Clone for RequestPipeline<C>
where
	C: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self { coordinator: self.coordinator.clone() }
	}
}
impl<C> Debug for RequestPipeline<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestPipeline").field("coordinator", &self.coordinator).finish()
	}
}
