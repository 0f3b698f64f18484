mod common;

// std
use std::{sync::Arc, time::Duration as StdDuration};
// crates.io
use bearer_session::{
	auth::TokenSecret,
	error::{Error, RefreshError},
	http::{ApiRequest, HttpTransport},
	pipeline::RequestPipeline,
};
use http::{HeaderValue, Method, StatusCode, header::RETRY_AFTER};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinSet;
// self
use common::{FakeTransport, Profile, is_refresh, respond};

/// Backend accepting only `valid` as bearer token and rotating to `fresh` on refresh.
fn backend(valid: &'static str, fresh: &'static str) -> FakeTransport {
	let current = Arc::new(Mutex::new(valid));

	FakeTransport::new(move |request| {
		if is_refresh(request) {
			*current.lock() = fresh;

			return respond(StatusCode::OK, json!({ "data": { "token": fresh } }));
		}

		let expected = format!("Bearer {}", *current.lock());

		match request.headers.get(http::header::AUTHORIZATION) {
			Some(value) if value.as_bytes() == expected.as_bytes() =>
				respond(StatusCode::OK, json!({ "id": 7 })),
			_ => respond(StatusCode::UNAUTHORIZED, json!({ "message": "jwt expired" })),
		}
	})
}

fn pipeline(profile: &Profile, transport: Arc<FakeTransport>) -> RequestPipeline<FakeTransport> {
	RequestPipeline::new(profile.tab("tab-a", transport))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unauthorized_requests_trigger_one_refresh() {
	let profile = Profile::default();
	let transport =
		Arc::new(backend("never", "fresh").with_refresh_delay(StdDuration::from_millis(150)));
	let pipeline = pipeline(&profile, transport.clone());

	pipeline.coordinator().tokens().set_tokens("stale", Some("r1")).expect("Seeding should work.");

	let mut requests = JoinSet::new();

	for _ in 0..6 {
		let pipeline = pipeline.clone();

		requests.spawn(async move { pipeline.get("users/me").await });
	}

	while let Some(joined) = requests.join_next().await {
		let response = joined
			.expect("Request task should not panic.")
			.expect("Every request should succeed after the refresh.");

		assert_eq!(response.status, StatusCode::OK);
	}

	let retried: Vec<ApiRequest> =
		transport.api_requests().into_iter().filter(|request| request.retried).collect();

	assert_eq!(transport.refresh_calls(), 1);
	assert_eq!(retried.len(), 6);
	assert!(retried.iter().all(|request| request.bearer_token() == Some("fresh")));
}

#[tokio::test]
async fn requests_carry_the_current_token_or_none() {
	let profile = Profile::default();
	let transport = Arc::new(backend("access", "fresh"));
	let pipeline = pipeline(&profile, transport.clone());
	let err = pipeline.get("users/me").await.expect_err("Anonymous request should be rejected.");

	// Without tokens a 401 is surfaced as-is: nothing to refresh.
	assert!(matches!(&err, Error::Api(api) if api.status == 401));
	assert_eq!(transport.refresh_calls(), 0);

	pipeline.coordinator().tokens().set_tokens("access", Some("r1")).expect("Seeding should work.");

	let response = pipeline.get("users/me").await.expect("Authorized request should succeed.");
	let sent = transport.api_requests();

	assert_eq!(response.json_value(), Some(json!({ "id": 7 })));
	assert_eq!(sent[0].bearer_token(), None);
	assert_eq!(sent[1].bearer_token(), Some("access"));
	assert_eq!(sent[1].url.as_str(), "https://api.example.com/v1/users/me");
}

#[tokio::test]
async fn failed_refresh_opens_cooldown_until_new_tokens_arrive() {
	let profile = Profile::default();
	let transport = Arc::new(FakeTransport::new(|request| {
		if is_refresh(request) {
			respond(StatusCode::BAD_GATEWAY, json!({ "message": "upstream down" }))
		} else {
			respond(StatusCode::UNAUTHORIZED, json!({ "message": "jwt expired" }))
		}
	}));
	let pipeline = pipeline(&profile, transport.clone());
	let tokens = pipeline.coordinator().tokens().clone();

	tokens.set_tokens("a", Some("r")).expect("Seeding should work.");

	let err = pipeline.get("users/me").await.expect_err("Refresh failure should surface.");

	assert!(matches!(err, Error::Refresh(RefreshError::Transient { status: Some(502), .. })));
	assert_eq!(transport.refresh_calls(), 3);

	let err = pipeline.get("users/me").await.expect_err("Cooldown should suppress the refresh.");

	match err {
		Error::Api(api) => {
			assert_eq!(api.status, 401);
			assert_eq!(api.message, "Your session has expired. Please sign in again.");
		},
		other => panic!("Expected an API error, got {other:?}."),
	}

	assert_eq!(transport.refresh_calls(), 3);

	tokens.set_tokens("b", Some("r")).expect("New login should be stored.");

	let _ = pipeline.get("users/me").await;

	assert_eq!(transport.refresh_calls(), 6);
}

#[tokio::test]
async fn definitive_refresh_failure_propagates_untouched() {
	let profile = Profile::default();
	let transport = Arc::new(FakeTransport::new(|request| {
		if is_refresh(request) {
			respond(StatusCode::UNAUTHORIZED, json!({ "message": "refresh token revoked" }))
		} else {
			respond(StatusCode::UNAUTHORIZED, json!({}))
		}
	}));
	let pipeline = pipeline(&profile, transport.clone());

	pipeline.coordinator().tokens().set_tokens("a", Some("r")).expect("Seeding should work.");

	let err = pipeline.get("users/me").await.expect_err("Revoked session should fail.");

	assert!(err.is_definitive_refresh_failure());
	assert_eq!(err.status(), Some(401));
	assert_eq!(transport.refresh_calls(), 1);
	assert_eq!(transport.api_requests().len(), 1);
	assert!(!pipeline.coordinator().tokens().has_any_token());
}

#[tokio::test]
async fn auth_endpoints_never_trigger_a_refresh() {
	let profile = Profile::default();
	let transport = Arc::new(FakeTransport::new(|_| {
		respond(StatusCode::UNAUTHORIZED, json!({ "message": "Invalid credentials" }))
	}));
	let pipeline = pipeline(&profile, transport.clone());

	pipeline.coordinator().tokens().set_tokens("a", Some("r")).expect("Seeding should work.");

	let err = pipeline
		.post_json("auth/login", &json!({ "email": "a@example.com" }))
		.await
		.expect_err("Login failure should surface.");

	assert!(matches!(&err, Error::Api(api) if api.message == "Invalid credentials"));
	assert_eq!(transport.refresh_calls(), 0);
}

#[tokio::test]
async fn stale_token_is_retried_with_the_current_one_without_refreshing() {
	let profile = Profile::default();
	let transport = Arc::new(backend("current", "unused"));
	let pipeline = pipeline(&profile, transport.clone());

	pipeline.coordinator().tokens().set_tokens("current", Some("r")).expect("Seeding should work.");

	let mut request =
		pipeline.request(Method::GET, "users/me").expect("Request should be built.");

	request.set_bearer_token(&TokenSecret::new("previous"));

	let response =
		transport.send(request.clone()).await.expect("Fake transport should answer.");
	let response = pipeline
		.intercept_response(request, response)
		.await
		.expect("Resend with the current token should succeed.");
	let resent = transport.api_requests().pop().expect("Resent request should be recorded.");

	assert_eq!(response.status, StatusCode::OK);
	assert_eq!(transport.refresh_calls(), 0);
	assert_eq!(resent.bearer_token(), Some("current"));
	assert!(resent.retried);
}

#[tokio::test]
async fn rate_limits_carry_a_wait_hint() {
	let profile = Profile::default();
	let transport = Arc::new(FakeTransport::new(|_| {
		respond(StatusCode::TOO_MANY_REQUESTS, json!({ "message": "slow down" }))
			.with_header(RETRY_AFTER, HeaderValue::from_static("5"))
	}));
	let pipeline = pipeline(&profile, transport.clone());
	let err = pipeline.get("users/me").await.expect_err("Rate limit should surface.");

	match err {
		Error::Api(api) => {
			assert_eq!(api.status, 429);
			assert!(api.message.contains("5 seconds"), "Unexpected message: {}.", api.message);
		},
		other => panic!("Expected an API error, got {other:?}."),
	}
}
