//! Coordinator configuration: endpoints, timing, retry policy, and storage slot names.

// std
use std::collections::HashSet;
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	refresh::{RetryPolicy, TokenExtractor},
};

/// Storage slot names for tokens, the cross-tab lock, and the broadcast slot.
///
/// Token roles list a canonical slot first, followed by legacy slots that are still read (and
/// migrated) for compatibility with older builds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageKeys {
	/// Canonical access token slot.
	pub access: String,
	/// Legacy access token slots, newest first.
	pub legacy_access: Vec<String>,
	/// Canonical refresh token slot.
	pub refresh: String,
	/// Legacy refresh token slots, newest first.
	pub legacy_refresh: Vec<String>,
	/// Cross-tab refresh lock slot.
	pub lock: String,
	/// Cross-tab refresh outcome slot.
	pub event: String,
}
impl StorageKeys {
	/// Access slots in read order (canonical first).
	pub fn access_slots(&self) -> impl Iterator<Item = &str> {
		std::iter::once(self.access.as_str()).chain(self.legacy_access.iter().map(String::as_str))
	}

	/// Refresh slots in read order (canonical first).
	pub fn refresh_slots(&self) -> impl Iterator<Item = &str> {
		std::iter::once(self.refresh.as_str()).chain(self.legacy_refresh.iter().map(String::as_str))
	}

	/// Rejects blank slot names and slots shared by two roles.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let named = [
			("access", self.access.as_str()),
			("refresh", self.refresh.as_str()),
			("lock", self.lock.as_str()),
			("event", self.event.as_str()),
		];

		for (slot, key) in named {
			if key.trim().is_empty() {
				return Err(ConfigError::BlankStorageKey { slot });
			}
		}

		let mut seen = HashSet::new();
		let all = self
			.access_slots()
			.chain(self.refresh_slots())
			.chain([self.lock.as_str(), self.event.as_str()]);

		for key in all {
			if key.trim().is_empty() {
				return Err(ConfigError::BlankStorageKey { slot: "legacy" });
			}
			if !seen.insert(key) {
				return Err(ConfigError::DuplicateStorageKey { key: key.to_owned() });
			}
		}

		Ok(())
	}
}
impl Default for StorageKeys {
	fn default() -> Self {
		Self {
			access: "auth.access_token".into(),
			legacy_access: vec!["accessToken".into(), "token".into()],
			refresh: "auth.refresh_token".into(),
			legacy_refresh: vec!["refreshToken".into(), "refresh_token".into()],
			lock: "auth.refresh_lock".into(),
			event: "auth.refresh_event".into(),
		}
	}
}

/// Validated configuration shared by the coordinator and the request pipeline.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
	/// API base URL; application request paths resolve against it.
	pub base_url: Url,
	/// Absolute refresh endpoint (`<base>/auth/refresh` unless overridden).
	pub refresh_endpoint: Url,
	/// Path fragments marking authentication endpoints, which never trigger a refresh.
	pub auth_path_prefixes: Vec<String>,
	/// Timeout applied to each refresh call.
	pub refresh_timeout: Duration,
	/// Lifetime of the cross-tab lock.
	pub lock_ttl: Duration,
	/// Length of the failure cooldown.
	pub cooldown: Duration,
	/// How long a tab waits for a peer's refresh outcome.
	pub cross_tab_wait: Duration,
	/// Retry policy for refresh attempts.
	pub retry: RetryPolicy,
	/// Token extractor for refresh responses.
	pub extractor: TokenExtractor,
	/// Storage slot names.
	pub keys: StorageKeys,
}
impl CoordinatorConfig {
	/// Default refresh path relative to the base URL.
	pub const DEFAULT_REFRESH_PATH: &'static str = "auth/refresh";
	/// Default per-call refresh timeout.
	pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::seconds(12);
	/// Default cross-tab lock lifetime.
	pub const DEFAULT_LOCK_TTL: Duration = Duration::seconds(15);
	/// Default failure cooldown.
	pub const DEFAULT_COOLDOWN: Duration = Duration::seconds(15);
	/// Default cross-tab wait.
	pub const DEFAULT_CROSS_TAB_WAIT: Duration = Duration::seconds(12);

	/// Starts a builder for the provided API base URL.
	pub fn builder(base_url: impl AsRef<str>) -> CoordinatorConfigBuilder {
		CoordinatorConfigBuilder::new(base_url)
	}

	/// Returns `true` when the URL targets an authentication endpoint.
	pub fn is_auth_endpoint(&self, url: &Url) -> bool {
		url == &self.refresh_endpoint
			|| self.auth_path_prefixes.iter().any(|prefix| url.path().contains(prefix.as_str()))
	}

	/// Resolves an application path against the base URL.
	pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
		self.base_url
			.join(path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidUrl { endpoint: "request", source })
	}
}

/// Builder for [`CoordinatorConfig`] values.
#[derive(Debug)]
pub struct CoordinatorConfigBuilder {
	base_url: String,
	refresh_path: String,
	auth_path_prefixes: Vec<String>,
	refresh_timeout: Duration,
	lock_ttl: Duration,
	cooldown: Duration,
	cross_tab_wait: Duration,
	retry: RetryPolicy,
	extractor: TokenExtractor,
	keys: StorageKeys,
}
impl CoordinatorConfigBuilder {
	/// Creates a builder with default timing, retry, extraction, and slot settings.
	pub fn new(base_url: impl AsRef<str>) -> Self {
		Self {
			base_url: base_url.as_ref().to_owned(),
			refresh_path: CoordinatorConfig::DEFAULT_REFRESH_PATH.into(),
			auth_path_prefixes: vec!["/auth/".into()],
			refresh_timeout: CoordinatorConfig::DEFAULT_REFRESH_TIMEOUT,
			lock_ttl: CoordinatorConfig::DEFAULT_LOCK_TTL,
			cooldown: CoordinatorConfig::DEFAULT_COOLDOWN,
			cross_tab_wait: CoordinatorConfig::DEFAULT_CROSS_TAB_WAIT,
			retry: RetryPolicy::default(),
			extractor: TokenExtractor::default(),
			keys: StorageKeys::default(),
		}
	}

	/// Overrides the refresh path, relative to the base URL.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}

	/// Replaces the authentication path fragments.
	pub fn auth_path_prefixes<I, S>(mut self, prefixes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.auth_path_prefixes = prefixes.into_iter().map(Into::into).collect();

		self
	}

	/// Overrides the per-call refresh timeout.
	pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
		self.refresh_timeout = timeout;

		self
	}

	/// Overrides the cross-tab lock lifetime.
	pub fn lock_ttl(mut self, ttl: Duration) -> Self {
		self.lock_ttl = ttl;

		self
	}

	/// Overrides the failure cooldown.
	pub fn cooldown(mut self, cooldown: Duration) -> Self {
		self.cooldown = cooldown;

		self
	}

	/// Overrides the cross-tab wait.
	pub fn cross_tab_wait(mut self, wait: Duration) -> Self {
		self.cross_tab_wait = wait;

		self
	}

	/// Overrides the retry policy.
	pub fn retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Overrides the token extractor.
	pub fn extractor(mut self, extractor: TokenExtractor) -> Self {
		self.extractor = extractor;

		self
	}

	/// Overrides the storage slot names.
	pub fn keys(mut self, keys: StorageKeys) -> Self {
		self.keys = keys;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
		let mut base_url = Url::parse(&self.base_url)
			.map_err(|source| ConfigError::InvalidUrl { endpoint: "base", source })?;

		if base_url.cannot_be_a_base() {
			return Err(ConfigError::CannotBeABase { url: self.base_url });
		}
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());

			base_url.set_path(&path);
		}

		let refresh_endpoint = base_url
			.join(self.refresh_path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidUrl { endpoint: "refresh", source })?;
		let durations = [
			("refresh timeout", self.refresh_timeout),
			("lock TTL", self.lock_ttl),
			("cooldown", self.cooldown),
			("cross-tab wait", self.cross_tab_wait),
		];

		for (setting, duration) in durations {
			if !duration.is_positive() {
				return Err(ConfigError::NonPositiveDuration { setting });
			}
		}
		if self.retry.max_attempts() == 0 {
			return Err(ConfigError::ZeroAttempts);
		}
		if self.extractor.access_fields.is_empty() {
			return Err(ConfigError::EmptyAccessFields);
		}

		self.keys.validate()?;

		Ok(CoordinatorConfig {
			base_url,
			refresh_endpoint,
			auth_path_prefixes: self.auth_path_prefixes,
			refresh_timeout: self.refresh_timeout,
			lock_ttl: self.lock_ttl,
			cooldown: self.cooldown,
			cross_tab_wait: self.cross_tab_wait,
			retry: self.retry,
			extractor: self.extractor,
			keys: self.keys,
		})
	}
}
