//! # Session Configuration Module
//!
//! Provides configuration management for the session layer.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `SessionConfig` holding every host bridge and tunable the session layer
//! needs. It enforces fail-fast validation so a missing bridge or a
//! contradictory setting is reported at startup, not on the first 401.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - Transport for API and refresh calls
//! - `SettingsStore` - Persistent storage for the credential pair
//!
//! ## Optional Dependencies
//!
//! - `Navigator` - Without it, the session layer logs the redirect target
//!   instead of navigating
//! - `Clock` - Defaults to the system clock
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SessionConfig;
//! use std::sync::Arc;
//!
//! let config = SessionConfig::builder()
//!     .api_base_url("https://api.example.com")
//!     .http_client(Arc::new(MyHttpClient))
//!     .storage(Arc::new(MyStorage))
//!     .navigator(Arc::new(MyNavigator))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::SessionConfig;
//!
//! // Missing HTTP client and storage
//! let config = SessionConfig::builder()
//!     .api_base_url("https://api.example.com")
//!     .build()
//!     .expect("Should fail - missing required bridges");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, Navigator, SettingsStore, SystemClock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Environment variable consulted for the API base URL.
pub const API_BASE_URL_ENV: &str = "SESSION_API_BASE_URL";

/// Base URL used when neither the builder nor the environment supplies one.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh-token/";
pub const DEFAULT_LOGIN_ROUTE: &str = "/auth/login/";
pub const DEFAULT_REGISTER_ROUTE: &str = "/auth/register/";
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Route prefixes of the protected areas of the application.
pub const DEFAULT_PROTECTED_PREFIXES: &[&str] = &[
    "/admin",
    "/service-provider-panel",
    "/local-expert",
    "/dashboard",
    "/help-me-decide",
];

/// Which requests the deduplication registry may collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupePolicy {
    /// Collapse GET, HEAD, PUT and DELETE; POST and PATCH always hit the network.
    #[default]
    IdempotentOnly,
    /// Collapse any identical request regardless of verb.
    AllMethods,
}

/// Storage keys used by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub profile: String,
    pub expiration_sentinel: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            access_token: "accessToken".to_string(),
            refresh_token: "refreshToken".to_string(),
            profile: "userData".to_string(),
            expiration_sentinel: "tokenExpired".to_string(),
        }
    }
}

impl StorageKeys {
    fn validate(&self) -> Result<()> {
        let keys = [
            &self.access_token,
            &self.refresh_token,
            &self.profile,
            &self.expiration_sentinel,
        ];
        if keys.iter().any(|key| key.trim().is_empty()) {
            return Err(Error::Config("Storage keys cannot be empty".to_string()));
        }
        let unique: HashSet<&String> = keys.iter().copied().collect();
        if unique.len() != keys.len() {
            return Err(Error::Config(
                "Storage keys must be distinct from each other".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the session layer.
///
/// Use [`SessionConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct SessionConfig {
    /// Base URL prepended to relative request paths
    pub api_base_url: String,

    /// Path of the refresh endpoint, relative to `api_base_url`
    pub refresh_path: String,

    /// URL fragments identifying the authentication surface (login, register,
    /// refresh). Responses from these never trigger refresh or logout.
    pub auth_routes: Vec<String>,

    /// Keys of the persisted session state
    pub storage_keys: StorageKeys,

    /// Login destination used by the redirect policy
    pub login_path: String,

    /// Route prefixes considered protected
    pub protected_prefixes: Vec<String>,

    /// How long a settled request stays in the deduplication registry
    pub dedupe_grace: Duration,

    /// Which verbs are eligible for deduplication
    pub dedupe_policy: DedupePolicy,

    /// Delay between logout and the redirect, so sign-out side effects flush
    pub redirect_delay: Duration,

    /// Upper bound on a single refresh call
    pub refresh_timeout: Duration,

    /// Whether a 401 whose body classifies as expired may still be recovered
    /// through a refresh
    pub refresh_on_expired_401: bool,

    /// Capacity of the session event bus
    pub event_buffer: usize,

    /// HTTP transport (required)
    pub http_client: Arc<dyn HttpClient>,

    /// Persistent storage shared across tabs (required)
    pub storage: Arc<dyn SettingsStore>,

    /// Host navigation (optional)
    pub navigator: Option<Arc<dyn Navigator>>,

    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("api_base_url", &self.api_base_url)
            .field("refresh_path", &self.refresh_path)
            .field("auth_routes", &self.auth_routes)
            .field("storage_keys", &self.storage_keys)
            .field("login_path", &self.login_path)
            .field("protected_prefixes", &self.protected_prefixes)
            .field("dedupe_grace", &self.dedupe_grace)
            .field("dedupe_policy", &self.dedupe_policy)
            .field("redirect_delay", &self.redirect_delay)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("refresh_on_expired_401", &self.refresh_on_expired_401)
            .field("event_buffer", &self.event_buffer)
            .field("http_client", &"HttpClient { ... }")
            .field("storage", &"SettingsStore { ... }")
            .field(
                "navigator",
                &self.navigator.as_ref().map(|_| "Navigator { ... }"),
            )
            .finish()
    }
}

impl SessionConfig {
    /// Creates a new builder for constructing a `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Absolute URL of the refresh endpoint.
    pub fn refresh_url(&self) -> String {
        format!(
            "{}{}",
            self.api_base_url.trim_end_matches('/'),
            self.refresh_path
        )
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The base URL is an absolute http(s) URL
    /// - The refresh path is absolute and part of the auth routes
    /// - Storage keys are non-empty and distinct
    /// - The login path is absolute
    /// - The event buffer is non-zero
    pub fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.api_base_url).map_err(|e| {
            Error::Config(format!(
                "Invalid API base URL '{}': {}",
                self.api_base_url, e
            ))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "API base URL must use http or https, got '{}'",
                base.scheme()
            )));
        }

        if !self.refresh_path.starts_with('/') {
            return Err(Error::Config(
                "Refresh path must start with '/'".to_string(),
            ));
        }

        if !self
            .auth_routes
            .iter()
            .any(|route| self.refresh_path.contains(route.as_str()))
        {
            return Err(Error::Config(
                "Refresh path must be listed in the auth routes, otherwise a failed refresh would trigger another refresh".to_string(),
            ));
        }

        if self.auth_routes.iter().any(|route| route.trim().is_empty()) {
            return Err(Error::Config("Auth routes cannot be empty".to_string()));
        }

        self.storage_keys.validate()?;

        if !self.login_path.starts_with('/') {
            return Err(Error::Config("Login path must start with '/'".to_string()));
        }

        if self.event_buffer == 0 {
            return Err(Error::Config(
                "Event buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for constructing [`SessionConfig`] instances.
#[derive(Default)]
pub struct SessionConfigBuilder {
    api_base_url: Option<String>,
    refresh_path: Option<String>,
    auth_routes: Option<Vec<String>>,
    storage_keys: Option<StorageKeys>,
    login_path: Option<String>,
    protected_prefixes: Option<Vec<String>>,
    dedupe_grace: Option<Duration>,
    dedupe_policy: DedupePolicy,
    redirect_delay: Option<Duration>,
    refresh_timeout: Option<Duration>,
    refresh_on_expired_401: Option<bool>,
    event_buffer: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    storage: Option<Arc<dyn SettingsStore>>,
    navigator: Option<Arc<dyn Navigator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionConfigBuilder {
    /// Sets the API base URL.
    ///
    /// When not set, `SESSION_API_BASE_URL` is read from the environment,
    /// falling back to `http://localhost:8000`.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::SessionConfig;
    ///
    /// let builder = SessionConfig::builder()
    ///     .api_base_url("https://api.example.com");
    /// ```
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Sets the refresh endpoint path (default `/auth/refresh-token/`).
    ///
    /// The path is added to the auth routes automatically.
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = Some(path.into());
        self
    }

    /// Replaces the auth route fragments (default login and register routes).
    pub fn auth_routes<I, S>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_routes = Some(routes.into_iter().map(Into::into).collect());
        self
    }

    pub fn storage_keys(mut self, keys: StorageKeys) -> Self {
        self.storage_keys = Some(keys);
        self
    }

    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = Some(path.into());
        self
    }

    pub fn protected_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected_prefixes = Some(prefixes.into_iter().map(Into::into).collect());
        self
    }

    pub fn dedupe_grace(mut self, grace: Duration) -> Self {
        self.dedupe_grace = Some(grace);
        self
    }

    pub fn dedupe_policy(mut self, policy: DedupePolicy) -> Self {
        self.dedupe_policy = policy;
        self
    }

    pub fn redirect_delay(mut self, delay: Duration) -> Self {
        self.redirect_delay = Some(delay);
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    pub fn refresh_on_expired_401(mut self, enabled: bool) -> Self {
        self.refresh_on_expired_401 = Some(enabled);
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }

    /// Sets the HTTP transport.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use core_runtime::config::SessionConfig;
    /// use std::sync::Arc;
    ///
    /// let builder = SessionConfig::builder()
    ///     .http_client(Arc::new(MyHttpClient));
    /// ```
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the persistent storage shared across tabs.
    pub fn storage(mut self, storage: Arc<dyn SettingsStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - `Error::CapabilityMissing` when the HTTP client or storage is absent
    /// - `Error::Config` when validation fails
    pub fn build(self) -> Result<SessionConfig> {
        let http_client = self.http_client.ok_or_else(|| Error::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: "No HTTP client provided. Desktop: use bridge_desktop::ReqwestHttpClient. \
                      Other hosts: inject a platform-native adapter."
                .to_string(),
        })?;

        let storage = self.storage.ok_or_else(|| Error::CapabilityMissing {
            capability: "SettingsStore".to_string(),
            message: "No persistent storage provided. It is required for credential persistence \
                      and cross-tab logout propagation."
                .to_string(),
        })?;

        let api_base_url = self.api_base_url.unwrap_or_else(|| {
            std::env::var(API_BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string())
        });

        let refresh_path = self
            .refresh_path
            .unwrap_or_else(|| DEFAULT_REFRESH_PATH.to_string());

        let mut auth_routes = self.auth_routes.unwrap_or_else(|| {
            vec![
                DEFAULT_LOGIN_ROUTE.to_string(),
                DEFAULT_REGISTER_ROUTE.to_string(),
            ]
        });
        if !auth_routes.contains(&refresh_path) {
            auth_routes.push(refresh_path.clone());
        }

        let config = SessionConfig {
            api_base_url,
            refresh_path,
            auth_routes,
            storage_keys: self.storage_keys.unwrap_or_default(),
            login_path: self
                .login_path
                .unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string()),
            protected_prefixes: self.protected_prefixes.unwrap_or_else(|| {
                DEFAULT_PROTECTED_PREFIXES
                    .iter()
                    .map(|prefix| prefix.to_string())
                    .collect()
            }),
            dedupe_grace: self.dedupe_grace.unwrap_or(Duration::from_millis(100)),
            dedupe_policy: self.dedupe_policy,
            redirect_delay: self.redirect_delay.unwrap_or(Duration::from_millis(100)),
            refresh_timeout: self.refresh_timeout.unwrap_or(Duration::from_secs(30)),
            refresh_on_expired_401: self.refresh_on_expired_401.unwrap_or(true),
            event_buffer: self.event_buffer.unwrap_or(100),
            http_client,
            storage,
            navigator: self.navigator,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
