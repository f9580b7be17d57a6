//! Configuration for the iNaturalist client session.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Method;

use crate::credentials::{AccessToken, CredentialStore, EnvCredentials, SERVICE_NAME};
use crate::error::ConfigError;
use crate::paths;

/// API configuration constants.
pub mod api {
    use std::time::Duration;

    /// Base URL for the v1 REST API.
    pub const API_V1_BASE_URL: &str = "https://api.inaturalist.org/v1";

    /// Read timeout.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Connection timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Sustained requests per second.
    pub const REQUESTS_PER_SECOND: u32 = 1;

    /// Requests per minute (the documented API limit).
    pub const REQUESTS_PER_MINUTE: u32 = 60;

    /// Requests per day.
    pub const REQUESTS_PER_DAY: u32 = 10_000;

    /// Consecutive requests allowed before per-second limiting applies.
    pub const REQUEST_BURST_RATE: u32 = 5;

    /// Suggested cap on rate budget waits for long-running callers.
    pub const MAX_DELAY: Duration = Duration::from_secs(3600);

    /// Retry count when a caller opts into retries.
    pub const REQUEST_RETRIES: u32 = 5;

    /// Minimum backoff between opt-in retries.
    pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

    /// Default cache expiration for URLs without a specific rule (30 minutes).
    pub const CACHE_EXPIRATION: Duration = Duration::from_secs(30 * 60);

    /// Expiration for slow-changing reference data (1 week).
    pub const REFERENCE_DATA_EXPIRATION: Duration = Duration::from_secs(7 * 24 * 3600);

    /// Maximum entries held by the in-memory cache backend.
    pub const CACHE_MAX_SIZE: u64 = 1000;

    /// Period during which the CDN may serve a stale copy after an update.
    pub const REFRESH_PERIOD: Duration = Duration::from_secs(122);

    /// Default page size for paginated requests.
    pub const PER_PAGE_RESULTS: usize = 200;

    /// Result count above which a paginated query logs a bulk-export warning.
    pub const LARGE_REQUEST_WARNING: usize = 5000;

    /// Bulk export tool.
    pub const EXPORT_URL: &str = "https://www.inaturalist.org/observations/export";

    /// Maximum keepalive connections.
    pub const MAX_KEEPALIVE: usize = 10;

    /// Keepalive expiry.
    pub const KEEPALIVE_EXPIRY: Duration = Duration::from_secs(30);
}

/// Whether a method modifies remote state.
#[must_use]
pub fn is_write_method(method: &Method) -> bool {
    [Method::PATCH, Method::POST, Method::PUT, Method::DELETE].contains(method)
}

/// How long a response stays eligible for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Never expires
    Never,
    /// Expires after the given duration
    After(Duration),
    /// Not stored at all
    DoNotCache,
}

impl Expiration {
    /// Whether a response with this expiration should be stored.
    #[must_use]
    pub const fn is_storable(self) -> bool {
        match self {
            Self::Never => true,
            Self::After(d) => !d.is_zero(),
            Self::DoNotCache => false,
        }
    }
}

impl From<Duration> for Expiration {
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}

/// Expiration rule applied to URLs matching a regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlExpiration {
    /// Regex matched against the full request URL.
    pub pattern: String,
    /// Expiration for matching URLs.
    pub expiration: Expiration,
}

impl UrlExpiration {
    #[must_use]
    pub fn new(pattern: impl Into<String>, expiration: impl Into<Expiration>) -> Self {
        Self { pattern: pattern.into(), expiration: expiration.into() }
    }
}

/// Default per-URL expiration rules: reference data for a week.
#[must_use]
pub fn default_url_expirations() -> Vec<UrlExpiration> {
    ["controlled_terms", "places", "taxa"]
        .iter()
        .map(|resource| {
            UrlExpiration::new(
                format!(r"api\.inaturalist\.org/v\d+/{resource}"),
                api::REFERENCE_DATA_EXPIRATION,
            )
        })
        .collect()
}

/// Where cached responses are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendConfig {
    /// Process-local LRU cache.
    Memory {
        /// Maximum entries before eviction.
        max_entries: u64,
    },
    /// SQLite database file; persists across sessions.
    Sqlite {
        /// Database path.
        path: PathBuf,
    },
}

impl Default for CacheBackendConfig {
    fn default() -> Self {
        Self::Sqlite { path: paths::cache_file() }
    }
}

/// Request-rate limits. All windows must have budget for a request to proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Sustained requests per second.
    pub per_second: u32,
    /// Requests per minute.
    pub per_minute: u32,
    /// Requests per day.
    pub per_day: u32,
    /// Capacity of the per-second bucket.
    pub burst: u32,
    /// Track a separate budget for each host.
    pub per_host: bool,
    /// Fail instead of waiting longer than this. `None` waits for refill indefinitely.
    pub max_delay: Option<Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: api::REQUESTS_PER_SECOND,
            per_minute: api::REQUESTS_PER_MINUTE,
            per_day: api::REQUESTS_PER_DAY,
            burst: api::REQUEST_BURST_RATE,
            per_host: true,
            max_delay: None,
        }
    }
}

impl RateLimitConfig {
    /// Limits expressed per second only, with the given burst capacity.
    #[must_use]
    pub fn per_second(per_second: u32, burst: u32) -> Self {
        Self {
            per_second,
            per_minute: per_second.saturating_mul(60),
            per_day: per_second.saturating_mul(86_400),
            burst,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("per_second", self.per_second),
            ("per_minute", self.per_minute),
            ("per_day", self.per_day),
            ("burst", self.burst),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroRate { field });
            }
        }
        Ok(())
    }
}

/// Dry-run (test) mode: log requests instead of sending them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DryRun {
    /// Send all requests
    #[default]
    Off,
    /// Mock only write requests
    WriteOnly,
    /// Mock every request
    All,
}

impl DryRun {
    /// Build from the values of `DRY_RUN_ENABLED` and `DRY_RUN_WRITE_ONLY`.
    #[must_use]
    pub fn from_env_values(enabled: Option<&str>, write_only: Option<&str>) -> Self {
        if env_to_bool(enabled) {
            Self::All
        } else if env_to_bool(write_only) {
            Self::WriteOnly
        } else {
            Self::Off
        }
    }

    /// Whether a request with this method should be mocked.
    #[must_use]
    pub fn applies_to(self, method: &Method) -> bool {
        match self {
            Self::Off => false,
            Self::WriteOnly => is_write_method(method),
            Self::All => true,
        }
    }
}

/// Interpret an environment variable as a boolean.
///
/// Unset, empty, `"false"` and `"none"` (any case) are false.
#[must_use]
pub fn env_to_bool(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.is_empty() && !matches!(v.to_lowercase().as_str(), "false" | "none"))
}

/// Session configuration. Immutable once a session is built.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL for v1 API requests (overridable for mock servers).
    pub base_url: String,

    /// Serve and store responses from the cache.
    pub cache_enabled: bool,

    /// Expiration for URLs without a matching rule.
    pub cache_expiration: Expiration,

    /// Per-URL expiration rules; first match wins.
    pub url_expirations: Vec<UrlExpiration>,

    /// Cache storage.
    pub cache_backend: CacheBackendConfig,

    /// Rate limits.
    pub rate_limit: RateLimitConfig,

    /// Extra User-Agent info appended to the default.
    pub user_agent: Option<String>,

    /// Access token sent with every request (overridable per request).
    pub credentials: Option<AccessToken>,

    /// Read timeout.
    pub request_timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Automatic retries for transient failures. 0 leaves retries to the caller.
    pub retries: u32,

    /// Minimum backoff between retries.
    pub retry_backoff: Duration,

    /// Dry-run mode.
    pub dry_run: DryRun,

    /// When false, the session bypasses caching and rate limiting entirely.
    pub client_session_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: api::API_V1_BASE_URL.to_string(),
            cache_enabled: true,
            cache_expiration: Expiration::After(api::CACHE_EXPIRATION),
            url_expirations: default_url_expirations(),
            cache_backend: CacheBackendConfig::default(),
            rate_limit: RateLimitConfig::default(),
            user_agent: None,
            credentials: None,
            request_timeout: api::REQUEST_TIMEOUT,
            connect_timeout: api::CONNECT_TIMEOUT,
            retries: 0,
            retry_backoff: api::RETRY_BACKOFF,
            dry_run: DryRun::Off,
            client_session_enabled: true,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a test configuration pointing at a mock server.
    ///
    /// Caching and rate limiting are bypassed; call
    /// [`enable_client_session`](Self::enable_client_session) to exercise them.
    #[must_use]
    pub fn for_testing(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            cache_backend: CacheBackendConfig::Memory { max_entries: api::CACHE_MAX_SIZE },
            url_expirations: Vec::new(),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            client_session_enabled: false,
            ..Self::default()
        }
    }

    /// Re-enable real caching and rate limiting on a test configuration.
    #[must_use]
    pub fn enable_client_session(mut self) -> Self {
        self.client_session_enabled = true;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// Reads `INAT_API_BASE_URL`, `INAT_USER_AGENT`, `INAT_CACHE_FILE`,
    /// `INAT_ACCESS_TOKEN`, `DRY_RUN_ENABLED` and `DRY_RUN_WRITE_ONLY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| std::env::var(name).ok();
        let mut config = Self::default().with_credentials_from(&EnvCredentials);

        if let Some(url) = var("INAT_API_BASE_URL") {
            config.base_url = url;
        }
        config.user_agent = var("INAT_USER_AGENT");
        if let Some(path) = var("INAT_CACHE_FILE") {
            config.cache_backend = CacheBackendConfig::Sqlite { path: PathBuf::from(path) };
        }
        config.dry_run = DryRun::from_env_values(
            var("DRY_RUN_ENABLED").as_deref(),
            var("DRY_RUN_WRITE_ONLY").as_deref(),
        );

        config.validate()?;
        Ok(config)
    }

    /// Load the access token from a credential store, if one is stored.
    ///
    /// Store failures leave the credentials unset.
    #[must_use]
    pub fn with_credentials_from(mut self, store: &dyn CredentialStore) -> Self {
        match store.get(SERVICE_NAME, "access_token") {
            Ok(Some(token)) => self.credentials = Some(AccessToken::new(token)),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "Credential lookup failed"),
        }
        self
    }

    /// Set the default cache expiration.
    #[must_use]
    pub fn with_cache_expiration(mut self, expiration: impl Into<Expiration>) -> Self {
        self.cache_expiration = expiration.into();
        self
    }

    /// Disable caching.
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    /// Set the cache backend.
    #[must_use]
    pub fn with_cache_backend(mut self, backend: CacheBackendConfig) -> Self {
        self.cache_backend = backend;
        self
    }

    /// Set rate limits.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Fail requests that would wait longer than `max_delay` for rate budget.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.rate_limit.max_delay = Some(max_delay);
        self
    }

    /// Append extra User-Agent info.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the session access token.
    #[must_use]
    pub fn with_credentials(mut self, token: AccessToken) -> Self {
        self.credentials = Some(token);
        self
    }

    /// Enable automatic retries for transient failures.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Check that the configuration is well formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()?;

        let parsed = url::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() || parsed.host_str().is_none() {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: "URL has no host".to_string(),
            });
        }

        for rule in &self.url_expirations {
            regex::Regex::new(&rule.pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: rule.pattern.clone(),
                reason: e.to_string(),
            })?;
        }

        reqwest::header::HeaderValue::from_str(&self.user_agent_header())
            .map_err(|_| ConfigError::InvalidHeader { header: "User-Agent" })?;
        Ok(())
    }

    /// Full User-Agent header value.
    #[must_use]
    pub fn user_agent_header(&self) -> String {
        let base = format!("inat-session/{}", env!("CARGO_PKG_VERSION"));
        match self.user_agent.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => format!("{base} {extra}"),
            _ => base,
        }
    }

    /// Whether caching is active for sessions built from this config.
    #[must_use]
    pub const fn caching_active(&self) -> bool {
        self.client_session_enabled && self.cache_enabled
    }
}
