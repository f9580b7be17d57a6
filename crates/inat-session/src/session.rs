//! Cached, rate-limited client session.
//!
//! Provides an async HTTP session with:
//! - Connection pooling via reqwest
//! - Response caching with per-URL expiration (memory or SQLite)
//! - Per-host rate budget (per second, minute and day)
//! - Optional retry middleware with exponential backoff
//! - Dry-run mode for write requests

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER,
    USER_AGENT,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};

use crate::cache::{CacheKey, CachedResponse, ResponseCache};
use crate::config::{SessionConfig, api};
use crate::error::{CacheError, ClientError, ClientResult, ConfigError};
use crate::ratelimit::{RateBudget, RefreshLimiter, RefreshParams};
use crate::request::ApiRequest;
use crate::response::ApiResponse;

/// Upper bound for opt-in retry backoff.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Session for iNaturalist API requests.
///
/// Cheap to clone; clones share the HTTP pool, cache and rate budget.
#[derive(Clone)]
pub struct ClientSession {
    /// HTTP client with middleware.
    client: ClientWithMiddleware,

    /// Response cache. `None` when caching is disabled.
    cache: Option<ResponseCache>,

    /// Outbound request budget.
    budget: Arc<RateBudget>,

    /// Forced-refresh tracking.
    refresh: Arc<RefreshLimiter>,

    config: Arc<SessionConfig>,
}

impl ClientSession {
    /// Build a session from a configuration.
    ///
    /// Fails with [`ClientError::Config`] before any network I/O if the
    /// configuration is malformed.
    pub fn new(config: SessionConfig) -> ClientResult<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent_header())
                .map_err(|_| ConfigError::InvalidHeader { header: "User-Agent" })?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(api::MAX_KEEPALIVE)
            .pool_idle_timeout(api::KEEPALIVE_EXPIRY)
            .gzip(true)
            .build()?;

        let mut builder = ClientBuilder::new(client);
        if config.retries > 0 {
            let retry_policy = ExponentialBackoff::builder()
                .retry_bounds(config.retry_backoff, MAX_RETRY_BACKOFF.max(config.retry_backoff))
                .build_with_max_retries(config.retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }
        let client = builder.build();

        let cache =
            if config.caching_active() { Some(ResponseCache::from_config(&config)?) } else { None };
        let budget = RateBudget::new(&config.rate_limit)?;

        if !config.client_session_enabled {
            tracing::debug!("Client session bypassed: caching and rate limiting disabled");
        }

        Ok(Self {
            client,
            cache,
            budget: Arc::new(budget),
            refresh: Arc::new(RefreshLimiter::new(api::REFRESH_PERIOD)),
            config: Arc::new(config),
        })
    }

    /// Build a session from environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::new(SessionConfig::from_env()?)
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether responses are currently read from and written to the cache.
    #[must_use]
    pub fn is_caching(&self) -> bool {
        self.cache.as_ref().is_some_and(ResponseCache::is_active)
    }

    /// Rate budget shared by clones of this session.
    #[must_use]
    pub fn rate_budget(&self) -> &RateBudget {
        &self.budget
    }

    /// Send a request.
    ///
    /// A fresh cached response is returned without consuming rate budget.
    /// Otherwise one unit of budget is taken for the request host (waiting
    /// for refill if needed) and the request is sent. Successful responses
    /// to GET and HEAD are stored; failures never are.
    pub async fn request(&self, request: ApiRequest) -> ClientResult<ApiResponse> {
        let url = request.build_url()?;

        if request.dry_run || self.config.dry_run.applies_to(&request.method) {
            tracing::info!(method = %request.method, url = %url, "Dry run: request not sent");
            return Ok(ApiResponse::mock(url.to_string()));
        }

        let key = CacheKey::new(&request.method, &url);
        let cache = self.cache.as_ref().filter(|c| c.is_active() && request.is_cacheable());

        let cached = match cache {
            Some(cache) if !request.refresh => cache.lookup(&key).await,
            _ => None,
        };
        if let Some(entry) = cached {
            tracing::debug!(method = %request.method, url = %url, "Cache hit");
            return Ok(ApiResponse::from_cached(entry));
        }

        if self.config.client_session_enabled {
            let host = url.host_str().unwrap_or_default();
            let waited = self.budget.acquire(host).await?;
            if waited >= Duration::from_millis(1) {
                let waited_ms = waited.as_millis() as u64;
                tracing::debug!(host, waited_ms, "Rate limited request");
            }
        }

        let headers = self.request_headers(&request)?;
        let mut builder =
            self.client.request(request.method.clone(), url.clone()).headers(headers);
        if let Some(body) = &request.json {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_string(body)?);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        tracing::debug!(method = %request.method, url = %url, "Sending request");
        let started = Instant::now();
        let response = builder.send().await?;

        let status = response.status();
        let response_headers = header_pairs(response.headers());
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body: Bytes = response.bytes().await?;
        tracing::debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = body.len(),
            "Received response"
        );

        if !status.is_success() {
            tracing::warn!(
                method = %request.method,
                url = %url,
                status = status.as_u16(),
                "Request failed"
            );
            if request.raise_for_status {
                return Err(ClientError::Remote {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                    retry_after,
                });
            }
            return Ok(ApiResponse::new(status.as_u16(), response_headers, body, url.to_string()));
        }

        if let Some(cache) = cache {
            let expiration = cache.expiration_for(url.as_str(), request.expire_after);
            let entry = CachedResponse::new(
                status.as_u16(),
                response_headers.clone(),
                body.clone(),
                url.to_string(),
                Utc::now(),
                expiration,
            );
            if let Some(entry) = entry {
                cache.store(&key, entry).await;
            }
        }

        Ok(ApiResponse::new(status.as_u16(), response_headers, body, url.to_string()))
    }

    /// Send a GET request with no extra options.
    pub async fn get(&self, url: &str) -> ClientResult<ApiResponse> {
        self.request(ApiRequest::get(url)).await
    }

    /// Send a POST request with a JSON body.
    pub async fn post(&self, url: &str, body: serde_json::Value) -> ClientResult<ApiResponse> {
        self.request(ApiRequest::post(url).json(body)).await
    }

    /// Send a PUT request with a JSON body.
    pub async fn put(&self, url: &str, body: serde_json::Value) -> ClientResult<ApiResponse> {
        self.request(ApiRequest::put(url).json(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, url: &str) -> ClientResult<ApiResponse> {
        self.request(ApiRequest::delete(url)).await
    }

    /// Absolute URL for a v1 endpoint, e.g. `observations` or `/taxa/autocomplete`.
    #[must_use]
    pub fn v1_url(&self, endpoint: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/{}", endpoint.trim_start_matches('/'))
    }

    /// GET a v1 endpoint with query parameters.
    pub async fn get_v1<I, K, V>(&self, endpoint: &str, params: I) -> ClientResult<ApiResponse>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        self.request(ApiRequest::get(self.v1_url(endpoint)).params(params)).await
    }

    /// Parameters for a request that must bypass both local and CDN caches.
    pub fn refresh_params(&self, endpoint: &str) -> RefreshParams {
        self.refresh.refresh_params(endpoint)
    }

    /// Remove every cached response.
    pub async fn clear_cache(&self) -> Result<(), CacheError> {
        match &self.cache {
            Some(cache) => {
                cache.clear().await?;
                tracing::info!("Cleared response cache");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Remove expired responses. Returns the number removed.
    pub async fn remove_expired(&self) -> Result<u64, CacheError> {
        match &self.cache {
            Some(cache) => cache.remove_expired().await,
            None => Ok(0),
        }
    }

    /// Number of cached responses.
    pub async fn cache_len(&self) -> Result<u64, CacheError> {
        match &self.cache {
            Some(cache) => cache.len().await,
            None => Ok(0),
        }
    }

    fn request_headers(&self, request: &ApiRequest) -> ClientResult<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(token) = request.access_token.as_ref().or(self.config.credentials.as_ref()) {
            let value = HeaderValue::from_str(&token.bearer())
                .map_err(|_| ConfigError::InvalidHeader { header: "Authorization" })?;
            headers.insert(AUTHORIZATION, value);
        }

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ClientError::InvalidRequest(format!("invalid header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ClientError::InvalidRequest(format!("invalid value for {name}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("base_url", &self.config.base_url)
            .field("caching", &self.is_caching())
            .field("has_credentials", &self.config.credentials.is_some())
            .field("client_session_enabled", &self.config.client_session_enabled)
            .finish()
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect()
}

/// Parse a `Retry-After` value: delay in seconds, or an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}
