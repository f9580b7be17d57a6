//! Request description passed to [`ClientSession::request`](crate::ClientSession::request).

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use url::Url;

use crate::config::Expiration;
use crate::credentials::AccessToken;
use crate::error::{ClientError, ClientResult};
use crate::ratelimit::RefreshParams;

/// An API request with session-specific options.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) params: Vec<(String, String)>,
    pub(crate) ids: Vec<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) access_token: Option<AccessToken>,
    pub(crate) json: Option<serde_json::Value>,
    pub(crate) expire_after: Option<Expiration>,
    pub(crate) refresh: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) dry_run: bool,
    pub(crate) raise_for_status: bool,
}

impl ApiRequest {
    /// Create a request for an absolute URL.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            ids: Vec::new(),
            headers: Vec::new(),
            access_token: None,
            json: None,
            expire_after: None,
            refresh: false,
            timeout: None,
            dry_run: false,
            raise_for_status: true,
        }
    }

    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    #[must_use]
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Add a query parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Add a query parameter if `value` is set.
    #[must_use]
    pub fn param_opt<T: ToString>(self, key: impl Into<String>, value: Option<T>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    /// Add a multi-valued parameter as a comma-separated list. Empty lists are skipped.
    #[must_use]
    pub fn param_list<I, T>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        let joined = values.into_iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",");
        if joined.is_empty() { self } else { self.param(key, joined) }
    }

    /// Add a timestamp parameter in RFC 3339 format.
    #[must_use]
    pub fn param_datetime(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.param(key, value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    /// Add several query parameters.
    #[must_use]
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        self.params.extend(params.into_iter().map(|(k, v)| (k.into(), v.to_string())));
        self
    }

    /// REST resource IDs appended to the path as a comma-separated segment.
    #[must_use]
    pub fn ids<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        self.ids.extend(ids.into_iter().map(|id| id.to_string()));
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send this token instead of the session credentials.
    #[must_use]
    pub fn access_token(mut self, token: AccessToken) -> Self {
        self.access_token = Some(token);
        self
    }

    /// JSON request body.
    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    /// Override the cache expiration for this request.
    #[must_use]
    pub fn expire_after(mut self, expiration: impl Into<Expiration>) -> Self {
        self.expire_after = Some(expiration.into());
        self
    }

    /// Skip reading from the cache; the fresh response is still stored.
    #[must_use]
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Apply parameters from [`RefreshLimiter`](crate::ratelimit::RefreshLimiter).
    #[must_use]
    pub fn with_refresh_params(self, params: RefreshParams) -> Self {
        self.refresh(params.refresh).param_opt("v", params.v)
    }

    /// Read timeout for this request.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Log the request and return a mock response instead of sending it.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// When false, non-2xx responses are returned instead of raised.
    #[must_use]
    pub fn raise_for_status(mut self, raise: bool) -> Self {
        self.raise_for_status = raise;
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Whether responses to this request may be cached.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Full URL with IDs and query parameters applied.
    pub fn build_url(&self) -> ClientResult<Url> {
        let mut url = Url::parse(&self.url)?;
        if url.cannot_be_a_base() {
            return Err(ClientError::InvalidRequest(format!("not a base URL: {}", self.url)));
        }

        if !self.ids.is_empty() {
            let ids = self.ids.join(",");
            url.path_segments_mut()
                .map_err(|()| ClientError::InvalidRequest(format!("cannot append IDs to {}", self.url)))?
                .pop_if_empty()
                .push(&ids);
        }

        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.params);
        }
        Ok(url)
    }
}
