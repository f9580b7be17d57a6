//! Response returned by the session, from the network or the cache.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::cache::CachedResponse;
use crate::error::ClientResult;

/// Body returned in dry-run mode.
pub const MOCK_RESPONSE_BODY: &str = r#"{"results":[],"total_results":0,"access_token":""}"#;

/// A fully read API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
    url: String,
    from_cache: bool,
}

impl ApiResponse {
    pub(crate) fn new(status: u16, headers: Vec<(String, String)>, body: Bytes, url: String) -> Self {
        Self { status, headers, body, url, from_cache: false }
    }

    pub(crate) fn mock(url: String) -> Self {
        Self::new(
            200,
            vec![("content-type".into(), "application/json".into())],
            Bytes::from_static(MOCK_RESPONSE_BODY.as_bytes()),
            url,
        )
    }

    pub(crate) fn from_cached(entry: CachedResponse) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers,
            body: entry.body,
            url: entry.url,
            from_cache: true,
        }
    }

    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Whether this response was served from the cache.
    #[must_use]
    pub const fn from_cache(&self) -> bool {
        self.from_cache
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header value with this name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
