//! Error types for the iNaturalist client session.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.

use std::time::Duration;

/// Malformed session configuration. Raised before any request is sent.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A rate limit window was configured with zero capacity
    #[error("Rate limit '{field}' must be positive")]
    ZeroRate {
        /// Name of the offending setting
        field: &'static str,
    },

    /// Base URL could not be parsed
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// The rejected URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// A header value (User-Agent, token) contains forbidden characters
    #[error("Invalid header value for {header}")]
    InvalidHeader {
        /// Header name
        header: &'static str,
    },

    /// URL expiration pattern is not a valid regex
    #[error("Invalid URL expiration pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The rejected pattern
        pattern: String,
        /// Regex compiler message
        reason: String,
    },
}

/// Cache storage backend failure.
///
/// Never returned from a request: the session disables its cache and continues.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// SQLite failure
    #[error("SQLite cache error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure (creating the cache directory)
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored entry could not be decoded
    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    /// Blocking storage task panicked or was cancelled
    #[error("Cache task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Credential store failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The store does not support writes
    #[error("Credential store is read-only")]
    ReadOnly,

    /// The store backend is unavailable
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// Broad classification of a request failure, for callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout or connection failure; safe to retry
    Transient,
    /// The server answered with a non-2xx status; caller must decide
    Remote,
    /// Failure on this side (configuration, parsing, rate budget)
    Local,
}

/// Errors from the client session.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// Configuration rejected at session build time
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Timeout, connection reset, DNS failure
    #[error("Transient network error: {message}")]
    Transient {
        /// Transport error message
        message: String,
        /// Whether the failure was a timeout
        timeout: bool,
    },

    /// Non-2xx response
    #[error("Remote error ({status}): {body}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
        /// `Retry-After` value, if the server sent one
        retry_after: Option<Duration>,
    },

    /// Waiting for the rate budget would exceed the configured maximum delay
    #[error("Rate limit exceeded: next request allowed in {wait:?}")]
    RateLimitExceeded {
        /// Time until a token is available
        wait: Duration,
    },

    /// Request URL could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP error that is neither a timeout nor a connection failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON parsing error
    #[error("Failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ClientError {
    /// Create a remote error.
    #[must_use]
    pub fn remote(status: u16, body: impl Into<String>) -> Self {
        Self::Remote { status, body: body.into(), retry_after: None }
    }

    /// Create a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>, timeout: bool) -> Self {
        Self::Transient { message: message.into(), timeout }
    }

    /// Failure classification.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } => FailureKind::Transient,
            Self::Remote { .. } => FailureKind::Remote,
            _ => FailureKind::Local,
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// 429 and 5xx remote errors are retryable along with transient failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transient { .. } | Self::RateLimitExceeded { .. } => true,
            Self::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// HTTP status, if the server responded.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Suggested wait before retrying, if known.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Remote { retry_after, .. } => *retry_after,
            Self::RateLimitExceeded { wait } => Some(*wait),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transient(err.to_string(), true)
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::transient(err.to_string(), false)
        } else if let Some(status) = err.status() {
            Self::remote(status.as_u16(), err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

impl From<reqwest_middleware::Error> for ClientError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => Self::Http(e.to_string()),
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
