//! Response cache.
//!
//! [`ResponseCache`] decides which responses may be reused and for how long,
//! and stores them in a [`CacheBackend`]. A backend failure disables the
//! cache for the rest of the session: requests keep working, uncached, and a
//! single warning is logged.

mod backend;
mod entry;
mod key;
mod sqlite;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use regex::Regex;

pub use backend::{CacheBackend, MemoryBackend};
pub use entry::CachedResponse;
pub use key::{CacheKey, IGNORED_PARAMETERS};
pub use sqlite::SqliteBackend;

use crate::config::{CacheBackendConfig, Expiration, SessionConfig, UrlExpiration};
use crate::error::{CacheError, ConfigError};

/// Resolves the expiration for a request URL.
#[derive(Debug, Clone)]
pub struct ExpirationPolicy {
    default: Expiration,
    rules: Vec<(Regex, Expiration)>,
}

impl ExpirationPolicy {
    /// Compile URL rules.
    pub fn new(default: Expiration, rules: &[UrlExpiration]) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern).map(|re| (re, rule.expiration)).map_err(|e| {
                    ConfigError::InvalidPattern { pattern: rule.pattern.clone(), reason: e.to_string() }
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { default, rules })
    }

    /// Request override, then first matching URL rule, then the default.
    #[must_use]
    pub fn resolve(&self, url: &str, request_override: Option<Expiration>) -> Expiration {
        request_override
            .or_else(|| self.rules.iter().find(|(re, _)| re.is_match(url)).map(|(_, exp)| *exp))
            .unwrap_or(self.default)
    }
}

/// Session response cache.
#[derive(Clone)]
pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
    policy: Arc<ExpirationPolicy>,
    disabled: Arc<AtomicBool>,
}

impl ResponseCache {
    /// Create a cache over an existing backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, policy: ExpirationPolicy) -> Self {
        Self { backend, policy: Arc::new(policy), disabled: Arc::new(AtomicBool::new(false)) }
    }

    /// Open the configured backend.
    ///
    /// If the backend cannot be opened the cache starts out disabled.
    pub fn from_config(config: &SessionConfig) -> Result<Self, ConfigError> {
        let policy = ExpirationPolicy::new(config.cache_expiration, &config.url_expirations)?;

        let backend: Result<Arc<dyn CacheBackend>, CacheError> = match &config.cache_backend {
            CacheBackendConfig::Memory { max_entries } => {
                Ok(Arc::new(MemoryBackend::new(*max_entries)) as Arc<dyn CacheBackend>)
            }
            CacheBackendConfig::Sqlite { path } => {
                SqliteBackend::open(path).map(|b| Arc::new(b) as Arc<dyn CacheBackend>)
            }
        };

        Ok(match backend {
            Ok(backend) => Self::new(backend, policy),
            Err(err) => {
                let cache = Self::new(Arc::new(MemoryBackend::new(0)), policy);
                cache.degrade(&err);
                cache
            }
        })
    }

    /// Whether the cache is still usable.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.disabled.load(Ordering::Relaxed)
    }

    /// Expiration that applies to `url`.
    #[must_use]
    pub fn expiration_for(&self, url: &str, request_override: Option<Expiration>) -> Expiration {
        self.policy.resolve(url, request_override)
    }

    /// Return a fresh entry for `key`, if any.
    ///
    /// Stale entries are left for the next store or `remove_expired`; a
    /// concurrent store may already have replaced them.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
        if !self.is_active() {
            return None;
        }

        match self.backend.get(key.as_str()).await {
            Ok(Some(entry)) if entry.is_fresh(Utc::now()) => Some(entry),
            Ok(Some(_)) => {
                tracing::debug!(key = %key, "Cached response expired");
                None
            }
            Ok(None) => None,
            Err(e) => {
                self.degrade(&e);
                None
            }
        }
    }

    /// Store an entry, replacing any previous one for the key.
    pub async fn store(&self, key: &CacheKey, entry: CachedResponse) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.backend.insert(key.as_str(), entry).await {
            self.degrade(&e);
        }
    }

    /// Remove every cached response.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.backend.clear().await
    }

    /// Remove entries that are no longer fresh.
    pub async fn remove_expired(&self) -> Result<u64, CacheError> {
        self.backend.remove_expired(Utc::now()).await
    }

    /// Number of stored entries.
    pub async fn len(&self) -> Result<u64, CacheError> {
        self.backend.len().await
    }

    fn degrade(&self, err: &CacheError) {
        if !self.disabled.swap(true, Ordering::Relaxed) {
            tracing::warn!(error = %err, "Response cache unavailable; continuing without caching");
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache").field("active", &self.is_active()).finish()
    }
}
