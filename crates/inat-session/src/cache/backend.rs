//! Cache storage backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};

use super::CachedResponse;
use crate::error::CacheError;

/// Storage for cached responses, keyed by [`CacheKey`](super::CacheKey) digest.
///
/// Writes to the same key are last-writer-wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch an entry, fresh or not.
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError>;

    /// Store an entry, replacing any existing one.
    async fn insert(&self, key: &str, entry: CachedResponse) -> Result<(), CacheError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Remove entries that are no longer fresh at `now`. Returns the number removed.
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError>;

    /// Number of stored entries.
    async fn len(&self) -> Result<u64, CacheError>;
}

/// Process-local LRU backend.
#[derive(Clone)]
pub struct MemoryBackend {
    cache: Cache<String, CachedResponse>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(max_entries: u64) -> Self {
        Self { cache: Cache::builder().max_capacity(max_entries).build() }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn insert(&self, key: &str, entry: CachedResponse) -> Result<(), CacheError> {
        self.cache.insert(key.to_owned(), entry).await;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        let expired: Vec<_> = self
            .cache
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(key, _)| key)
            .collect();
        // Re-checked per key so a fresh store made since the scan survives.
        let mut removed = 0;
        for key in &expired {
            let result = self
                .cache
                .entry_by_ref(key.as_str())
                .and_compute_with(|current| {
                    let op = match current {
                        Some(entry) if !entry.value().is_fresh(now) => Op::Remove,
                        _ => Op::Nop,
                    };
                    std::future::ready(op)
                })
                .await;
            if matches!(result, CompResult::Removed(_)) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn len(&self) -> Result<u64, CacheError> {
        self.cache.run_pending_tasks().await;
        Ok(self.cache.entry_count())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").field("entries", &self.cache.entry_count()).finish()
    }
}
