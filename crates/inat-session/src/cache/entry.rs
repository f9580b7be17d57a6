//! Stored response record.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::config::Expiration;

/// A stored response. Replaced as a whole on refresh, never edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers in received order.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    pub body: Bytes,
    /// Request URL the response was fetched for.
    pub url: String,
    /// When the response was stored.
    pub stored_at: DateTime<Utc>,
    /// When the entry stops being reusable. `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedResponse {
    /// Build an entry stored at `now` with the given expiration.
    ///
    /// Returns `None` when the expiration forbids storage.
    #[must_use]
    pub fn new(
        status: u16,
        headers: Vec<(String, String)>,
        body: Bytes,
        url: String,
        now: DateTime<Utc>,
        expiration: Expiration,
    ) -> Option<Self> {
        if !expiration.is_storable() {
            return None;
        }
        // Beyond the representable date range counts as never expiring.
        let expires_at = match expiration {
            Expiration::After(ttl) => chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl)),
            Expiration::Never | Expiration::DoNotCache => None,
        };
        Some(Self { status, headers, body, url, stored_at: now, expires_at })
    }

    /// Whether the entry may be reused at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}
