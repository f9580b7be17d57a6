//! Outbound request budget.
//!
//! [`RateBudget`] runs GCRA over three windows (second, minute, day),
//! optionally keyed by host. A request is granted only when every window
//! admits it, and the grant updates all windows under one lock. A denied or
//! cancelled request leaves the budget exactly as it found it.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::{ClientError, ClientResult, ConfigError};

const SHARED_KEY: &str = "*";
const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(86_400);
const WINDOWS: usize = 3;

#[derive(Debug, Clone, Copy)]
struct Window {
    name: &'static str,
    /// Time one request occupies the window.
    interval: Duration,
    /// How far ahead of `now` the theoretical arrival time may run.
    tolerance: Duration,
}

impl Window {
    fn new(name: &'static str, period: Duration, count: NonZeroU32, burst: NonZeroU32) -> Self {
        let interval = period / count.get();
        let tolerance = interval.checked_mul(burst.get() - 1).unwrap_or(Duration::MAX);
        Self { name, interval, tolerance }
    }

    fn wait(&self, tat: Instant, now: Instant) -> Duration {
        tat.saturating_duration_since(now).saturating_sub(self.tolerance)
    }
}

/// Per-session rate budget.
pub struct RateBudget {
    windows: [Window; WINDOWS],
    /// Theoretical arrival time per window, per key.
    state: Mutex<HashMap<String, [Instant; WINDOWS]>>,
    per_host: bool,
    per_minute: u32,
    max_delay: Option<Duration>,
}

fn non_zero(value: u32, field: &'static str) -> Result<NonZeroU32, ConfigError> {
    NonZeroU32::new(value).ok_or(ConfigError::ZeroRate { field })
}

impl RateBudget {
    /// Build the windows for a rate limit configuration.
    pub fn new(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        let per_second = non_zero(config.per_second, "per_second")?;
        let burst = non_zero(config.burst, "burst")?;
        let per_minute = non_zero(config.per_minute, "per_minute")?;
        let per_day = non_zero(config.per_day, "per_day")?;

        let windows = [
            Window::new("second", Duration::from_secs(1), per_second, burst),
            Window::new("minute", MINUTE, per_minute, per_minute),
            Window::new("day", DAY, per_day, per_day),
        ];

        Ok(Self {
            windows,
            state: Mutex::new(HashMap::new()),
            per_host: config.per_host,
            per_minute: config.per_minute,
            max_delay: config.max_delay,
        })
    }

    fn key(&self, host: &str) -> String {
        if self.per_host { host.to_ascii_lowercase() } else { SHARED_KEY.to_string() }
    }

    /// Grant one request if every window admits it, otherwise report the
    /// longest wait and the window that imposes it.
    fn check(&self, key: &str) -> Result<(), (&'static str, Duration)> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let tats = state.entry(key.to_string()).or_insert([now; WINDOWS]);

        let blocked = self
            .windows
            .iter()
            .zip(tats.iter())
            .map(|(window, tat)| (window.name, window.wait(*tat, now)))
            .filter(|(_, wait)| !wait.is_zero())
            .max_by_key(|(_, wait)| *wait);
        if let Some(blocked) = blocked {
            return Err(blocked);
        }

        for (window, tat) in self.windows.iter().zip(tats.iter_mut()) {
            *tat = (*tat).max(now) + window.interval;
        }
        Ok(())
    }

    /// Take one token without waiting.
    ///
    /// On failure returns how long until every window can admit the request.
    /// A failed attempt takes nothing.
    pub fn try_acquire(&self, host: &str) -> Result<(), Duration> {
        self.check(&self.key(host)).map_err(|(_, wait)| wait)
    }

    /// Take one token, waiting for refill if needed. Returns the time spent waiting.
    ///
    /// Fails with [`ClientError::RateLimitExceeded`] if the wait would
    /// exceed the configured maximum delay. Dropping the future while it
    /// waits leaves the budget untouched.
    pub async fn acquire(&self, host: &str) -> ClientResult<Duration> {
        let key = self.key(host);
        let start = Instant::now();

        while let Err((window, wait)) = self.check(&key) {
            if self.max_delay.is_some_and(|max| wait > max) {
                tracing::warn!(host = %key, window, ?wait, "Rate limit delay exceeds maximum");
                return Err(ClientError::RateLimitExceeded { wait });
            }
            tracing::debug!(host = %key, window, ?wait, "Waiting for rate budget");
            tokio::time::sleep(wait).await;
        }

        Ok(start.elapsed())
    }

    /// Expected time to send `total_requests` at the per-minute rate.
    #[must_use]
    pub fn estimate_delay(&self, total_requests: usize) -> Duration {
        let seconds =
            (total_requests as u64).saturating_mul(60).div_ceil(u64::from(self.per_minute));
        Duration::from_secs(seconds.saturating_sub(1))
    }
}

impl std::fmt::Debug for RateBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateBudget")
            .field("per_host", &self.per_host)
            .field("per_minute", &self.per_minute)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

/// Parameters that force a fresh response past a CDN cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshParams {
    /// Skip the local cache.
    pub refresh: bool,
    /// Extra `v` query parameter that changes the CDN cache key.
    pub v: Option<u32>,
}

/// Tracks recent forced refreshes per endpoint.
///
/// The CDN ignores cache headers for responses younger than about two
/// minutes. Each `endpoint?v=N` bucket allows one refresh per period; the
/// lowest free `N` is used, so its URL is certain to be uncached upstream.
pub struct RefreshLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl RefreshLimiter {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let quota = Quota::with_period(period).unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX));
        Self { limiter: RateLimiter::keyed(quota), clock: DefaultClock::default() }
    }

    /// Claim the lowest free `v` for `endpoint`.
    pub fn refresh_params(&self, endpoint: &str) -> RefreshParams {
        let mut v = 0u32;
        loop {
            let bucket = format!("{endpoint}?v={v}");
            match self.limiter.check_key(&bucket) {
                Ok(()) => break,
                Err(not_until) => {
                    let wait = not_until.wait_time_from(self.clock.now());
                    tracing::debug!(bucket = %bucket, seconds = wait.as_secs(), "Bucket cannot be refreshed yet");
                    v += 1;
                }
            }
        }
        RefreshParams { refresh: true, v: (v > 0).then_some(v) }
    }
}

impl std::fmt::Debug for RefreshLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshLimiter").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(per_second: u32, burst: u32) -> RateBudget {
        RateBudget::new(&RateLimitConfig::per_second(per_second, burst)).unwrap()
    }

    #[test]
    fn test_at_most_capacity_proceeds_immediately() {
        let budget = budget(1, 3);
        let granted = (0..10).filter(|_| budget.try_acquire("api.inaturalist.org").is_ok()).count();
        assert_eq!(granted, 3);
    }

    #[test]
    fn test_denied_reports_wait() {
        let budget = budget(1, 1);
        assert!(budget.try_acquire("api.inaturalist.org").is_ok());
        let wait = budget.try_acquire("api.inaturalist.org").unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn test_per_host_budgets_are_independent() {
        let budget = budget(1, 1);
        assert!(budget.try_acquire("api.inaturalist.org").is_ok());
        assert!(budget.try_acquire("API.iNaturalist.org").is_err());
        assert!(budget.try_acquire("www.inaturalist.org").is_ok());
    }

    #[test]
    fn test_shared_budget_without_per_host() {
        let config = RateLimitConfig { per_host: false, ..RateLimitConfig::per_second(1, 1) };
        let budget = RateBudget::new(&config).unwrap();
        assert!(budget.try_acquire("a.example").is_ok());
        assert!(budget.try_acquire("b.example").is_err());
    }

    #[test]
    fn test_minute_window_applies() {
        let config = RateLimitConfig { per_minute: 2, ..RateLimitConfig::per_second(100, 100) };
        let budget = RateBudget::new(&config).unwrap();
        let granted = (0..10).filter(|_| budget.try_acquire("h").is_ok()).count();
        assert_eq!(granted, 2);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let config = RateLimitConfig { per_day: 0, ..RateLimitConfig::default() };
        assert!(matches!(RateBudget::new(&config), Err(ConfigError::ZeroRate { field: "per_day" })));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let budget = budget(10, 2);
        let start = Instant::now();
        for _ in 0..3 {
            budget.acquire("h").await.unwrap();
        }
        // Third token refills after ~100ms at 10 req/s.
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_acquire_respects_max_delay() {
        let config = RateLimitConfig {
            max_delay: Some(Duration::from_millis(1)),
            ..RateLimitConfig::per_second(1, 1)
        };
        let budget = RateBudget::new(&config).unwrap();
        budget.acquire("h").await.unwrap();
        let err = budget.acquire("h").await.unwrap_err();
        assert!(matches!(err, ClientError::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_wait_leaves_budget_unchanged() {
        let budget = budget(1, 1);
        budget.acquire("h").await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(20), budget.acquire("h")).await;
        assert!(waited.is_err());

        // Still exhausted for roughly the same remaining time, not pushed further out.
        let wait = budget.try_acquire("h").unwrap_err();
        assert!(wait <= Duration::from_secs(1));
    }

    fn day_limited() -> RateBudget {
        let config = RateLimitConfig { per_day: 1, ..RateLimitConfig::per_second(1, 2) };
        RateBudget::new(&config).unwrap()
    }

    #[test]
    fn test_denied_attempt_takes_nothing() {
        let budget = day_limited();
        assert!(budget.try_acquire("h").is_ok());

        let first = budget.try_acquire("h").unwrap_err();
        let second = budget.try_acquire("h").unwrap_err();
        assert!(first > Duration::from_secs(86_000));
        assert!(first.abs_diff(second) < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_cancelled_long_wait_takes_nothing() {
        let budget = day_limited();
        budget.acquire("h").await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(20), budget.acquire("h")).await;
        assert!(waited.is_err());
        assert!(budget.try_acquire("h").unwrap_err() > Duration::from_secs(86_000));
    }

    #[tokio::test]
    async fn test_max_delay_failure_takes_nothing() {
        let config = RateLimitConfig {
            per_day: 1,
            max_delay: Some(Duration::from_secs(60)),
            ..RateLimitConfig::per_second(1, 2)
        };
        let budget = RateBudget::new(&config).unwrap();
        budget.acquire("h").await.unwrap();

        for _ in 0..3 {
            let err = budget.acquire("h").await.unwrap_err();
            let ClientError::RateLimitExceeded { wait } = err else {
                panic!("expected RateLimitExceeded, got {err:?}");
            };
            assert!(wait > Duration::from_secs(86_000));
        }
    }

    #[test]
    fn test_estimate_delay_saturates() {
        let budget = RateBudget::new(&RateLimitConfig::default()).unwrap();
        assert!(budget.estimate_delay(usize::MAX) > Duration::from_secs(1_000_000));
    }

    #[test]
    fn test_estimate_delay() {
        let budget = RateBudget::new(&RateLimitConfig::default()).unwrap();
        assert_eq!(budget.estimate_delay(0), Duration::ZERO);
        assert_eq!(budget.estimate_delay(1), Duration::ZERO);
        assert_eq!(budget.estimate_delay(120), Duration::from_secs(119));
    }

    #[test]
    fn test_refresh_params_pick_lowest_free_version() {
        let limiter = RefreshLimiter::new(Duration::from_secs(60));
        assert_eq!(limiter.refresh_params("test"), RefreshParams { refresh: true, v: None });
        assert_eq!(limiter.refresh_params("test2"), RefreshParams { refresh: true, v: None });
        assert_eq!(limiter.refresh_params("test"), RefreshParams { refresh: true, v: Some(1) });
        assert_eq!(limiter.refresh_params("test"), RefreshParams { refresh: true, v: Some(2) });
    }

    #[tokio::test]
    async fn test_refresh_params_reset_after_period() {
        let limiter = RefreshLimiter::new(Duration::from_millis(100));
        assert_eq!(limiter.refresh_params("test").v, None);
        assert_eq!(limiter.refresh_params("test").v, Some(1));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(limiter.refresh_params("test").v, None);
    }
}
