//! Fixed-window rate limiting.
//!
//! Counters live in discrete windows `floor(now / window_ms)`. A route's
//! limit definitions are resolved to concrete keys per request (client IP,
//! user id, route pattern or the literal `global`); if any key's counter
//! exceeds its capacity the request is denied. Store failures fail open so
//! limiter availability never gates gateway availability.

use ahash::HashMap as AHashMap;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::models::router::LimitKeyType;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A route limit resolved against one concrete request.
#[derive(Debug, Clone)]
pub struct ResolvedLimit {
    pub key_type: LimitKeyType,
    /// Concrete key value: an IP, a user id, a route pattern, or `global`.
    pub value: String,
    pub capacity: u64,
    pub window_ms: u64,
}

impl ResolvedLimit {
    /// Bucket identity for the window containing `now`.
    fn bucket(&self, window_start: u64) -> String {
        format!("{}:{}:{}", self.key_type.as_str(), self.value, window_start)
    }
}

/// The limiter's verdict for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Capacity of the most constrained key, for `X-RateLimit-Limit`.
    pub limit: u64,
    /// Remaining capacity of the most constrained key, for
    /// `X-RateLimit-Remaining`.
    pub remaining: u64,
    /// Seconds until the denying window rolls over; only meaningful when
    /// `allowed` is false. Drives `Retry-After`.
    pub retry_after: u64,
}

impl Decision {
    fn allow_unlimited() -> Self {
        Self {
            allowed: true,
            limit: 0,
            remaining: 0,
            retry_after: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Counter storage behind the limiter.
///
/// Implementations atomically increment the counter for a bucket and return
/// the post-increment value. Entry expiry is the store's responsibility:
/// the in-memory store sweeps in the background, a shared store would
/// delegate to per-entry TTLs.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increments `bucket` and returns the new count. `expires_at_ms` is the
    /// wall-clock instant after which the bucket is garbage.
    async fn increment(&self, bucket: &str, expires_at_ms: u64) -> Result<u64, StoreError>;
}

struct Counter {
    count: u64,
    expires_at_ms: u64,
}

/// In-process counter store.
///
/// A single mutex over the bucket map; buckets are tiny and increments are
/// a handful of instructions, so contention stays low at gateway request
/// rates. A background sweeper removes windows that have rolled over.
pub struct MemoryStore {
    counters: Mutex<AHashMap<String, Counter>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counters: Mutex::new(AHashMap::default()),
        })
    }

    /// Spawns the expired-window sweeper. The task runs for the life of the
    /// process; it holds only a weak reference so shutdown is not delayed.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else { break };
                let now = now_ms();
                let mut counters = store
                    .counters
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let before = counters.len();
                counters.retain(|_, c| c.expires_at_ms > now);
                let removed = before - counters.len();
                if removed > 0 {
                    debug!("rate limiter sweep removed {removed} expired windows");
                }
            }
        });
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment(&self, bucket: &str, expires_at_ms: u64) -> Result<u64, StoreError> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let counter = counters.entry(bucket.to_string()).or_insert(Counter {
            count: 0,
            expires_at_ms,
        });
        // A stale entry whose window rolled over but which the sweeper has
        // not visited yet starts a fresh window.
        if counter.expires_at_ms <= now_ms() {
            counter.count = 0;
            counter.expires_at_ms = expires_at_ms;
        }
        counter.count += 1;
        Ok(counter.count)
    }
}

/// The rate limiter: fixed-window counting over a pluggable store.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Checks every resolved key for the current request.
    ///
    /// Evaluation stops at the first denying key; later keys are not
    /// charged for a request that will be rejected. The reported
    /// limit/remaining pair belongs to the most constrained key seen, so
    /// the headers reflect the tightest budget.
    ///
    /// A store error is logged and treated as allow for that key.
    pub async fn check(&self, limits: &[ResolvedLimit]) -> Decision {
        if limits.is_empty() {
            return Decision::allow_unlimited();
        }

        let now = now_ms();
        let mut tightest: Option<(u64, u64)> = None; // (limit, remaining)

        for limit in limits {
            let window_start = now / limit.window_ms;
            let window_end_ms = (window_start + 1) * limit.window_ms;
            let bucket = limit.bucket(window_start);

            let count = match self.store.increment(&bucket, window_end_ms).await {
                Ok(count) => count,
                Err(e) => {
                    warn!("rate limit store error, failing open: {e}");
                    continue;
                }
            };

            if count > limit.capacity {
                let retry_after = (window_end_ms.saturating_sub(now)).div_ceil(1000).max(1);
                return Decision {
                    allowed: false,
                    limit: limit.capacity,
                    remaining: 0,
                    retry_after,
                };
            }

            let remaining = limit.capacity - count;
            match tightest {
                Some((_, best)) if best <= remaining => {}
                _ => tightest = Some((limit.capacity, remaining)),
            }
        }

        match tightest {
            Some((limit, remaining)) => Decision {
                allowed: true,
                limit,
                remaining,
                retry_after: 0,
            },
            // Every key failed open.
            None => Decision::allow_unlimited(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip_limit(capacity: u64, window_ms: u64) -> ResolvedLimit {
        ResolvedLimit {
            key_type: LimitKeyType::Ip,
            value: "10.0.0.1".to_string(),
            capacity,
            window_ms,
        }
    }

    /// Waits out the tail of the current window so a burst of checks cannot
    /// straddle a boundary.
    async fn align_to_window(window_ms: u64) {
        let into = now_ms() % window_ms;
        if into > window_ms / 2 {
            tokio::time::sleep(Duration::from_millis(window_ms - into + 5)).await;
        }
    }

    #[tokio::test]
    async fn denies_once_capacity_reached() {
        let limiter = RateLimiter::new(MemoryStore::new());
        let limits = [ip_limit(3, 60_000)];

        for i in 0..3 {
            let decision = limiter.check(&limits).await;
            assert!(decision.allowed, "request {i} should pass");
            assert_eq!(decision.limit, 3);
            assert_eq!(decision.remaining, 2 - i);
        }

        let denied = limiter.check(&limits).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after >= 1);
        assert!(denied.retry_after <= 60);
    }

    #[tokio::test]
    async fn window_rollover_resets_counter() {
        let limiter = RateLimiter::new(MemoryStore::new());
        let limits = [ip_limit(1, 200)];

        align_to_window(200).await;
        assert!(limiter.check(&limits).await.allowed);
        assert!(!limiter.check(&limits).await.allowed);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(limiter.check(&limits).await.allowed);
    }

    #[tokio::test]
    async fn keys_count_independently() {
        let limiter = RateLimiter::new(MemoryStore::new());
        let a = [ResolvedLimit {
            key_type: LimitKeyType::Ip,
            value: "1.1.1.1".to_string(),
            capacity: 1,
            window_ms: 60_000,
        }];
        let b = [ResolvedLimit {
            key_type: LimitKeyType::Ip,
            value: "2.2.2.2".to_string(),
            capacity: 1,
            window_ms: 60_000,
        }];

        assert!(limiter.check(&a).await.allowed);
        assert!(!limiter.check(&a).await.allowed);
        assert!(limiter.check(&b).await.allowed);
    }

    #[tokio::test]
    async fn any_denying_key_denies_overall() {
        let limiter = RateLimiter::new(MemoryStore::new());
        let tight = ResolvedLimit {
            key_type: LimitKeyType::Global,
            value: "global".to_string(),
            capacity: 1,
            window_ms: 60_000,
        };
        let loose = ip_limit(100, 60_000);
        let limits = [loose, tight];

        assert!(limiter.check(&limits).await.allowed);
        let denied = limiter.check(&limits).await;
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 1);
    }

    #[tokio::test]
    async fn reported_headers_track_tightest_key() {
        let limiter = RateLimiter::new(MemoryStore::new());
        let limits = [ip_limit(100, 60_000), ResolvedLimit {
            key_type: LimitKeyType::Route,
            value: "/api".to_string(),
            capacity: 5,
            window_ms: 60_000,
        }];

        let decision = limiter.check(&limits).await;
        assert!(decision.allowed);
        assert_eq!(decision.limit, 5);
        assert_eq!(decision.remaining, 4);
    }

    struct FailingStore;

    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn increment(&self, _: &str, _: u64) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("store down".to_string()))
        }
    }

    #[tokio::test]
    async fn store_errors_fail_open() {
        let limiter = RateLimiter::new(Arc::new(FailingStore));
        let decision = limiter.check(&[ip_limit(1, 1000)]).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn no_limits_means_unlimited() {
        let limiter = RateLimiter::new(MemoryStore::new());
        assert!(limiter.check(&[]).await.allowed);
    }
}
