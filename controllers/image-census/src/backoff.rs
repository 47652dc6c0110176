//! # Rate-Limited Backoff
//!
//! Provides the delay calculators behind the work queue's `add_rate_limited`.
//!
//! Two limiters are combined and the longer delay wins:
//! - a per-item exponential failure backoff (5ms, 10ms, 20ms, ... capped at 1000s),
//!   reset when the item is forgotten after a successful reconcile
//! - an overall token bucket (50 per second, burst of 300) that keeps a storm of
//!   failing items from hammering the API server

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Base delay of the per-item exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Cap of the per-item exponential backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Sustained rate of the token bucket, in items per second.
pub const DEFAULT_BUCKET_QPS: f64 = 50.0;

/// Burst size of the token bucket.
pub const DEFAULT_BUCKET_BURST: f64 = 300.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decides how long an item waits before it is re-queued.
pub trait RateLimiter<T>: Send + Sync {
    /// Delay for the next requeue of `item`; records the attempt.
    fn when(&self, item: &T) -> Duration;

    /// Clears all failure history for `item`.
    fn forget(&self, item: &T);

    /// Number of rate-limited requeues recorded for `item`.
    fn num_requeues(&self, item: &T) -> u32;
}

/// Per-item exponential failure backoff
///
/// Each call to `when` doubles the delay for that item, starting at `base`
/// and capped at `max`. Items are tracked independently.
#[derive(Debug)]
pub struct ItemExponentialBackoff<T> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T: Eq + Hash + Clone> ItemExponentialBackoff<T> {
    /// Create a backoff with the given base and maximum delay
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Eq + Hash + Clone + Send> RateLimiter<T> for ItemExponentialBackoff<T> {
    fn when(&self, item: &T) -> Duration {
        let mut failures = lock(&self.failures);
        let exp = failures.entry(item.clone()).or_insert(0);
        let factor = 2u32.saturating_pow(*exp);
        *exp = exp.saturating_add(1);

        std::cmp::min(self.base.saturating_mul(factor), self.max)
    }

    fn forget(&self, item: &T) {
        lock(&self.failures).remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        lock(&self.failures).get(item).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token bucket shared by all items
///
/// Tokens refill at `qps` per second up to `burst`. Taking a token from an
/// empty bucket is allowed; the returned delay is how long until the debt
/// is repaid.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    /// Create a full bucket
    #[must_use]
    pub fn new(qps: f64, burst: f64) -> Self {
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }
}

impl<T> RateLimiter<T> for BucketRateLimiter {
    fn when(&self, _item: &T) -> Duration {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }

    fn forget(&self, _item: &T) {}

    fn num_requeues(&self, _item: &T) -> u32 {
        0
    }
}

/// Combines limiters; the longest delay and highest requeue count win.
pub struct MaxOfRateLimiter<T> {
    limiters: Vec<Box<dyn RateLimiter<T>>>,
}

impl<T> std::fmt::Debug for MaxOfRateLimiter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxOfRateLimiter")
            .field("limiters", &self.limiters.len())
            .finish()
    }
}

impl<T> MaxOfRateLimiter<T> {
    /// Create a combined limiter
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter<T>>>) -> Self {
        Self { limiters }
    }
}

impl<T> RateLimiter<T> for MaxOfRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        // Every limiter must observe the attempt, so no short-circuit
        self.limiters
            .iter()
            .map(|limiter| limiter.when(item))
            .fold(Duration::ZERO, std::cmp::max)
    }

    fn forget(&self, item: &T) {
        for limiter in &self.limiters {
            limiter.forget(item);
        }
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(item))
            .max()
            .unwrap_or(0)
    }
}

/// The limiter every per-cluster queue uses
#[must_use]
pub fn default_controller_rate_limiter<T>() -> MaxOfRateLimiter<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialBackoff::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)),
        Box::new(BucketRateLimiter::new(DEFAULT_BUCKET_QPS, DEFAULT_BUCKET_BURST)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let backoff = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        // 5ms, 10ms, 20ms, 40ms, ...
        assert_eq!(backoff.when(&"a"), Duration::from_millis(5));
        assert_eq!(backoff.when(&"a"), Duration::from_millis(10));
        assert_eq!(backoff.when(&"a"), Duration::from_millis(20));
        assert_eq!(backoff.when(&"a"), Duration::from_millis(40));
        assert_eq!(backoff.num_requeues(&"a"), 4);
    }

    #[test]
    fn test_exponential_backoff_is_per_item() {
        let backoff = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        backoff.when(&"a");
        backoff.when(&"a");
        assert_eq!(backoff.when(&"b"), Duration::from_millis(5));
        assert_eq!(backoff.num_requeues(&"a"), 2);
        assert_eq!(backoff.num_requeues(&"b"), 1);
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let backoff = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        for _ in 0..40 {
            backoff.when(&"a");
        }
        // Should stay at max even once the doubling factor saturates
        assert_eq!(backoff.when(&"a"), Duration::from_secs(1000));
    }

    #[test]
    fn test_exponential_backoff_forget() {
        let backoff = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        backoff.when(&"a");
        backoff.when(&"a");
        backoff.forget(&"a");

        // Should restart from the beginning after success
        assert_eq!(backoff.num_requeues(&"a"), 0);
        assert_eq!(backoff.when(&"a"), Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_allows_burst_then_delays() {
        let bucket = BucketRateLimiter::new(10.0, 2.0);

        assert_eq!(RateLimiter::<&str>::when(&bucket, &"a"), Duration::ZERO);
        assert_eq!(RateLimiter::<&str>::when(&bucket, &"b"), Duration::ZERO);
        // Bucket empty: one token is repaid after 100ms at 10 qps
        assert_eq!(RateLimiter::<&str>::when(&bucket, &"c"), Duration::from_millis(100));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(RateLimiter::<&str>::when(&bucket, &"d"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_limiter_takes_longest_delay() {
        let limiter = default_controller_rate_limiter::<&str>();

        assert_eq!(limiter.when(&"a"), Duration::from_millis(5));
        assert_eq!(limiter.when(&"a"), Duration::from_millis(10));
        assert_eq!(limiter.num_requeues(&"a"), 2);

        limiter.forget(&"a");
        assert_eq!(limiter.num_requeues(&"a"), 0);
    }
}
