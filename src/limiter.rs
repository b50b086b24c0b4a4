//! Fixed-window request rate limiting with a bounded bucket cache.
//!
//! Guards write-heavy reporting endpoints: each key gets a counter per
//! non-overlapping window of fixed length. The decision is synchronous
//! and single-step; callers act on the boolean themselves (typically by
//! responding with a 429-equivalent and performing no side effect).

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Response header carrying the window limit.
pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
/// Response header carrying the remaining allowance.
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";

/// Configuration for the limiter's bucket store.
#[derive(Clone, Debug)]
pub struct RateLimiterConfig {
    /// Maximum distinct keys tracked at once. Beyond this the
    /// least-recently-used bucket is evicted, bounding memory under
    /// unbounded key cardinality.
    pub max_keys: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { max_keys: 10_000 }
    }
}

/// Outcome of a single rate limit check.
///
/// A denial is a decision value, not an error; the caller translates it
/// into a client-visible rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
}

impl RateDecision {
    /// Header pairs for an HTTP-style response.
    pub fn headers(&self) -> [(&'static str, String); 2] {
        [
            (LIMIT_HEADER, self.limit.to_string()),
            (REMAINING_HEADER, self.remaining.to_string()),
        ]
    }
}

/// One key's counter within its current window.
struct Bucket {
    window_start: Instant,
    count: u32,
}

/// Fixed-window limiter over a bounded LRU bucket store.
pub struct RateLimiter {
    buckets: Mutex<LruCache<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_keys.max(1)).unwrap();
        Self {
            buckets: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Count one request against `key`'s current window.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateDecision {
        self.check_at(key, limit, window, Instant::now())
    }

    /// [`check`](Self::check) with an explicit clock, for simulated time.
    pub fn check_at(&self, key: &str, limit: u32, window: Duration, now: Instant) -> RateDecision {
        let mut buckets = self.buckets.lock();
        match buckets.get_mut(key) {
            Some(bucket) if now.duration_since(bucket.window_start) < window => {
                bucket.count = bucket.count.saturating_add(1);
                decision(limit, bucket.count)
            }
            // Missing bucket, expired window, or a key recycled after
            // LRU eviction: start a fresh window.
            _ => {
                buckets.put(
                    key.to_string(),
                    Bucket {
                        window_start: now,
                        count: 1,
                    },
                );
                decision(limit, 1)
            }
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }
}

fn decision(limit: u32, count: u32) -> RateDecision {
    RateDecision {
        allowed: count <= limit,
        limit,
        remaining: limit.saturating_sub(count),
    }
}
