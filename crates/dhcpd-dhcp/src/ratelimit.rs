use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

const STALE_AFTER: Duration = Duration::from_secs(30);

/// A single token bucket: `capacity` tokens, refilled to full every
/// `refill_interval` and drained by one per admitted request.
struct Bucket {
    tokens: u64,
    last_refill: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn new(capacity: u64) -> Self {
        let now = Instant::now();
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    /// Resets to full once `refill_interval` has elapsed. Does not consume.
    fn refill(&mut self, capacity: u64, refill_interval: Duration, now: Instant) {
        if now.duration_since(self.last_refill) >= refill_interval {
            self.tokens = capacity;
            self.last_refill = now;
        }
    }

    fn has_token(&self) -> bool {
        self.tokens > 0
    }

    fn consume(&mut self) {
        self.tokens -= 1;
    }
}

struct State {
    global: Bucket,
    per_client: HashMap<String, Bucket>,
}

/// Two-tier token-bucket rate limiter: one global bucket guards aggregate
/// request volume, and a per-client bucket (keyed by MAC) caps any single
/// client from starving the others. Both buckets live under one mutex so a
/// request is admitted only if neither is empty, and they're consumed
/// together; stale per-client buckets are garbage collected on the same
/// lock as part of every refill.
pub struct RateLimiter {
    global_capacity: u64,
    per_client_capacity: u64,
    refill_interval: Duration,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(global_capacity: u64, per_client_capacity: u64, refill_interval_secs: u64) -> Self {
        let refill_interval = Duration::from_secs(refill_interval_secs.max(1));
        Self {
            global_capacity,
            per_client_capacity,
            refill_interval,
            state: Mutex::new(State {
                global: Bucket::new(global_capacity),
                per_client: HashMap::new(),
            }),
        }
    }

    /// Returns true if the request identified by `client_key` should be
    /// admitted. Refills and checks both the global and per-client buckets
    /// under a single lock, and consumes a token from each only if both
    /// have one available, so a per-client-limited request never drains
    /// the global bucket. Stale per-client entries are swept out of the
    /// same critical section.
    pub async fn admit(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        state.per_client.retain(|_, bucket| now.duration_since(bucket.last_seen) < STALE_AFTER);

        state.global.refill(self.global_capacity, self.refill_interval, now);

        let bucket = state
            .per_client
            .entry(client_key.to_string())
            .or_insert_with(|| Bucket::new(self.per_client_capacity));
        bucket.refill(self.per_client_capacity, self.refill_interval, now);
        bucket.last_seen = now;

        if !state.global.has_token() || !bucket.has_token() {
            return false;
        }
        state.global.consume();
        bucket.consume();
        true
    }

    /// Drops per-client buckets that haven't been touched in `older_than`.
    /// `admit` already sweeps entries older than 30s on every call; this is
    /// exposed for callers (tests, an idle server with no traffic) that
    /// want to force a sweep without waiting on a request.
    pub async fn gc(&self, older_than: Duration) {
        let now = Instant::now();
        self.state
            .lock()
            .await
            .per_client
            .retain(|_, bucket| now.duration_since(bucket.last_seen) < older_than);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_per_client_bucket_caps_single_client() {
        let limiter = RateLimiter::new(1000, 2, 60);
        assert!(limiter.admit("aa:bb:cc:dd:ee:ff").await);
        assert!(limiter.admit("aa:bb:cc:dd:ee:ff").await);
        assert!(!limiter.admit("aa:bb:cc:dd:ee:ff").await);
        // a different client still has its own budget
        assert!(limiter.admit("11:22:33:44:55:66").await);
    }

    #[tokio::test]
    async fn test_global_bucket_caps_aggregate() {
        let limiter = RateLimiter::new(1, 100, 60);
        assert!(limiter.admit("client-a").await);
        assert!(!limiter.admit("client-b").await);
    }

    #[tokio::test]
    async fn test_per_client_limit_does_not_drain_global_bucket() {
        // client-a burns its own budget; client-b must still admit through
        // the shared global bucket, which must not have been touched by
        // client-a's rejected second request.
        let limiter = RateLimiter::new(1000, 1, 60);
        assert!(limiter.admit("client-a").await);
        assert!(!limiter.admit("client-a").await);
        assert!(limiter.admit("client-b").await);
    }

    #[tokio::test]
    async fn test_gc_drops_stale_buckets() {
        let limiter = RateLimiter::new(1000, 5, 60);
        limiter.admit("stale-client").await;
        assert_eq!(limiter.state.lock().await.per_client.len(), 1);
        limiter.gc(Duration::from_secs(0)).await;
        assert_eq!(limiter.state.lock().await.per_client.len(), 0);
    }
}
