use std::sync::Arc;
use std::time::Duration;

use crate::store::{KvError, KvStore};

const DEFAULT_WINDOW: Duration = Duration::from_secs(1);
const DEFAULT_BURST: i64 = 3;

/// Fixed-window counter rate limiter keyed by `ratelimit:<token>:<device>`,
/// enforcing `spec.md` §4.4's "≤ 1 req/s steady, short bursts allowed".
/// Applied identically to the status and snapshot endpoints.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    window: Duration,
    burst: i64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            window: DEFAULT_WINDOW,
            burst: DEFAULT_BURST,
        }
    }

    pub fn with_limits(store: Arc<dyn KvStore>, window: Duration, burst: i64) -> Self {
        Self {
            store,
            window,
            burst,
        }
    }

    /// Returns `true` when the request may proceed.
    pub async fn check(&self, token: &str, device_id: &str) -> Result<bool, KvError> {
        let key = format!("ratelimit:{token}:{device_id}");
        let count = self.store.incr(&key).await?;
        if count == 1 {
            // First hit of a fresh window: attach the window TTL so the
            // counter resets itself instead of growing forever.
            self.store
                .set(&key, count.to_string().as_bytes(), Some(self.window))
                .await?;
        }
        Ok(count <= self.burst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryKvStore;

    #[tokio::test]
    async fn requests_within_the_burst_are_allowed() {
        let limiter = RateLimiter::new(Arc::new(InMemoryKvStore::new()));
        assert!(limiter.check("tok", "dev").await.unwrap());
        assert!(limiter.check("tok", "dev").await.unwrap());
        assert!(limiter.check("tok", "dev").await.unwrap());
    }

    #[tokio::test]
    async fn requests_beyond_the_burst_in_one_window_are_rejected() {
        let limiter = RateLimiter::with_limits(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(1),
            2,
        );
        assert!(limiter.check("tok", "dev").await.unwrap());
        assert!(limiter.check("tok", "dev").await.unwrap());
        assert!(!limiter.check("tok", "dev").await.unwrap());
    }

    #[tokio::test]
    async fn different_devices_on_the_same_token_are_independent() {
        let limiter = RateLimiter::with_limits(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(1),
            1,
        );
        assert!(limiter.check("tok", "dev-a").await.unwrap());
        assert!(limiter.check("tok", "dev-b").await.unwrap());
    }

    #[tokio::test]
    async fn the_window_resets_after_it_expires() {
        let limiter = RateLimiter::with_limits(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_millis(20),
            1,
        );
        assert!(limiter.check("tok", "dev").await.unwrap());
        assert!(!limiter.check("tok", "dev").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(limiter.check("tok", "dev").await.unwrap());
    }
}
