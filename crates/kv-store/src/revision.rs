use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::store::{KvError, KvStore};

const DEFAULT_BUMP_LOCK_TTL: Duration = Duration::from_secs(2);

fn rev_key(school_id: i64) -> String {
    format!("rev:{school_id}")
}

fn bump_lock_key(school_id: i64) -> String {
    format!("bump_lock:{school_id}")
}

/// Per-school monotonically-increasing revision counter with debounced
/// bumping (`spec.md` §4.1). The authoritative value lives entirely in the
/// key-value store; this struct adds no caching of its own, since every
/// cache key elsewhere is keyed off the live revision.
#[derive(Clone)]
pub struct RevisionRegistry {
    store: Arc<dyn KvStore>,
    bump_lock_ttl: Duration,
}

impl RevisionRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            bump_lock_ttl: DEFAULT_BUMP_LOCK_TTL,
        }
    }

    pub fn with_bump_lock_ttl(store: Arc<dyn KvStore>, bump_lock_ttl: Duration) -> Self {
        Self {
            store,
            bump_lock_ttl,
        }
    }

    pub async fn get(&self, school_id: i64) -> Result<i64, KvError> {
        match self.store.get(&rev_key(school_id)).await? {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(KvError::TypeMismatch),
            None => Ok(0),
        }
    }

    /// Administrative recovery only: forces the registry to an explicit
    /// value, bypassing the debounce lock entirely.
    pub async fn set(&self, school_id: i64, value: i64) -> Result<(), KvError> {
        self.store
            .set(&rev_key(school_id), value.to_string().as_bytes(), None)
            .await
    }

    /// Attempt to bump the revision for `school_id`. At most one caller in
    /// any `bump_lock_ttl` window actually increments; everyone else is a
    /// no-op. Never surfaces a KV-store error to the caller's transaction —
    /// it logs and returns `false`, exactly as `spec.md` §4.1 requires
    /// ("a bump must never raise to the caller's transaction").
    pub async fn bump_debounced(&self, school_id: i64) -> bool {
        let acquired = match self
            .store
            .set_nx(&bump_lock_key(school_id), b"1", self.bump_lock_ttl)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                error!(school_id, error = %e, "bump_debounced: lock acquisition failed");
                return false;
            }
        };
        if !acquired {
            return false;
        }
        // The lock is intentionally non-renewable and never explicitly
        // released; it simply expires after `bump_lock_ttl`, which is the
        // debounce window itself.
        match self.store.incr(&rev_key(school_id)).await {
            Ok(_) => true,
            Err(e) => {
                error!(school_id, error = %e, "bump_debounced: increment failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryKvStore;
    use std::sync::Arc;

    fn registry() -> RevisionRegistry {
        RevisionRegistry::new(Arc::new(InMemoryKvStore::new()))
    }

    #[tokio::test]
    async fn get_on_an_unseen_school_returns_zero() {
        let reg = registry();
        assert_eq!(reg.get(999).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bump_debounced_returning_true_strictly_increases_the_revision() {
        let reg = registry();
        let before = reg.get(1).await.unwrap();
        assert!(reg.bump_debounced(1).await);
        let after = reg.get(1).await.unwrap();
        assert!(after > before);
    }

    #[tokio::test]
    async fn a_burst_of_bumps_within_the_debounce_window_increments_exactly_once() {
        let reg = registry();
        let mut successes = 0;
        for _ in 0..50 {
            if reg.bump_debounced(7).await {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(reg.get(7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_bypasses_the_debounce_lock_for_admin_recovery() {
        let reg = registry();
        reg.set(3, 42).await.unwrap();
        assert_eq!(reg.get(3).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn bumps_for_different_schools_are_independent() {
        let reg = registry();
        assert!(reg.bump_debounced(1).await);
        assert!(reg.bump_debounced(2).await);
        assert_eq!(reg.get(1).await.unwrap(), 1);
        assert_eq!(reg.get(2).await.unwrap(), 1);
    }
}
