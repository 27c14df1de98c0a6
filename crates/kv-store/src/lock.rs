use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::store::{KvError, KvStore};

/// An acquired single-flight lock. Release happens on every exit path,
/// including panics: `Drop` spawns a best-effort delete if [`release`]
/// was never called explicitly (`spec.md` §9, "scoped resources").
///
/// [`release`]: LockGuard::release
pub struct LockGuard {
    store: Arc<dyn KvStore>,
    key: String,
    released: bool,
}

impl LockGuard {
    /// Release the lock now, awaiting the delete. Prefer this over letting
    /// the guard drop when the caller can afford to await.
    pub async fn release(mut self) {
        if let Err(e) = self.store.delete(&self.key).await {
            warn!(key = %self.key, error = %e, "failed to release lock explicitly");
        }
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            if let Err(e) = store.delete(&key).await {
                warn!(%key, error = %e, "failed to release lock on drop");
            }
        });
    }
}

/// Try to acquire a TTL-bounded lock at `key`. Returns `None` if another
/// holder already owns it; the caller never blocks.
pub async fn acquire_lock(
    store: Arc<dyn KvStore>,
    key: impl Into<String>,
    ttl: Duration,
) -> Result<Option<LockGuard>, KvError> {
    let key = key.into();
    let acquired = store.set_nx(&key, b"1", ttl).await?;
    if acquired {
        Ok(Some(LockGuard {
            store,
            key,
            released: false,
        }))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryKvStore;

    #[tokio::test]
    async fn second_acquire_fails_while_first_guard_is_held() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let first = acquire_lock(store.clone(), "build_lock:1", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = acquire_lock(store.clone(), "build_lock:1", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn explicit_release_allows_immediate_reacquire() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let guard = acquire_lock(store.clone(), "build_lock:2", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        guard.release().await;

        let second = acquire_lock(store.clone(), "build_lock:2", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn dropping_a_guard_without_releasing_eventually_frees_the_lock() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        {
            let _guard = acquire_lock(store.clone(), "build_lock:3", Duration::from_secs(10))
                .await
                .unwrap()
                .unwrap();
        }
        // Drop spawns the release; yield so the spawned task runs.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let second = acquire_lock(store.clone(), "build_lock:3", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(second.is_some());
    }
}
