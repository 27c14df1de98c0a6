use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::sleep;
use tracing::error;

use crate::lock::acquire_lock;
use crate::revision::RevisionRegistry;
use crate::store::{KvError, KvStore};

const DEFAULT_BUILD_LOCK_TTL: Duration = Duration::from_secs(10);
const STALE_WAIT_POLL: Duration = Duration::from_millis(50);
const STALE_WAIT_BUDGET: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("upstream data provider error: {0}")]
    Provider(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Cache miss, the build lock is held elsewhere, and no stale fallback
    /// exists. Maps to HTTP 503 `build_unavailable` (`spec.md` §4.3, §7).
    #[error("no cached snapshot and the build lock is held elsewhere")]
    Unavailable,
}

/// Produces the snapshot document bytes for a school at a given revision.
/// Kept abstract here so the cache/coordinator stay agnostic of the
/// document shape; `services/server` supplies the concrete implementation
/// that consults the upstream data providers.
#[async_trait]
pub trait SnapshotBuilder: Send + Sync {
    async fn build(&self, school_id: i64, revision: i64) -> Result<Vec<u8>, BuildError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSnapshot {
    pub body: Vec<u8>,
    pub etag: String,
    pub revision: i64,
    pub is_stale: bool,
}

fn snap_key(school_id: i64, revision: i64) -> String {
    format!("snap:{school_id}:{revision}")
}

fn snap_prefix(school_id: i64) -> String {
    format!("snap:{school_id}:")
}

fn build_lock_key(school_id: i64) -> String {
    format!("build_lock:{school_id}")
}

fn strong_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{digest:x}\"")
}

fn revision_from_key(key: &str, prefix: &str) -> Option<i64> {
    key.strip_prefix(prefix)?.parse().ok()
}

/// Keyed by `(school_id, revision)`; implements the single-flight
/// build-or-stale-fallback read path of `spec.md` §4.3.
pub struct SnapshotCache {
    store: Arc<dyn KvStore>,
    build_lock_ttl: Duration,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            build_lock_ttl: DEFAULT_BUILD_LOCK_TTL,
        }
    }

    pub fn with_build_lock_ttl(store: Arc<dyn KvStore>, build_lock_ttl: Duration) -> Self {
        Self {
            store,
            build_lock_ttl,
        }
    }

    pub async fn get_or_build(
        &self,
        school_id: i64,
        registry: &RevisionRegistry,
        builder: &dyn SnapshotBuilder,
    ) -> Result<CachedSnapshot, CacheError> {
        let revision = registry.get(school_id).await?;
        let key = snap_key(school_id, revision);

        if let Some(body) = self.store.get(&key).await? {
            return Ok(CachedSnapshot {
                etag: strong_etag(&body),
                body,
                revision,
                is_stale: false,
            });
        }

        match acquire_lock(self.store.clone(), build_lock_key(school_id), self.build_lock_ttl)
            .await?
        {
            Some(guard) => {
                let result = builder.build(school_id, revision).await;
                guard.release().await;
                let body = result?;
                self.store.set(&key, &body, None).await?;
                Ok(CachedSnapshot {
                    etag: strong_etag(&body),
                    body,
                    revision,
                    is_stale: false,
                })
            }
            None => self.serve_stale_or_wait(school_id, revision).await,
        }
    }

    async fn serve_stale_or_wait(
        &self,
        school_id: i64,
        revision: i64,
    ) -> Result<CachedSnapshot, CacheError> {
        if let Some(stale) = self.newest_stale_entry(school_id).await? {
            return Ok(stale);
        }

        let mut waited = Duration::ZERO;
        while waited < STALE_WAIT_BUDGET {
            sleep(STALE_WAIT_POLL).await;
            waited += STALE_WAIT_POLL;
            if let Some(body) = self.store.get(&snap_key(school_id, revision)).await? {
                return Ok(CachedSnapshot {
                    etag: strong_etag(&body),
                    body,
                    revision,
                    is_stale: false,
                });
            }
        }

        error!(school_id, "snapshot cache miss with no stale fallback after waiting");
        Err(CacheError::Unavailable)
    }

    async fn newest_stale_entry(&self, school_id: i64) -> Result<Option<CachedSnapshot>, KvError> {
        let prefix = snap_prefix(school_id);
        let mut keys = self.store.scan_prefix(&prefix).await?;
        keys.sort_by_key(|k| revision_from_key(k, &prefix).unwrap_or(i64::MIN));
        let Some(newest_key) = keys.pop() else {
            return Ok(None);
        };
        let Some(revision) = revision_from_key(&newest_key, &prefix) else {
            return Ok(None);
        };
        let Some(body) = self.store.get(&newest_key).await? else {
            return Ok(None);
        };
        Ok(Some(CachedSnapshot {
            etag: strong_etag(&body),
            body,
            revision,
            is_stale: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryKvStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBuilder {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SnapshotBuilder for CountingBuilder {
        async fn build(&self, school_id: i64, revision: i64) -> Result<Vec<u8>, BuildError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BuildError::Provider("boom".to_owned()));
            }
            Ok(format!("{{\"school_id\":{school_id},\"revision\":{revision}}}").into_bytes())
        }
    }

    #[tokio::test]
    async fn cold_start_builds_once_then_serves_from_cache() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let registry = RevisionRegistry::new(store.clone());
        registry.set(7, 7).await.unwrap();
        let cache = SnapshotCache::new(store);
        let builder = CountingBuilder {
            calls: AtomicUsize::new(0),
            fail: false,
        };

        let first = cache.get_or_build(7, &registry, &builder).await.unwrap();
        assert_eq!(first.revision, 7);
        assert!(!first.is_stale);
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);

        let second = cache.get_or_build(7, &registry, &builder).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1, "second read is a cache hit");
    }

    #[tokio::test]
    async fn etag_is_stable_for_byte_identical_documents() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let registry = RevisionRegistry::new(store.clone());
        registry.set(1, 1).await.unwrap();
        let cache = SnapshotCache::new(store);
        let builder = CountingBuilder {
            calls: AtomicUsize::new(0),
            fail: false,
        };

        let a = cache.get_or_build(1, &registry, &builder).await.unwrap();
        let b = cache.get_or_build(1, &registry, &builder).await.unwrap();
        assert_eq!(a.etag, b.etag);
    }

    #[tokio::test]
    async fn stale_fallback_is_served_when_build_lock_is_held_and_an_older_entry_exists() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let registry = RevisionRegistry::new(store.clone());
        registry.set(5, 39).await.unwrap();
        let cache = SnapshotCache::new(store.clone());
        let builder = CountingBuilder {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let stale = cache.get_or_build(5, &registry, &builder).await.unwrap();
        assert!(!stale.is_stale);

        registry.set(5, 42).await.unwrap();
        let guard = acquire_lock(store.clone(), "build_lock:5", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let result = cache.get_or_build(5, &registry, &builder).await.unwrap();
        assert!(result.is_stale);
        assert_eq!(result.revision, 39);

        drop(guard);
    }

    #[tokio::test]
    async fn build_failure_propagates_as_a_typed_error() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let registry = RevisionRegistry::new(store.clone());
        registry.set(9, 1).await.unwrap();
        let cache = SnapshotCache::new(store);
        let builder = CountingBuilder {
            calls: AtomicUsize::new(0),
            fail: true,
        };

        let result = cache.get_or_build(9, &registry, &builder).await;
        assert!(matches!(result, Err(CacheError::Build(_))));
    }
}
