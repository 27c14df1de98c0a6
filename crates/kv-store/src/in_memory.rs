use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::store::{KvError, KvStore};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// Single-process reference implementation of [`KvStore`], backing unit
/// tests and single-instance deployments. Not shared across processes —
/// use [`crate::redis_store::RedisKvStore`] for that.
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn channel(&self, name: &str) -> broadcast::Sender<Vec<u8>> {
        if let Some(tx) = self.channels.read().unwrap().get(name) {
            return tx.clone();
        }
        let mut channels = self.channels.write().unwrap();
        if let Some(tx) = channels.get(name) {
            return tx.clone();
        }
        let (tx, _rx) = broadcast::channel(256);
        channels.insert(name.to_owned(), tx.clone());
        tx
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_vec(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.entries.write().unwrap();
        if entries.get(key).is_some_and(Entry::is_live) {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut entries = self.entries.write().unwrap();
        let current = entries
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| parse_i64(&e.value))
            .transpose()?
            .unwrap_or(0);
        let next = current + 1;
        let expires_at = entries.get(key).and_then(|e| e.expires_at);
        entries.insert(
            key.to_owned(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live())
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), KvError> {
        // A channel with no subscribers simply drops the message, matching
        // "delivery is best-effort, at-most-once" (spec.md §4.5).
        let _ = self.channel(channel).send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Vec<u8>>, KvError> {
        Ok(self.channel(channel).subscribe())
    }
}

fn parse_i64(bytes: &[u8]) -> Result<i64, KvError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(KvError::TypeMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_only_succeeds_once_until_the_key_expires_or_is_deleted() {
        let store = InMemoryKvStore::new();
        assert!(store
            .set_nx("bump_lock:7", b"1", Duration::from_secs(2))
            .await
            .unwrap());
        assert!(!store
            .set_nx("bump_lock:7", b"1", Duration::from_secs(2))
            .await
            .unwrap());
        store.delete("bump_lock:7").await.unwrap();
        assert!(store
            .set_nx("bump_lock:7", b"1", Duration::from_secs(2))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn set_nx_respects_short_ttl_expiry() {
        let store = InMemoryKvStore::new();
        assert!(store
            .set_nx("lock", b"1", Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store
            .set_nx("lock", b"1", Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn incr_starts_at_one_and_is_monotonic() {
        let store = InMemoryKvStore::new();
        assert_eq!(store.incr("rev:1").await.unwrap(), 1);
        assert_eq!(store.incr("rev:1").await.unwrap(), 2);
        assert_eq!(store.incr("rev:1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn scan_prefix_only_returns_live_matching_keys() {
        let store = InMemoryKvStore::new();
        store.set("snap:1:5", b"a", None).await.unwrap();
        store.set("snap:1:6", b"b", None).await.unwrap();
        store.set("snap:2:5", b"c", None).await.unwrap();
        store
            .set_nx("snap:1:7", b"d", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut keys = store.scan_prefix("snap:1:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["snap:1:5".to_owned(), "snap:1:6".to_owned()]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let store = InMemoryKvStore::new();
        store.publish("school:1", b"{}").await.unwrap();
    }

    #[tokio::test]
    async fn subscriber_receives_messages_published_after_subscribing() {
        let store = InMemoryKvStore::new();
        let mut rx = store.subscribe("school:1").await.unwrap();
        store.publish("school:1", b"hello").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, b"hello");
    }
}
