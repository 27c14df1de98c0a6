use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("key-value store returned an unexpected value for the requested operation")]
    TypeMismatch,
}

/// The coordination primitive every other component in this crate is built
/// on: strings, atomic increment, conditional create, prefix scan, pub/sub,
/// and approximate expiry. Mirrors the external key-value service described
/// in `spec.md` §2 item 1 — an in-memory service, not a relational store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Set unconditionally, with an optional expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError>;

    /// Conditional create: set only if the key does not already exist.
    /// Returns `true` if this call created the key.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, KvError>;

    /// Atomically increment a counter key (creating it at 0 first if
    /// absent) and return the new value.
    async fn incr(&self, key: &str) -> Result<i64, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// List every key currently matching `prefix`. Approximate: a key that
    /// expires mid-scan may or may not be included, matching a real KV
    /// store's scan semantics.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), KvError>;

    /// Subscribe to a channel. The returned receiver observes messages
    /// published after the call returns; delivery is best-effort,
    /// at-most-once, matching `spec.md` §4.5's ordering guarantees.
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Vec<u8>>, KvError>;
}
