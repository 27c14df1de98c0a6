// kv-store: the single coordination substrate described in `spec.md` §2 —
// strings, atomic increment, conditional create, prefix scan, pub/sub, and
// approximate expiry — plus the revision registry, snapshot cache/build
// coordinator, lock guard, and rate limiter built on top of it.

pub mod cache;
pub mod in_memory;
pub mod lock;
pub mod ratelimit;
pub mod redis_store;
pub mod revision;
pub mod store;

pub use cache::{BuildError, CacheError, CachedSnapshot, SnapshotBuilder, SnapshotCache};
pub use in_memory::InMemoryKvStore;
pub use lock::{acquire_lock, LockGuard};
pub use ratelimit::RateLimiter;
pub use redis_store::RedisKvStore;
pub use revision::RevisionRegistry;
pub use store::{KvError, KvStore};
