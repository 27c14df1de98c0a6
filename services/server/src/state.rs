use std::sync::Arc;

use kv_store::{KvStore, RateLimiter, RevisionRegistry, SnapshotBuilder, SnapshotCache};
use sqlx::PgPool;

use crate::binding::DisplayScreenStore;
use crate::config::Config;
use crate::metrics::MetricsTracker;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub kv: Arc<dyn KvStore>,
    pub screens: Arc<dyn DisplayScreenStore>,
    pub registry: RevisionRegistry,
    pub cache: Arc<SnapshotCache>,
    pub builder: Arc<dyn SnapshotBuilder>,
    pub rate_limiter: RateLimiter,
    pub metrics: Arc<MetricsTracker>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        kv: Arc<dyn KvStore>,
        screens: Arc<dyn DisplayScreenStore>,
        builder: Arc<dyn SnapshotBuilder>,
        config: Config,
    ) -> Self {
        let registry = RevisionRegistry::with_bump_lock_ttl(kv.clone(), config.bump_lock_ttl);
        let cache = Arc::new(SnapshotCache::with_build_lock_ttl(
            kv.clone(),
            config.build_lock_ttl,
        ));
        let rate_limiter = RateLimiter::new(kv.clone());
        Self {
            pool,
            kv,
            screens,
            registry,
            cache,
            builder,
            rate_limiter,
            metrics: Arc::new(MetricsTracker::new()),
            config: Arc::new(config),
        }
    }
}
