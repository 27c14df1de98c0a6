use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use display_protocol::WsMessage;
use kv_store::KvStore;
use tracing::{error, warn};

use crate::metrics::MetricsTracker;

fn channel_name(school_id: i64) -> String {
    format!("school:{school_id}")
}

/// Turns a revision bump into a push notification, per `spec.md` §4.5.
/// Must only be invoked from `post_commit`, after the caller's own data
/// transaction has committed — never before, or a client could observe a
/// new revision whose data is not yet visible.
pub struct InvalidationBroadcaster {
    kv: Arc<dyn KvStore>,
    metrics: Arc<MetricsTracker>,
    ws_enabled: bool,
}

impl InvalidationBroadcaster {
    pub fn new(kv: Arc<dyn KvStore>, metrics: Arc<MetricsTracker>, ws_enabled: bool) -> Self {
        Self {
            kv,
            metrics,
            ws_enabled,
        }
    }

    pub async fn broadcast(&self, school_id: i64, revision: i64) {
        if !self.ws_enabled {
            return;
        }

        let msg = WsMessage::Invalidate {
            school_id,
            revision,
            ts: Utc::now().timestamp_millis(),
        };
        let Ok(payload) = serde_json::to_vec(&msg) else {
            error!(school_id, "failed to serialize invalidate message");
            return;
        };

        let started = Instant::now();
        match self.kv.publish(&channel_name(school_id), &payload).await {
            Ok(()) => {
                self.metrics
                    .broadcast_succeeded(started.elapsed().as_millis() as u64);
            }
            Err(e) => {
                warn!(school_id, error = %e, "invalidation broadcast failed");
                self.metrics.broadcast_failed();
            }
        }
    }
}
