//! Scenario 2 (`spec.md` §8): a burst of 50 concurrent upstream mutations
//! for one school increments the revision exactly once and publishes
//! exactly one invalidation message, once the bump actually succeeds.

use std::sync::Arc;

use display_fabric_server::broadcaster::InvalidationBroadcaster;
use display_fabric_server::metrics::MetricsTracker;
use kv_store::{InMemoryKvStore, KvStore, RevisionRegistry};

#[tokio::test]
async fn fifty_concurrent_mutations_bump_and_broadcast_exactly_once() {
    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let registry = RevisionRegistry::new(kv.clone());
    let metrics = Arc::new(MetricsTracker::new());
    let broadcaster = Arc::new(InvalidationBroadcaster::new(kv.clone(), metrics.clone(), true));

    registry.set(10, 10).await.unwrap();
    let mut subscription = kv.subscribe("school:10").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let registry = registry.clone();
        let broadcaster = broadcaster.clone();
        handles.push(tokio::spawn(async move {
            if registry.bump_debounced(10).await {
                broadcaster.broadcast(10, registry.get(10).await.unwrap()).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.get(10).await.unwrap(), 11);

    let first = subscription.recv().await.unwrap();
    let msg: display_protocol::WsMessage = serde_json::from_slice(&first).unwrap();
    assert_eq!(
        msg,
        display_protocol::WsMessage::Invalidate {
            school_id: 10,
            revision: 11,
            ts: match msg {
                display_protocol::WsMessage::Invalidate { ts, .. } => ts,
                _ => unreachable!(),
            },
        }
    );
    assert!(
        subscription.try_recv().is_err(),
        "exactly one invalidation should have been published"
    );
}
