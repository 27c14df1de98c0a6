use std::sync::atomic::{AtomicU64, Ordering};

use display_protocol::HealthVerdict;
use serde::Serialize;

/// Thread-safe connection/broadcast counters and the health verdict derived
/// from them, per `spec.md` §4.9. Process-local only — these do not survive
/// a restart and are not shared across instances (unlike the revision
/// registry and snapshot cache, which live in the key-value store).
pub struct MetricsTracker {
    connections_active: AtomicU64,
    connections_total: AtomicU64,
    connections_failed: AtomicU64,
    broadcasts_sent: AtomicU64,
    broadcasts_failed: AtomicU64,
    broadcast_latency_sum_ms: AtomicU64,
    broadcast_latency_count: AtomicU64,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            connections_failed: AtomicU64::new(0),
            broadcasts_sent: AtomicU64::new(0),
            broadcasts_failed: AtomicU64::new(0),
            broadcast_latency_sum_ms: AtomicU64::new(0),
            broadcast_latency_count: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_succeeded(&self, latency_ms: u64) {
        self.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
        self.broadcast_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.broadcast_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_failed(&self) {
        self.broadcasts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let connections_active = self.connections_active.load(Ordering::Relaxed);
        let connections_total = self.connections_total.load(Ordering::Relaxed);
        let connections_failed = self.connections_failed.load(Ordering::Relaxed);
        let broadcasts_sent = self.broadcasts_sent.load(Ordering::Relaxed);
        let broadcasts_failed = self.broadcasts_failed.load(Ordering::Relaxed);
        let latency_sum = self.broadcast_latency_sum_ms.load(Ordering::Relaxed);
        let latency_count = self.broadcast_latency_count.load(Ordering::Relaxed);

        let avg_latency_ms = if latency_count > 0 {
            latency_sum as f64 / latency_count as f64
        } else {
            0.0
        };

        let health = health_verdict(
            connections_active,
            connections_total,
            connections_failed,
            broadcasts_sent,
            broadcasts_failed,
            avg_latency_ms,
        );

        MetricsSnapshot {
            connections_active,
            connections_total,
            connections_failed,
            broadcasts_sent,
            broadcasts_failed,
            avg_latency_ms,
            health,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_active: u64,
    pub connections_total: u64,
    pub connections_failed: u64,
    pub broadcasts_sent: u64,
    pub broadcasts_failed: u64,
    pub avg_latency_ms: f64,
    pub health: HealthVerdict,
}

fn health_verdict(
    connections_active: u64,
    connections_total: u64,
    connections_failed: u64,
    broadcasts_sent: u64,
    broadcasts_failed: u64,
    avg_latency_ms: f64,
) -> HealthVerdict {
    if connections_total > 0 && connections_failed as f64 / connections_total as f64 > 0.10 {
        return HealthVerdict::Critical;
    }

    let broadcast_total = broadcasts_sent + broadcasts_failed;
    let broadcast_failure_rate = if broadcast_total > 0 {
        broadcasts_failed as f64 / broadcast_total as f64
    } else {
        0.0
    };

    if (connections_active == 0 && connections_total > 10)
        || broadcast_failure_rate > 0.05
        || avg_latency_ms > 100.0
    {
        return HealthVerdict::Warning;
    }

    HealthVerdict::Ok
}
