use std::time::{Duration, Instant};

use chrono::Utc;

const SNAP_THRESHOLD_MS: i64 = 30_000;
const EMA_NEW_WEIGHT: f64 = 0.2;
const DRIFT_THRESHOLD_MS: i64 = 1_000;
const RESYNC_THROTTLE: Duration = Duration::from_secs(5);

/// Tracks `server_clock_offset_ms` per `spec.md` §4.8: EMA-smoothed unless
/// the correction is large enough to distrust the running estimate, in
/// which case it snaps straight to the new sample.
pub struct ClockSync {
    offset_ms: i64,
    last_resync_request: Option<Instant>,
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSync {
    pub fn new() -> Self {
        Self {
            offset_ms: 0,
            last_resync_request: None,
        }
    }

    /// Rehydrates from a value persisted across a reload, so the first
    /// second after boot is not off by however stale the clock is.
    pub fn with_persisted_offset(offset_ms: i64) -> Self {
        Self {
            offset_ms,
            last_resync_request: None,
        }
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    pub fn synced_now_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.offset_ms
    }

    /// Feed a fresh `X-Server-Time-MS` sample into the offset estimate.
    pub fn observe_server_time(&mut self, server_time_ms: i64) {
        let local_now_ms = Utc::now().timestamp_millis();
        let sample_offset = server_time_ms - local_now_ms;

        if (sample_offset - self.offset_ms).abs() > SNAP_THRESHOLD_MS {
            self.offset_ms = sample_offset;
        } else {
            self.offset_ms = (EMA_NEW_WEIGHT * sample_offset as f64
                + (1.0 - EMA_NEW_WEIGHT) * self.offset_ms as f64) as i64;
        }
    }

    /// Compares elapsed wall time against elapsed ticker time (called once
    /// per second by the poll loop's countdown tick) and decides whether a
    /// re-sync is warranted, throttled to at most once per 5s.
    pub fn poll_drift(&mut self, elapsed_wall_ms: i64, elapsed_ticker_ms: i64, now: Instant) -> bool {
        let drift = (elapsed_wall_ms - elapsed_ticker_ms).abs();
        if drift <= DRIFT_THRESHOLD_MS {
            return false;
        }
        match self.last_resync_request {
            Some(last) if now.duration_since(last) < RESYNC_THROTTLE => false,
            _ => {
                self.last_resync_request = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_small_correction_is_smoothed_rather_than_snapped() {
        let mut sync = ClockSync::new();
        let server_time_ms = Utc::now().timestamp_millis() + 500;
        sync.observe_server_time(server_time_ms);
        assert!(sync.offset_ms() > 0 && sync.offset_ms() <= 500);
    }

    #[test]
    fn a_correction_past_the_snap_threshold_replaces_the_estimate_outright() {
        let mut sync = ClockSync::with_persisted_offset(100);
        let server_time_ms = Utc::now().timestamp_millis() + 60_000;
        sync.observe_server_time(server_time_ms);
        assert!((sync.offset_ms() - 60_000).abs() < 1_000);
    }

    #[test]
    fn drift_under_one_second_never_requests_a_resync() {
        let mut sync = ClockSync::new();
        assert!(!sync.poll_drift(1_000, 1_000, Instant::now()));
    }

    #[test]
    fn a_resync_request_is_throttled_to_once_per_five_seconds() {
        let mut sync = ClockSync::new();
        let t0 = Instant::now();
        assert!(sync.poll_drift(5_000, 2_000, t0));
        assert!(!sync.poll_drift(5_000, 2_000, t0));
    }
}
