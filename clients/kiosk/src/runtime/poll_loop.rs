use std::sync::Arc;
use std::time::Duration;

use display_protocol::SnapshotDoc;
use rand::Rng;
use tracing::warn;

use crate::api::{ApiError, DisplayApi, SnapshotOutcome};
use crate::runtime::backoff::{adaptive_backoff_seconds, first_load_retry_seconds, jittered, Activity};
use crate::runtime::clock_sync::ClockSync;

const TRANSITION_WINDOW_SECONDS: i64 = 15;
const TRANSITION_POLL_SECONDS: f64 = 1.2;
const RATE_LIMIT_WAIT_SECONDS: f64 = 15.0;
const WS_INVALIDATE_DELAY_MS: u64 = 500;

/// A 403 the client cannot recover from by retrying; the loop stops
/// polling entirely and the renderer shows a terminal message
/// (`spec.md` §4.8 "Error" bullet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    ScreenUnknown,
    ScreenBound,
    DeviceRequired,
}

pub enum StepOutcome {
    /// A new or first snapshot was fetched and should be rendered.
    Render { doc: SnapshotDoc, next_poll: Duration },
    /// Status replied `304` or the snapshot's `ETag` matched; nothing to render.
    NoChange { next_poll: Duration },
    /// A transient error occurred; the caller should retry after `next_poll`.
    Retrying { next_poll: Duration },
    /// A terminal error; the caller should stop calling `step` and show a blocker.
    Blocked(BlockReason),
}

/// Drives the status-first polling / transition-window / backoff state
/// machine described in `spec.md` §4.8. One instance per display tab.
pub struct PollLoop {
    api: Arc<dyn DisplayApi>,
    pub clock: ClockSync,
    base_refresh_s: f64,
    anti_stampede_offset_s: u64,
    activity: Activity,
    status_304_streak: u32,
    network_failures: u32,
    etag: Option<String>,
    schedule_revision: i64,
    pending_rev: Option<i64>,
    transition_until_ms: Option<i64>,
    booted: bool,
    blocked: Option<BlockReason>,
}

impl PollLoop {
    pub fn new(api: Arc<dyn DisplayApi>, base_refresh_s: f64, anti_stampede_offset_s: u64) -> Self {
        Self {
            api,
            clock: ClockSync::new(),
            base_refresh_s,
            anti_stampede_offset_s,
            activity: Activity::Active,
            status_304_streak: 0,
            network_failures: 0,
            etag: None,
            schedule_revision: 0,
            pending_rev: None,
            transition_until_ms: None,
            booted: false,
            blocked: None,
        }
    }

    pub fn set_activity(&mut self, activity: Activity) {
        self.activity = activity;
    }

    /// Schools configure their own `refresh_interval_sec`; the snapshot body
    /// is authoritative over whatever base interval the loop was started
    /// with, so the render driver updates this after every fetch.
    pub fn set_base_refresh_seconds(&mut self, seconds: f64) {
        self.base_refresh_s = seconds;
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }

    /// The anti-stampede delay for a countdown-zero boundary event: a
    /// deterministic per-screen offset plus 1-15s of jitter, so a fleet of
    /// screens on the same bell schedule does not all fire in the same
    /// 100ms window. The caller (the real run loop) awaits this before
    /// calling [`enter_transition_window`](Self::enter_transition_window).
    pub fn anti_stampede_delay(&self) -> Duration {
        let jitter_s = rand::thread_rng().gen_range(1..=15);
        Duration::from_secs(self.anti_stampede_offset_s + jitter_s)
    }

    /// Called when the countdown reaches zero (after the anti-stampede
    /// delay has elapsed): the client optimistically advances and enters
    /// the accelerated snapshot-fetch window.
    pub fn enter_transition_window(&mut self) {
        self.transition_until_ms = Some(self.clock.synced_now_ms() + TRANSITION_WINDOW_SECONDS * 1000);
    }

    /// Called when a WS `invalidate` arrives: schedules an accelerated
    /// snapshot fetch rather than waiting out the current backoff.
    pub fn note_invalidate(&mut self, revision: i64) {
        self.pending_rev = Some(revision);
    }

    pub async fn step(&mut self) -> StepOutcome {
        if self.blocked.is_some() {
            return StepOutcome::Blocked(self.blocked.unwrap());
        }

        if !self.booted {
            return self.boot().await;
        }

        if let Some(until) = self.transition_until_ms {
            if self.clock.synced_now_ms() < until {
                return self.fetch_snapshot(true).await;
            }
            self.transition_until_ms = None;
        }

        if self.pending_rev.take().is_some() {
            let small_jitter_ms = rand::thread_rng().gen_range(0..300);
            tokio::time::sleep(Duration::from_millis(WS_INVALIDATE_DELAY_MS + small_jitter_ms)).await;
            return self.fetch_snapshot(false).await;
        }

        self.poll_status().await
    }

    async fn boot(&mut self) -> StepOutcome {
        match self.api.snapshot(None, Duration::from_secs(15)).await {
            Ok(SnapshotOutcome::Fresh {
                doc,
                etag,
                server_time_ms,
            }) => {
                self.clock.observe_server_time(server_time_ms);
                self.etag = Some(etag);
                self.schedule_revision = doc.meta.schedule_revision;
                self.booted = true;
                self.network_failures = 0;
                StepOutcome::Render {
                    doc,
                    next_poll: self.steady_state_interval(),
                }
            }
            Ok(SnapshotOutcome::NotModified { server_time_ms }) => {
                self.clock.observe_server_time(server_time_ms);
                self.booted = true;
                StepOutcome::NoChange {
                    next_poll: self.steady_state_interval(),
                }
            }
            Err(e) => self.handle_error(e, true),
        }
    }

    async fn poll_status(&mut self) -> StepOutcome {
        match self.api.status(self.schedule_revision, Duration::from_secs(9)).await {
            Ok(outcome) => {
                self.clock.observe_server_time(outcome.server_time_ms);
                self.schedule_revision = outcome.schedule_revision;
                if outcome.fetch_required {
                    self.status_304_streak = 0;
                    self.fetch_snapshot(false).await
                } else {
                    self.status_304_streak = self.status_304_streak.saturating_add(1);
                    StepOutcome::NoChange {
                        next_poll: self.steady_state_interval(),
                    }
                }
            }
            Err(e) => self.handle_error(e, false),
        }
    }

    async fn fetch_snapshot(&mut self, in_transition: bool) -> StepOutcome {
        match self
            .api
            .snapshot(self.etag.as_deref(), Duration::from_secs(9))
            .await
        {
            Ok(SnapshotOutcome::Fresh {
                doc,
                etag,
                server_time_ms,
            }) => {
                self.clock.observe_server_time(server_time_ms);
                self.etag = Some(etag);
                self.schedule_revision = doc.meta.schedule_revision;
                self.network_failures = 0;
                if doc.state.remaining_seconds > 0 {
                    self.transition_until_ms = None;
                }
                let next_poll = if self.transition_until_ms.is_some() {
                    Duration::from_secs_f64(TRANSITION_POLL_SECONDS)
                } else {
                    self.steady_state_interval()
                };
                StepOutcome::Render { doc, next_poll }
            }
            Ok(SnapshotOutcome::NotModified { server_time_ms }) => {
                self.clock.observe_server_time(server_time_ms);
                let next_poll = if in_transition {
                    Duration::from_secs_f64(TRANSITION_POLL_SECONDS)
                } else {
                    self.steady_state_interval()
                };
                StepOutcome::NoChange { next_poll }
            }
            Err(e) => self.handle_error(e, false),
        }
    }

    fn handle_error(&mut self, error: ApiError, first_load: bool) -> StepOutcome {
        match error {
            ApiError::RateLimited => {
                warn!("display api: rate limited, backing off");
                StepOutcome::Retrying {
                    next_poll: Duration::from_secs_f64(RATE_LIMIT_WAIT_SECONDS),
                }
            }
            ApiError::ScreenBound => {
                self.blocked = Some(BlockReason::ScreenBound);
                StepOutcome::Blocked(BlockReason::ScreenBound)
            }
            ApiError::DeviceRequired => {
                self.blocked = Some(BlockReason::DeviceRequired);
                StepOutcome::Blocked(BlockReason::DeviceRequired)
            }
            ApiError::ScreenUnknown => {
                self.blocked = Some(BlockReason::ScreenUnknown);
                StepOutcome::Blocked(BlockReason::ScreenUnknown)
            }
            ApiError::Network(msg) | ApiError::Server(msg) => {
                warn!(error = %msg, first_load, "display api: transient failure");
                let attempt = self.network_failures;
                self.network_failures = self.network_failures.saturating_add(1);
                let mut rng = rand::thread_rng();
                let base = first_load_retry_seconds(attempt);
                StepOutcome::Retrying {
                    next_poll: jittered(base, &mut rng),
                }
            }
        }
    }

    fn steady_state_interval(&self) -> Duration {
        let base = adaptive_backoff_seconds(self.base_refresh_s, self.status_304_streak, self.activity);
        let mut rng = rand::thread_rng();
        jittered(base, &mut rng)
    }
}
