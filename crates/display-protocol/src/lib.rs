// display-protocol: wire types shared by the snapshot server and display
// clients.
//
// The snapshot document (`SnapshotDoc`) is the payload returned by the
// snapshot HTTP endpoint; `WsMessage` is the (tiny) set of messages carried
// over the push invalidation WebSocket. Field shapes here are the frozen
// contract — changing them is a wire break.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Snapshot document
// ---------------------------------------------------------------------------

/// Display settings echoed from school configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub name: String,
    #[serde(default)]
    pub logo_url: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub school_type: String,
    #[serde(default = "default_accent_color")]
    pub display_accent_color: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_sec: u32,
    #[serde(default = "default_scroll_speed")]
    pub standby_scroll_speed: f32,
    #[serde(default = "default_scroll_speed")]
    pub periods_scroll_speed: f32,
    #[serde(default = "default_featured_panel")]
    pub featured_panel: String,
}

fn default_accent_color() -> String {
    "#2563eb".to_owned()
}
fn default_refresh_interval() -> u32 {
    30
}
fn default_scroll_speed() -> f32 {
    1.0
}
fn default_featured_panel() -> String {
    "excellence".to_owned()
}

/// Tagged union for the current schedule state. `current_period` is
/// non-null iff `state_type == Period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Before,
    Period,
    Break,
    Off,
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    #[serde(rename = "type")]
    pub state_type: StateType,
    pub label: String,
    pub from: String,
    pub to: String,
    /// Clamped to >= 0, rounded to the nearest second. Sanity-checked by
    /// clients against a wall-clock derived countdown, not trusted blindly.
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodBlock {
    pub index: u32,
    pub class: String,
    pub subject: String,
    pub teacher: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPathKind {
    Period,
    Break,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPathEntry {
    pub from: String,
    pub to: String,
    pub label: String,
    pub kind: DayPathKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandbyEntry {
    pub period_index: u32,
    pub class: String,
    pub subject: String,
    pub teacher: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodClassEntry {
    pub period_index: u32,
    pub class: String,
    pub subject: String,
    pub teacher: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutyType {
    Supervision,
    Duty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutyItem {
    pub teacher: String,
    pub duty_type: DutyType,
    pub duty_label: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutyPanel {
    pub items: Vec<DutyItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcellenceHighlight {
    pub name: String,
    pub reason: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateInfo {
    pub gregorian: serde_json::Value,
    pub hijri: serde_json::Value,
}

/// Metadata the client relies on for cache busting and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub schedule_revision: i64,
    pub ws_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_stale: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_warning: Option<String>,
    pub local_date: String,
}

/// The full per-school display document. Every list field defaults to
/// empty so a partial upstream (missing announcements, no duty roster for
/// today, ...) still produces a well-formed document — the builder never
/// fails because a dependent collection is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDoc {
    pub settings: Settings,
    pub state: ScheduleState,
    pub current_period: Option<PeriodBlock>,
    pub next_period: Option<PeriodBlock>,
    #[serde(default)]
    pub day_path: Vec<DayPathEntry>,
    #[serde(default)]
    pub standby: Vec<StandbyEntry>,
    #[serde(default)]
    pub period_classes: Vec<PeriodClassEntry>,
    pub duty: DutyPanel,
    #[serde(default)]
    pub announcements: Vec<Announcement>,
    #[serde(default)]
    pub excellence: Vec<ExcellenceHighlight>,
    pub date_info: DateInfo,
    pub now: DateTime<Utc>,
    pub meta: SnapshotMeta,
}

// ---------------------------------------------------------------------------
// WebSocket push messages
// ---------------------------------------------------------------------------

/// All WS message kinds on the push invalidation plane. Serializes using
/// the `type` field as a tag, e.g. `{"type": "invalidate", "revision": 7}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum WsMessage {
    Ping,
    Pong,
    Invalidate {
        school_id: i64,
        revision: i64,
        ts: i64,
    },
}

/// Frozen WS close codes (see `spec.md` §4.6). 4400/4403/4408 are
/// permanent; clients must not reconnect on those. Anything else is
/// transient.
pub mod close_codes {
    pub const BAD_PARAMS: u16 = 4400;
    pub const UNKNOWN_TOKEN: u16 = 4403;
    pub const DEVICE_BOUND_ELSEWHERE: u16 = 4408;
}

// ---------------------------------------------------------------------------
// HTTP API types
// ---------------------------------------------------------------------------

/// Frozen HTTP error envelope used by all non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// User-visible wire error codes (`spec.md` §7).
pub mod error_codes {
    pub const SCREEN_UNKNOWN: &str = "screen_unknown";
    pub const SCREEN_BOUND: &str = "screen_bound";
    pub const DEVICE_REQUIRED: &str = "device_required";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const BUILD_UNAVAILABLE: &str = "build_unavailable";
    pub const BAD_REQUEST: &str = "bad_request";
}

/// Response body for `GET /api/display/status/<token>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub schedule_revision: i64,
    pub fetch_required: bool,
}

/// Response body for `GET /api/display/ws-metrics/`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WsMetricsResponse {
    pub connections_active: u64,
    pub connections_total: u64,
    pub connections_failed: u64,
    pub broadcasts_sent: u64,
    pub broadcasts_failed: u64,
    pub avg_broadcast_latency_ms: f64,
    pub health: HealthVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Ok,
    Warning,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_meta_omits_stale_fields_when_fresh() {
        let meta = SnapshotMeta {
            schedule_revision: 7,
            ws_enabled: true,
            is_stale: None,
            stale_warning: None,
            local_date: "2026-07-26".to_owned(),
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("is_stale"));
        assert!(!json.contains("stale_warning"));
    }

    #[test]
    fn ws_message_invalidate_round_trips_with_type_tag() {
        let msg = WsMessage::Invalidate {
            school_id: 42,
            revision: 9,
            ts: 1_700_000_000,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"invalidate","school_id":42,"revision":9,"ts":1700000000}"#
        );
        let parsed: WsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn ws_message_ping_pong_have_no_extra_fields() {
        assert_eq!(serde_json::to_string(&WsMessage::Ping).unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(serde_json::to_string(&WsMessage::Pong).unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn settings_defaults_fill_in_missing_optional_fields() {
        let json = r#"{"name": "Example School"}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.refresh_interval_sec, 30);
        assert_eq!(settings.featured_panel, "excellence");
        assert!((settings.standby_scroll_speed - 1.0).abs() < f32::EPSILON);
    }
}
