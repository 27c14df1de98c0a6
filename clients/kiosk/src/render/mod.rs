pub mod terminal;

use chrono::NaiveTime;
use display_protocol::{
    Announcement, DayPathEntry, DutyItem, ExcellenceHighlight, PeriodBlock, PeriodClassEntry,
    SnapshotDoc, StandbyEntry, StateType,
};
use thiserror::Error;

use crate::runtime::BlockReason;

const ANNOUNCEMENT_CADENCE_MS: i64 = 6_500;
const EXCELLENCE_CADENCE_MS: i64 = 7_000;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render backend error: {0}")]
    Backend(String),
}

/// The deterministic, testable projection of a [`SnapshotDoc`] at a given
/// synchronized instant. All countdown/progress/rotation math lives here so
/// it can be unit tested without a terminal; [`terminal::TerminalRenderer`]
/// only draws whatever this struct says to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayView {
    pub headline: String,
    pub state_type: StateType,
    pub countdown_seconds: i64,
    pub progress_fraction: f32,
    pub current_period: Option<PeriodBlock>,
    pub next_period: Option<PeriodBlock>,
    pub day_path: Vec<DayPathEntry>,
    pub standby: Vec<StandbyEntry>,
    pub period_classes: Vec<PeriodClassEntry>,
    pub duty: Vec<DutyItem>,
    pub active_announcement: Option<Announcement>,
    pub active_excellence: Option<ExcellenceHighlight>,
    pub day_over: bool,
    pub accent_color: String,
}

/// Parses an `"HH:MM"` wall-clock label against `local_date`, returning
/// milliseconds since the Unix epoch. Falls back to `fallback_ms` (the
/// synchronized "now") if the label cannot be parsed — a malformed
/// upstream schedule must not crash rendering.
fn time_label_to_ms(label: &str, local_date: &str, fallback_ms: i64) -> i64 {
    let Ok(date) = chrono::NaiveDate::parse_from_str(local_date, "%Y-%m-%d") else {
        return fallback_ms;
    };
    let Ok(time) = NaiveTime::parse_from_str(label, "%H:%M") else {
        return fallback_ms;
    };
    date.and_time(time).and_utc().timestamp_millis()
}

/// Builds the view for the current tick. `synced_now_ms` is the client's
/// clock-synchronized "now" (`ClockSync::synced_now_ms`); countdown and
/// progress are derived entirely from it and `state.from`/`state.to`, with
/// the server's `remaining_seconds` used only as a sanity bound
/// (`spec.md` §4.8: `-12h..+24h`).
pub fn build_view(doc: &SnapshotDoc, synced_now_ms: i64, elapsed_since_boot_ms: i64) -> DisplayView {
    let from_ms = time_label_to_ms(&doc.state.from, &doc.meta.local_date, synced_now_ms);
    let to_ms = time_label_to_ms(&doc.state.to, &doc.meta.local_date, synced_now_ms);

    let local_remaining_s = (to_ms - synced_now_ms) / 1000;
    let sane_lower = -12 * 3600;
    let sane_upper = 24 * 3600;
    let countdown_seconds = if (sane_lower..=sane_upper).contains(&local_remaining_s) {
        local_remaining_s.max(0)
    } else {
        doc.state.remaining_seconds
    };

    let total_span_ms = (to_ms - from_ms).max(1);
    let elapsed_ms = (synced_now_ms - from_ms).clamp(0, total_span_ms);
    let progress_fraction = (elapsed_ms as f32 / total_span_ms as f32).clamp(0.0, 1.0);

    let day_over = matches!(doc.state.state_type, StateType::After);
    let active_period_index = doc.current_period.as_ref().map(|p| p.index);

    let standby = filter_by_period(&doc.standby, active_period_index, day_over, |e| e.period_index);
    let period_classes = filter_by_period(&doc.period_classes, active_period_index, day_over, |e| e.period_index);

    let active_announcement = rotate(&doc.announcements, elapsed_since_boot_ms, ANNOUNCEMENT_CADENCE_MS);
    let active_excellence = rotate(&doc.excellence, elapsed_since_boot_ms, EXCELLENCE_CADENCE_MS);

    DisplayView {
        headline: doc.state.label.clone(),
        state_type: doc.state.state_type,
        countdown_seconds,
        progress_fraction,
        current_period: doc.current_period.clone(),
        next_period: doc.next_period.clone(),
        day_path: doc.day_path.clone(),
        standby,
        period_classes,
        duty: doc.duty.items.clone(),
        active_announcement,
        active_excellence,
        day_over,
        accent_color: doc.settings.display_accent_color.clone(),
    }
}

/// Lists for periods earlier than the active one are hidden; once the day
/// is over every list is empty (`spec.md` §4.8 "Rendering").
fn filter_by_period<T: Clone>(
    items: &[T],
    active_period_index: Option<u32>,
    day_over: bool,
    index_of: impl Fn(&T) -> u32,
) -> Vec<T> {
    if day_over {
        return Vec::new();
    }
    match active_period_index {
        Some(active) => items.iter().filter(|e| index_of(e) >= active).cloned().collect(),
        None => items.to_vec(),
    }
}

/// Picks the entry active at `elapsed_ms` on a fixed rotation cadence.
/// Suspended (returns `None`) when the list is empty.
fn rotate<T: Clone>(items: &[T], elapsed_ms: i64, cadence_ms: i64) -> Option<T> {
    if items.is_empty() {
        return None;
    }
    let slot = (elapsed_ms / cadence_ms).rem_euclid(items.len() as i64) as usize;
    items.get(slot).cloned()
}

/// A render backend. Implementations must not panic — a render exception
/// must not take down the polling loop (`spec.md` §4.8 "Failure
/// isolation"); callers treat `Err` as "log it and try again next tick."
pub trait Renderer {
    fn render(&mut self, view: &DisplayView) -> Result<(), RenderError>;
    fn render_loading(&mut self) -> Result<(), RenderError>;
    fn render_blocked(&mut self, reason: BlockReason) -> Result<(), RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use display_protocol::{DateInfo, DutyPanel, ScheduleState, Settings, SnapshotMeta};

    fn doc_with(from: &str, to: &str, state_type: StateType) -> SnapshotDoc {
        SnapshotDoc {
            settings: Settings {
                name: "Test".to_owned(),
                logo_url: String::new(),
                theme: String::new(),
                school_type: String::new(),
                display_accent_color: "#2563eb".to_owned(),
                refresh_interval_sec: 30,
                standby_scroll_speed: 1.0,
                periods_scroll_speed: 1.0,
                featured_panel: "excellence".to_owned(),
            },
            state: ScheduleState {
                state_type,
                label: "Period 1".to_owned(),
                from: from.to_owned(),
                to: to.to_owned(),
                remaining_seconds: 600,
            },
            current_period: Some(PeriodBlock {
                index: 2,
                class: "10A".to_owned(),
                subject: "Math".to_owned(),
                teacher: "Ms. X".to_owned(),
                from: from.to_owned(),
                to: to.to_owned(),
            }),
            next_period: None,
            day_path: vec![],
            standby: vec![
                StandbyEntry { period_index: 1, class: "10A".to_owned(), subject: "Art".to_owned(), teacher: "Mr. Y".to_owned() },
                StandbyEntry { period_index: 3, class: "10A".to_owned(), subject: "Gym".to_owned(), teacher: "Mr. Z".to_owned() },
            ],
            period_classes: vec![],
            duty: DutyPanel { items: vec![] },
            announcements: vec![
                Announcement { id: "1".to_owned(), title: "A".to_owned(), body: "a".to_owned() },
                Announcement { id: "2".to_owned(), title: "B".to_owned(), body: "b".to_owned() },
            ],
            excellence: vec![],
            date_info: DateInfo { gregorian: serde_json::Value::Null, hijri: serde_json::Value::Null },
            now: chrono::Utc::now(),
            meta: SnapshotMeta {
                schedule_revision: 1,
                ws_enabled: true,
                is_stale: None,
                stale_warning: None,
                local_date: "2026-07-26".to_owned(),
            },
        }
    }

    #[test]
    fn progress_and_countdown_are_derived_from_the_synced_clock() {
        let doc = doc_with("08:00", "08:50", StateType::Period);
        let from_ms = time_label_to_ms("08:00", "2026-07-26", 0);
        let now_ms = from_ms + 10 * 60 * 1000;
        let view = build_view(&doc, now_ms, 0);
        assert!(view.progress_fraction > 0.0 && view.progress_fraction < 1.0);
        assert_eq!(view.countdown_seconds, 40 * 60);
    }

    #[test]
    fn lists_before_the_active_period_are_hidden() {
        let doc = doc_with("08:00", "08:50", StateType::Period);
        let from_ms = time_label_to_ms("08:00", "2026-07-26", 0);
        let view = build_view(&doc, from_ms, 0);
        assert_eq!(view.standby.len(), 1);
        assert_eq!(view.standby[0].period_index, 3);
    }

    #[test]
    fn after_day_over_every_list_is_empty() {
        let doc = doc_with("16:00", "16:00", StateType::After);
        let view = build_view(&doc, 0, 0);
        assert!(view.standby.is_empty());
        assert!(view.day_over);
    }

    #[test]
    fn announcements_rotate_on_a_fixed_cadence() {
        let doc = doc_with("08:00", "08:50", StateType::Period);
        let first = build_view(&doc, 0, 0).active_announcement.unwrap();
        let second = build_view(&doc, 0, ANNOUNCEMENT_CADENCE_MS).active_announcement.unwrap();
        assert_ne!(first.id, second.id);
    }
}
