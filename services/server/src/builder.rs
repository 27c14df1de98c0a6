use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use display_protocol::{
    DateInfo, DayPathEntry, DayPathKind, DutyPanel, PeriodBlock, ScheduleState, SnapshotDoc,
    SnapshotMeta, StateType,
};
use kv_store::{BuildError, SnapshotBuilder};

use crate::provider::{ProviderError, ScheduleDataProvider};

impl From<ProviderError> for BuildError {
    fn from(e: ProviderError) -> Self {
        BuildError::Provider(e.to_string())
    }
}

/// Minute-of-day, 0..1440. `"HH:MM"` is the only format the wire shape
/// allows (§6); a malformed value is treated as midnight rather than
/// failing the whole build — one bad row should not take the display down.
fn parse_hhmm(s: &str) -> u32 {
    let mut parts = s.splitn(2, ':');
    let h: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let m: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    h.clamp(0, 23) * 60 + m.clamp(0, 59)
}

fn minute_of_day(now: DateTime<Utc>) -> u32 {
    now.hour() * 60 + now.minute()
}

fn seconds_of_day(now: DateTime<Utc>) -> i64 {
    now.hour() as i64 * 3600 + now.minute() as i64 * 60 + now.second() as i64
}

/// Produces the full per-school snapshot document from the upstream
/// schedule data, deterministic in everything but `meta.now` and
/// `meta.schedule_revision`, per `spec.md` §4.2.
pub struct ScheduleSnapshotBuilder<P> {
    provider: P,
}

impl<P: ScheduleDataProvider> ScheduleSnapshotBuilder<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub async fn build_at(
        &self,
        school_id: i64,
        revision: i64,
        ws_enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<SnapshotDoc, BuildError> {
        let settings = self.provider.settings(school_id).await?;
        let blocks = self.provider.periods_and_breaks(school_id).await?;
        let standby = self.provider.standby(school_id).await?;
        let period_classes = self.provider.period_classes(school_id).await?;
        let duty = self.provider.duty(school_id).await?;
        let announcements = self.provider.announcements(school_id).await?;
        let excellence = self.provider.excellence(school_id).await?;

        let mut sorted = blocks.clone();
        sorted.sort_by_key(|b| parse_hhmm(&b.period.from));

        let now_min = minute_of_day(now);

        let active = sorted
            .iter()
            .find(|b| parse_hhmm(&b.period.from) <= now_min && now_min < parse_hhmm(&b.period.to));

        let (state_type, label, from, to, current_period) = match active {
            Some(block) if block.is_break => (
                StateType::Break,
                block.label.clone(),
                block.period.from.clone(),
                block.period.to.clone(),
                None,
            ),
            Some(block) => {
                let enriched = enrich_period(&block.period, &period_classes);
                (
                    StateType::Period,
                    block.label.clone(),
                    block.period.from.clone(),
                    block.period.to.clone(),
                    Some(enriched),
                )
            }
            None => {
                let first = sorted.first();
                let last = sorted.last();
                match (first, last) {
                    (Some(first), _) if now_min < parse_hhmm(&first.period.from) => (
                        StateType::Before,
                        "before school".to_owned(),
                        "00:00".to_owned(),
                        first.period.from.clone(),
                        None,
                    ),
                    (_, Some(last)) if now_min >= parse_hhmm(&last.period.to) => (
                        StateType::After,
                        "after school".to_owned(),
                        last.period.to.clone(),
                        "23:59".to_owned(),
                        None,
                    ),
                    (None, None) => (
                        StateType::Off,
                        "off".to_owned(),
                        "00:00".to_owned(),
                        "23:59".to_owned(),
                        None,
                    ),
                    _ => (
                        StateType::Off,
                        "off".to_owned(),
                        "00:00".to_owned(),
                        "23:59".to_owned(),
                        None,
                    ),
                }
            }
        };

        let boundary_min = parse_hhmm(&to);
        let remaining_seconds = if matches!(state_type, StateType::Period | StateType::Break | StateType::Before)
        {
            let boundary_seconds = boundary_min as i64 * 60;
            (boundary_seconds - seconds_of_day(now)).max(0)
        } else {
            0
        };

        let next_period = sorted
            .iter()
            .filter(|b| !b.is_break && parse_hhmm(&b.period.from) > now_min)
            .min_by_key(|b| parse_hhmm(&b.period.from))
            .map(|b| enrich_period(&b.period, &period_classes));

        let day_path = sorted
            .iter()
            .map(|b| DayPathEntry {
                from: b.period.from.clone(),
                to: b.period.to.clone(),
                label: b.label.clone(),
                kind: if b.is_break {
                    DayPathKind::Break
                } else {
                    DayPathKind::Period
                },
            })
            .collect();

        let local_date = now.format("%Y-%m-%d").to_string();

        Ok(SnapshotDoc {
            settings,
            state: ScheduleState {
                state_type,
                label,
                from,
                to,
                remaining_seconds,
            },
            current_period,
            next_period,
            day_path,
            standby,
            period_classes,
            duty: DutyPanel { items: duty },
            announcements,
            excellence,
            date_info: DateInfo {
                gregorian: serde_json::json!({ "date": local_date }),
                hijri: serde_json::Value::Null,
            },
            now,
            meta: SnapshotMeta {
                schedule_revision: revision,
                ws_enabled,
                is_stale: None,
                stale_warning: None,
                local_date,
            },
        })
    }
}

fn enrich_period(
    period: &PeriodBlock,
    period_classes: &[display_protocol::PeriodClassEntry],
) -> PeriodBlock {
    match period_classes.iter().find(|c| c.period_index == period.index) {
        Some(entry) => PeriodBlock {
            index: period.index,
            class: entry.class.clone(),
            subject: entry.subject.clone(),
            teacher: entry.teacher.clone(),
            from: period.from.clone(),
            to: period.to.clone(),
        },
        None => period.clone(),
    }
}

/// Bridges to the generic coordinator in `kv-store`, which only knows
/// about `(school_id, revision) -> Vec<u8>`; the canonical JSON encoding of
/// the document lives here, the caching/single-flight/stale-fallback
/// machinery lives in `kv_store::cache::SnapshotCache`.
pub struct WsAwareBuilder<P> {
    pub inner: ScheduleSnapshotBuilder<P>,
    pub ws_enabled: bool,
    pub clock: fn() -> DateTime<Utc>,
}

#[async_trait]
impl<P: ScheduleDataProvider + Send + Sync> SnapshotBuilder for WsAwareBuilder<P> {
    async fn build(&self, school_id: i64, revision: i64) -> Result<Vec<u8>, BuildError> {
        let now = (self.clock)();
        let doc = self
            .inner
            .build_at(school_id, revision, self.ws_enabled, now)
            .await?;
        serde_json::to_vec(&doc).map_err(|e| BuildError::Provider(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::test_support::FakeScheduleDataProvider;
    use chrono::TimeZone;
    use display_protocol::{DutyItem, DutyType, PeriodClassEntry};

    fn block(index: u32, from: &str, to: &str, is_break: bool, label: &str) -> crate::provider::ScheduleBlock {
        crate::provider::ScheduleBlock {
            period: PeriodBlock {
                index,
                class: String::new(),
                subject: String::new(),
                teacher: String::new(),
                from: from.to_owned(),
                to: to.to_owned(),
            },
            is_break,
            label: label.to_owned(),
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        at_sec(hour, minute, 0)
    }

    fn at_sec(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 26, hour, minute, second).unwrap()
    }

    #[tokio::test]
    async fn before_school_has_no_current_period_and_counts_down_to_first_block() {
        let provider = FakeScheduleDataProvider {
            blocks: vec![block(1, "08:00", "08:45", false, "Period 1")],
            ..Default::default()
        };
        let builder = ScheduleSnapshotBuilder::new(provider);
        let doc = builder.build_at(1, 7, true, at(7, 30)).await.unwrap();

        assert_eq!(doc.state.state_type, StateType::Before);
        assert!(doc.current_period.is_none());
        assert_eq!(doc.state.remaining_seconds, 30 * 60);
    }

    #[tokio::test]
    async fn during_a_period_current_period_is_enriched_from_period_classes() {
        let provider = FakeScheduleDataProvider {
            blocks: vec![block(3, "08:45", "09:30", false, "Period 3")],
            period_classes: vec![PeriodClassEntry {
                period_index: 3,
                class: "10-A".to_owned(),
                subject: "Math".to_owned(),
                teacher: "Ms. Ali".to_owned(),
            }],
            ..Default::default()
        };
        let builder = ScheduleSnapshotBuilder::new(provider);
        let doc = builder.build_at(1, 7, true, at(9, 0)).await.unwrap();

        assert_eq!(doc.state.state_type, StateType::Period);
        let current = doc.current_period.expect("should be in a period");
        assert_eq!(current.class, "10-A");
        assert_eq!(current.subject, "Math");
        assert_eq!(doc.state.remaining_seconds, 30 * 60);
    }

    #[tokio::test]
    async fn a_break_block_reports_break_with_no_current_period() {
        let provider = FakeScheduleDataProvider {
            blocks: vec![
                block(1, "08:00", "08:45", false, "Period 1"),
                block(0, "08:45", "09:00", true, "Recess"),
            ],
            ..Default::default()
        };
        let builder = ScheduleSnapshotBuilder::new(provider);
        let doc = builder.build_at(1, 7, true, at(8, 50)).await.unwrap();

        assert_eq!(doc.state.state_type, StateType::Break);
        assert!(doc.current_period.is_none());
    }

    #[tokio::test]
    async fn next_period_is_the_earliest_upcoming_non_break_block() {
        let provider = FakeScheduleDataProvider {
            blocks: vec![
                block(1, "08:00", "08:45", false, "Period 1"),
                block(0, "08:45", "09:00", true, "Recess"),
                block(2, "09:00", "09:45", false, "Period 2"),
            ],
            ..Default::default()
        };
        let builder = ScheduleSnapshotBuilder::new(provider);
        let doc = builder.build_at(1, 7, true, at(8, 10)).await.unwrap();

        let next = doc.next_period.expect("there is an upcoming period");
        assert_eq!(next.index, 2);
    }

    #[tokio::test]
    async fn after_the_last_block_state_is_after_with_zero_remaining() {
        let provider = FakeScheduleDataProvider {
            blocks: vec![block(1, "08:00", "08:45", false, "Period 1")],
            ..Default::default()
        };
        let builder = ScheduleSnapshotBuilder::new(provider);
        let doc = builder.build_at(1, 7, true, at(15, 0)).await.unwrap();

        assert_eq!(doc.state.state_type, StateType::After);
        assert_eq!(doc.state.remaining_seconds, 0);
    }

    #[tokio::test]
    async fn an_empty_schedule_reports_off_all_day() {
        let provider = FakeScheduleDataProvider::default();
        let builder = ScheduleSnapshotBuilder::new(provider);
        let doc = builder.build_at(1, 7, true, at(10, 0)).await.unwrap();

        assert_eq!(doc.state.state_type, StateType::Off);
        assert!(doc.current_period.is_none());
        assert!(doc.next_period.is_none());
    }

    #[tokio::test]
    async fn remaining_seconds_is_rounded_to_the_second_not_truncated_to_the_minute() {
        let provider = FakeScheduleDataProvider {
            blocks: vec![block(3, "08:45", "09:30", false, "Period 3")],
            ..Default::default()
        };
        let builder = ScheduleSnapshotBuilder::new(provider);
        let doc = builder
            .build_at(1, 7, true, at_sec(9, 29, 57))
            .await
            .unwrap();

        assert_eq!(doc.state.remaining_seconds, 3);
    }

    #[tokio::test]
    async fn missing_duty_and_announcements_produce_empty_lists_not_errors() {
        let provider = FakeScheduleDataProvider {
            blocks: vec![block(1, "08:00", "08:45", false, "Period 1")],
            duty: Vec::<DutyItem>::new(),
            ..Default::default()
        };
        let builder = ScheduleSnapshotBuilder::new(provider);
        let doc = builder.build_at(1, 7, true, at(8, 10)).await.unwrap();

        assert!(doc.duty.items.is_empty());
        assert!(doc.announcements.is_empty());
        assert!(doc.excellence.is_empty());
    }
}
