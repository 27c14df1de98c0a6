use async_trait::async_trait;
use display_protocol::{
    Announcement, DutyItem, ExcellenceHighlight, PeriodBlock, PeriodClassEntry, Settings,
    StandbyEntry,
};
use thiserror::Error;

/// An entry in the day's schedule: either a teaching period or a break,
/// distinguished by `is_break`. The builder turns a list of these into
/// `current_period`/`next_period`/`day_path`/`state`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleBlock {
    pub period: PeriodBlock,
    pub is_break: bool,
    pub label: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream data provider error: {0}")]
    Upstream(String),
}

/// Abstracts the out-of-scope administrative data model (classes, teachers,
/// subjects, schedules, announcements, excellence) that a real deployment
/// owns. Every method returns an empty `Vec` (never an error) when the
/// upstream simply has no rows for the school, so the builder's
/// "tolerate partial data" contract holds — only a genuine upstream failure
/// (connection error, malformed row) surfaces as `ProviderError`.
#[async_trait]
pub trait ScheduleDataProvider: Send + Sync {
    async fn periods_and_breaks(&self, school_id: i64) -> Result<Vec<ScheduleBlock>, ProviderError>;
    async fn standby(&self, school_id: i64) -> Result<Vec<StandbyEntry>, ProviderError>;
    async fn period_classes(&self, school_id: i64) -> Result<Vec<PeriodClassEntry>, ProviderError>;
    async fn duty(&self, school_id: i64) -> Result<Vec<DutyItem>, ProviderError>;
    async fn announcements(&self, school_id: i64) -> Result<Vec<Announcement>, ProviderError>;
    async fn excellence(&self, school_id: i64) -> Result<Vec<ExcellenceHighlight>, ProviderError>;
    async fn settings(&self, school_id: i64) -> Result<Settings, ProviderError>;
}

/// Reference implementation backed by the illustrative schema in
/// `migrations/0001_display_screens.sql`. Not the focus of the exercise —
/// a real deployment brings its own administrative data model and its own
/// implementation of this trait.
pub struct PostgresScheduleDataProvider {
    pool: sqlx::PgPool,
}

impl PostgresScheduleDataProvider {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleDataProvider for PostgresScheduleDataProvider {
    async fn periods_and_breaks(&self, school_id: i64) -> Result<Vec<ScheduleBlock>, ProviderError> {
        crate::repo::schedule_tables::fetch_periods_and_breaks(&self.pool, school_id)
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))
    }

    async fn standby(&self, school_id: i64) -> Result<Vec<StandbyEntry>, ProviderError> {
        crate::repo::schedule_tables::fetch_standby(&self.pool, school_id)
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))
    }

    async fn period_classes(&self, school_id: i64) -> Result<Vec<PeriodClassEntry>, ProviderError> {
        crate::repo::schedule_tables::fetch_period_classes(&self.pool, school_id)
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))
    }

    async fn duty(&self, school_id: i64) -> Result<Vec<DutyItem>, ProviderError> {
        crate::repo::schedule_tables::fetch_duty(&self.pool, school_id)
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))
    }

    async fn announcements(&self, school_id: i64) -> Result<Vec<Announcement>, ProviderError> {
        crate::repo::schedule_tables::fetch_announcements(&self.pool, school_id)
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))
    }

    async fn excellence(&self, school_id: i64) -> Result<Vec<ExcellenceHighlight>, ProviderError> {
        crate::repo::schedule_tables::fetch_excellence(&self.pool, school_id)
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))
    }

    async fn settings(&self, school_id: i64) -> Result<Settings, ProviderError> {
        crate::repo::schedule_tables::fetch_settings(&self.pool, school_id)
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use async_trait::async_trait as at;

    /// An in-memory provider double for builder tests, grounded in the
    /// teacher's pattern of hand-rolled test doubles for trait-based
    /// dependencies (see `kv_store::cache`'s `CountingBuilder`).
    #[derive(Default)]
    pub struct FakeScheduleDataProvider {
        pub blocks: Vec<ScheduleBlock>,
        pub standby: Vec<StandbyEntry>,
        pub period_classes: Vec<PeriodClassEntry>,
        pub duty: Vec<DutyItem>,
        pub announcements: Vec<Announcement>,
        pub excellence: Vec<ExcellenceHighlight>,
        pub settings: Option<Settings>,
    }

    #[at]
    impl ScheduleDataProvider for FakeScheduleDataProvider {
        async fn periods_and_breaks(&self, _school_id: i64) -> Result<Vec<ScheduleBlock>, ProviderError> {
            Ok(self.blocks.clone())
        }
        async fn standby(&self, _school_id: i64) -> Result<Vec<StandbyEntry>, ProviderError> {
            Ok(self.standby.clone())
        }
        async fn period_classes(&self, _school_id: i64) -> Result<Vec<PeriodClassEntry>, ProviderError> {
            Ok(self.period_classes.clone())
        }
        async fn duty(&self, _school_id: i64) -> Result<Vec<DutyItem>, ProviderError> {
            Ok(self.duty.clone())
        }
        async fn announcements(&self, _school_id: i64) -> Result<Vec<Announcement>, ProviderError> {
            Ok(self.announcements.clone())
        }
        async fn excellence(&self, _school_id: i64) -> Result<Vec<ExcellenceHighlight>, ProviderError> {
            Ok(self.excellence.clone())
        }
        async fn settings(&self, _school_id: i64) -> Result<Settings, ProviderError> {
            Ok(self.settings.clone().unwrap_or(Settings {
                name: "Test School".to_owned(),
                logo_url: String::new(),
                theme: String::new(),
                school_type: String::new(),
                display_accent_color: "#2563eb".to_owned(),
                refresh_interval_sec: 30,
                standby_scroll_speed: 1.0,
                periods_scroll_speed: 1.0,
                featured_panel: "excellence".to_owned(),
            }))
        }
    }
}
