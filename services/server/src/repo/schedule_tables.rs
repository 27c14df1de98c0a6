use display_protocol::{
    Announcement, DutyItem, DutyType, ExcellenceHighlight, PeriodBlock, PeriodClassEntry, Settings,
    StandbyEntry,
};
use sqlx::{PgPool, Row};

use crate::provider::ScheduleBlock;

pub async fn fetch_periods_and_breaks(
    pool: &PgPool,
    school_id: i64,
) -> Result<Vec<ScheduleBlock>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT period_index, label, from_time, to_time, kind FROM periods \
         WHERE school_id = $1 ORDER BY period_index ASC",
    )
    .bind(school_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let kind: String = row.get("kind");
            ScheduleBlock {
                period: PeriodBlock {
                    index: row.get::<i32, _>("period_index") as u32,
                    class: String::new(),
                    subject: String::new(),
                    teacher: String::new(),
                    from: row.get("from_time"),
                    to: row.get("to_time"),
                },
                label: row.get("label"),
                is_break: kind == "break",
            }
        })
        .collect())
}

pub async fn fetch_standby(
    pool: &PgPool,
    school_id: i64,
) -> Result<Vec<StandbyEntry>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT period_index, class, subject, teacher FROM standby_assignments \
         WHERE school_id = $1 ORDER BY period_index ASC",
    )
    .bind(school_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| StandbyEntry {
            period_index: row.get::<i32, _>("period_index") as u32,
            class: row.get("class"),
            subject: row.get("subject"),
            teacher: row.get("teacher"),
        })
        .collect())
}

pub async fn fetch_period_classes(
    pool: &PgPool,
    school_id: i64,
) -> Result<Vec<PeriodClassEntry>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT period_index, class, subject, teacher FROM period_classes \
         WHERE school_id = $1 ORDER BY period_index ASC",
    )
    .bind(school_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| PeriodClassEntry {
            period_index: row.get::<i32, _>("period_index") as u32,
            class: row.get("class"),
            subject: row.get("subject"),
            teacher: row.get("teacher"),
        })
        .collect())
}

pub async fn fetch_duty(pool: &PgPool, school_id: i64) -> Result<Vec<DutyItem>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT teacher, duty_type, duty_label, location FROM duty_assignments \
         WHERE school_id = $1 ORDER BY teacher ASC",
    )
    .bind(school_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let duty_type: String = row.get("duty_type");
            DutyItem {
                teacher: row.get("teacher"),
                duty_type: if duty_type == "supervision" {
                    DutyType::Supervision
                } else {
                    DutyType::Duty
                },
                duty_label: row.get("duty_label"),
                location: row.get("location"),
            }
        })
        .collect())
}

pub async fn fetch_announcements(
    pool: &PgPool,
    school_id: i64,
) -> Result<Vec<Announcement>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT announcement_id, title, body FROM announcements \
         WHERE school_id = $1 ORDER BY id ASC",
    )
    .bind(school_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Announcement {
            id: row.get("announcement_id"),
            title: row.get("title"),
            body: row.get("body"),
        })
        .collect())
}

pub async fn fetch_excellence(
    pool: &PgPool,
    school_id: i64,
) -> Result<Vec<ExcellenceHighlight>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT name, reason, image FROM excellence_highlights \
         WHERE school_id = $1 ORDER BY id ASC",
    )
    .bind(school_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ExcellenceHighlight {
            name: row.get("name"),
            reason: row.get("reason"),
            image: row.get("image"),
        })
        .collect())
}

pub async fn fetch_settings(pool: &PgPool, school_id: i64) -> Result<Settings, sqlx::Error> {
    let row = sqlx::query(
        "SELECT name, logo_url, theme, school_type, display_accent_color, \
                refresh_interval_sec, standby_scroll_speed, periods_scroll_speed, featured_panel \
         FROM school_settings WHERE school_id = $1",
    )
    .bind(school_id)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(row) => Settings {
            name: row.get("name"),
            logo_url: row.get("logo_url"),
            theme: row.get("theme"),
            school_type: row.get("school_type"),
            display_accent_color: row.get("display_accent_color"),
            refresh_interval_sec: row.get::<i32, _>("refresh_interval_sec") as u32,
            standby_scroll_speed: row.get("standby_scroll_speed"),
            periods_scroll_speed: row.get("periods_scroll_speed"),
            featured_panel: row.get("featured_panel"),
        },
        None => Settings {
            name: format!("School {school_id}"),
            logo_url: String::new(),
            theme: String::new(),
            school_type: String::new(),
            display_accent_color: "#2563eb".to_owned(),
            refresh_interval_sec: 30,
            standby_scroll_speed: 1.0,
            periods_scroll_speed: 1.0,
            featured_panel: "excellence".to_owned(),
        },
    })
}
