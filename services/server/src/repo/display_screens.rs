use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayScreenRow {
    pub id: i64,
    pub token: String,
    pub school_id: i64,
    pub bound_device_id: Option<String>,
    pub bound_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

fn row_to_screen(row: sqlx::postgres::PgRow) -> DisplayScreenRow {
    DisplayScreenRow {
        id: row.get("id"),
        token: row.get("token"),
        school_id: row.get("school_id"),
        bound_device_id: row.get("bound_device_id"),
        bound_at: row.get("bound_at"),
        is_active: row.get("is_active"),
    }
}

pub async fn find_active_by_token(
    pool: &PgPool,
    token: &str,
) -> Result<Option<DisplayScreenRow>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, token, school_id, bound_device_id, bound_at, is_active \
         FROM display_screens WHERE token = $1 AND is_active = true",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(row_to_screen))
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<DisplayScreenRow>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, token, school_id, bound_device_id, bound_at, is_active \
         FROM display_screens WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(row_to_screen))
}

/// `UPDATE ... WHERE id = $1 AND bound_device_id IS NULL`, returning the
/// number of rows touched (0 or 1 — never more, `id` is a primary key).
pub async fn bind_if_unbound(
    pool: &PgPool,
    id: i64,
    device_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE display_screens SET bound_device_id = $1, bound_at = now() \
         WHERE id = $2 AND bound_device_id IS NULL",
    )
    .bind(device_id)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
pub async fn insert_for_test(
    pool: &PgPool,
    token: &str,
    school_id: i64,
) -> Result<DisplayScreenRow, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO display_screens (token, school_id) VALUES ($1, $2) \
         RETURNING id, token, school_id, bound_device_id, bound_at, is_active",
    )
    .bind(token)
    .bind(school_id)
    .fetch_one(pool)
    .await?;
    Ok(row_to_screen(row))
}
