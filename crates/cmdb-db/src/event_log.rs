//! Database operations for the append-only `event_log`.
//!
//! Events are only ever inserted, through [`insert_event`], and read back
//! for operator listings and the overdue sweep's per-day deduplication.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `event_log` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub event_type: String,
    pub source: String,
    pub summary: String,
    pub details: Value,
    pub priority: i16,
    pub created_at: DateTime<Utc>,
}

/// Append one event. The single insert primitive for the audit stream.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_event(
    pool: &PgPool,
    event_type: &str,
    source: &str,
    summary: &str,
    details: &Value,
    priority: i16,
    created_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO event_log (event_type, source, summary, details, priority, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(event_type)
    .bind(source)
    .bind(summary)
    .bind(details)
    .bind(priority)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Whether an overdue event was already written for this job on `day` (UTC).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn overdue_event_exists_on(
    pool: &PgPool,
    job_name: &str,
    day: NaiveDate,
) -> Result<bool, DbError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS ( \
             SELECT 1 FROM event_log \
             WHERE event_type = 'source_overdue' \
               AND source = $1 \
               AND created_at >= $2 \
               AND created_at < $3 \
         )",
    )
    .bind(job_name)
    .bind(day.and_hms_opt(0, 0, 0).map(|t| t.and_utc()))
    .bind(
        day.succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc()),
    )
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

/// The most recent `limit` events, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_recent_events(pool: &PgPool, limit: i64) -> Result<Vec<EventRow>, DbError> {
    let rows = sqlx::query_as::<_, EventRow>(
        "SELECT id, event_type, source, summary, details, priority, created_at \
         FROM event_log \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
