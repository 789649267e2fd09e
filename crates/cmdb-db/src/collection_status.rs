//! Database operations for the `collection_status` run history.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `collection_status` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRecordRow {
    pub id: i64,
    pub public_id: Uuid,
    pub job_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rows_collected: i64,
    pub rows_inserted: i64,
    pub data_period: Option<String>,
    pub triggered_by: String,
    pub error_message: Option<String>,
    pub warnings: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

const RUN_COLUMNS: &str = "id, public_id, job_name, status, started_at, finished_at, \
     rows_collected, rows_inserted, data_period, triggered_by, error_message, \
     warnings, created_at";

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Insert a new record in `running` state and return it.
///
/// Generates a UUID in Rust and binds it to `public_id`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_running_record(
    pool: &PgPool,
    job_name: &str,
    triggered_by: &str,
    started_at: DateTime<Utc>,
) -> Result<RunRecordRow, DbError> {
    let public_id = Uuid::new_v4();

    let row = sqlx::query_as::<_, RunRecordRow>(&format!(
        "INSERT INTO collection_status (public_id, job_name, status, started_at, triggered_by) \
         VALUES ($1, $2, 'running', $3, $4) \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(public_id)
    .bind(job_name)
    .bind(started_at)
    .bind(triggered_by)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Move a `running` record to its terminal state.
///
/// The transition is guarded: a record that is not currently `running`
/// rejects the update, so a terminal state is written exactly once.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the record is not in
/// `running` state, or [`DbError::Sqlx`] if the update fails.
#[allow(clippy::too_many_arguments)]
pub async fn finalize_run_record(
    pool: &PgPool,
    id: i64,
    status: &str,
    finished_at: DateTime<Utc>,
    rows_collected: i64,
    rows_inserted: i64,
    data_period: Option<&str>,
    error_message: Option<&str>,
    warnings: &[String],
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE collection_status \
         SET status = $1, finished_at = $2, rows_collected = $3, rows_inserted = $4, \
             data_period = $5, error_message = $6, warnings = $7 \
         WHERE id = $8 AND status = 'running'",
    )
    .bind(status)
    .bind(finished_at)
    .bind(rows_collected)
    .bind(rows_inserted)
    .bind(data_period)
    .bind(error_message)
    .bind(Json(warnings))
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Fetch a single run record by its internal `id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists with the given `id`, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_run_record(pool: &PgPool, id: i64) -> Result<RunRecordRow, DbError> {
    let row = sqlx::query_as::<_, RunRecordRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM collection_status WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// The most recent `limit` runs, ordered newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_recent_runs(pool: &PgPool, limit: i64) -> Result<Vec<RunRecordRow>, DbError> {
    let rows = sqlx::query_as::<_, RunRecordRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM collection_status \
         ORDER BY started_at DESC, id DESC \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Latest successful run per job.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn last_success_times(pool: &PgPool) -> Result<Vec<(String, DateTime<Utc>)>, DbError> {
    let rows = sqlx::query_as::<_, (String, DateTime<Utc>)>(
        "SELECT job_name, MAX(finished_at) AS last_success_at \
         FROM collection_status \
         WHERE status = 'success' AND finished_at IS NOT NULL \
         GROUP BY job_name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
