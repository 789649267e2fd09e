//! Read-only access to the `data_freshness` view.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `data_freshness` view.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FreshnessRow {
    pub job_name: String,
    pub last_success_at: Option<DateTime<Utc>>,
    pub hours_since: Option<f64>,
}

/// All rows of the freshness view.
///
/// Jobs that have never succeeded do not appear; the caller joins against
/// the configured job list and decides overdue-ness from each job's
/// expected frequency.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn query_data_freshness(pool: &PgPool) -> Result<Vec<FreshnessRow>, DbError> {
    let rows = sqlx::query_as::<_, FreshnessRow>(
        "SELECT job_name, last_success_at, hours_since FROM data_freshness ORDER BY job_name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
