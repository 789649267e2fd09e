//! Postgres implementation of the dispatcher's [`StatusStore`] port.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

use cmdb_core::TriggeredBy;
use cmdb_dispatch::store::JobLastSuccess;
use cmdb_dispatch::{NewEvent, RunCompletion, RunRecord, RunStatus, StatusStore, StoreError};

use crate::{collection_status, event_log, DbError};

/// [`StatusStore`] over the `collection_status` / `event_log` tables.
#[derive(Debug, Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(e: DbError) -> StoreError {
    match e {
        DbError::InvalidRunTransition {
            id,
            expected_status,
        } => StoreError::InvalidTransition {
            id,
            expected: expected_status,
        },
        other => StoreError::Backend(Box::new(other)),
    }
}

fn to_record(row: collection_status::RunRecordRow) -> Result<RunRecord, StoreError> {
    let status = RunStatus::from_str(&row.status).map_err(|e| StoreError::Backend(e.into()))?;
    let triggered_by =
        TriggeredBy::from_str(&row.triggered_by).map_err(|e| StoreError::Backend(e.into()))?;
    Ok(RunRecord {
        id: row.id,
        public_id: row.public_id,
        job_name: row.job_name,
        status,
        started_at: row.started_at,
        finished_at: row.finished_at,
        rows_collected: row.rows_collected,
        rows_inserted: row.rows_inserted,
        data_period: row.data_period,
        triggered_by,
        error_message: row.error_message,
        warnings: row.warnings.0,
    })
}

#[async_trait::async_trait]
impl StatusStore for PgStatusStore {
    async fn insert_running(
        &self,
        job_name: &str,
        triggered_by: TriggeredBy,
        started_at: DateTime<Utc>,
    ) -> Result<RunRecord, StoreError> {
        let row = collection_status::insert_running_record(
            &self.pool,
            job_name,
            triggered_by.as_str(),
            started_at,
        )
        .await
        .map_err(backend)?;
        to_record(row)
    }

    async fn finalize_run(&self, id: i64, completion: RunCompletion) -> Result<(), StoreError> {
        collection_status::finalize_run_record(
            &self.pool,
            id,
            completion.status.as_str(),
            completion.finished_at,
            completion.rows_collected,
            completion.rows_inserted,
            completion.data_period.as_deref(),
            completion.error_message.as_deref(),
            &completion.warnings,
        )
        .await
        .map_err(backend)
    }

    async fn insert_event(&self, event: NewEvent) -> Result<(), StoreError> {
        event_log::insert_event(
            &self.pool,
            &event.event_type,
            &event.source,
            &event.summary,
            &event.details,
            i16::from(event.priority),
            event.created_at,
        )
        .await
        .map_err(backend)
    }

    async fn last_success_times(&self) -> Result<Vec<JobLastSuccess>, StoreError> {
        let rows = collection_status::last_success_times(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(|(job_name, last_success_at)| JobLastSuccess {
                job_name,
                last_success_at,
            })
            .collect())
    }

    async fn overdue_event_exists_on(
        &self,
        job_name: &str,
        day: NaiveDate,
    ) -> Result<bool, StoreError> {
        event_log::overdue_event_exists_on(&self.pool, job_name, day)
            .await
            .map_err(backend)
    }
}
