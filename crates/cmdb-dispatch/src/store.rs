//! Run-history and event persistence port.
//!
//! The dispatcher core writes through this trait only. `cmdb-db` implements
//! it over Postgres (`collection_status` / `event_log`); [`MemoryStatusStore`]
//! backs tests and embedders that run without a database.
//!
//! Writes here are best-effort telemetry from the caller's point of view: a
//! failed status update is logged by the caller and never aborts the job
//! whose outcome it was recording.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use cmdb_core::TriggeredBy;

/// Event type written when a scheduled run completes cleanly.
pub const EVENT_RUN_SUCCESS: &str = "run_success";
/// Event type for a run that succeeded but reported warnings.
pub const EVENT_RUN_PARTIAL: &str = "run_partial";
/// Event type for a failed run.
pub const EVENT_RUN_FAILED: &str = "run_failed";
/// Event type for a fire dropped past the misfire grace period.
pub const EVENT_RUN_MISSED: &str = "run_missed";
/// Event type for the daily staleness sweep's findings.
pub const EVENT_SOURCE_OVERDUE: &str = "source_overdue";
/// Event type for daemon lifecycle transitions.
pub const EVENT_DISPATCHER_STARTED: &str = "dispatcher_started";
pub const EVENT_DISPATCHER_STOPPED: &str = "dispatcher_stopped";
/// Event source used for events not attributable to a single job.
pub const SOURCE_DISPATCHER: &str = "dispatcher";

/// Status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Partial,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "partial" => Ok(RunStatus::Partial),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// One execution attempt of a job (a `collection_status` row).
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub public_id: Uuid,
    pub job_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rows_collected: i64,
    pub rows_inserted: i64,
    pub data_period: Option<String>,
    pub triggered_by: TriggeredBy,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
}

/// Terminal outcome applied once to a `running` record.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub finished_at: DateTime<Utc>,
    pub rows_collected: i64,
    pub rows_inserted: i64,
    pub data_period: Option<String>,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
}

/// An audit event to append to `event_log`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    /// Job name, or [`SOURCE_DISPATCHER`] for daemon-level events.
    pub source: String,
    pub summary: String,
    pub details: Value,
    /// 1 = urgent … 5 = informational.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

/// A stored audit event.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i64,
    pub event_type: String,
    pub source: String,
    pub summary: String,
    pub details: Value,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

/// Most recent successful run per job.
#[derive(Debug, Clone)]
pub struct JobLastSuccess {
    pub job_name: String,
    pub last_success_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run record {0} not found")]
    NotFound(i64),
    #[error("invalid status transition for run {id}: expected {expected}")]
    InvalidTransition { id: i64, expected: &'static str },
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Port over the run-history store.
#[async_trait::async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert a new record in `running` state and return it.
    async fn insert_running(
        &self,
        job_name: &str,
        triggered_by: TriggeredBy,
        started_at: DateTime<Utc>,
    ) -> Result<RunRecord, StoreError>;

    /// Move a `running` record to its terminal state.
    async fn finalize_run(&self, id: i64, completion: RunCompletion) -> Result<(), StoreError>;

    /// Append one event. This is the single insert primitive through which
    /// every event is written.
    async fn insert_event(&self, event: NewEvent) -> Result<(), StoreError>;

    /// Latest successful run per job, for the freshness view.
    async fn last_success_times(&self) -> Result<Vec<JobLastSuccess>, StoreError>;

    /// Whether an overdue event was already written for this job on `day`.
    async fn overdue_event_exists_on(
        &self,
        job_name: &str,
        day: NaiveDate,
    ) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    runs: Vec<RunRecord>,
    events: Vec<Event>,
    next_run_id: i64,
    next_event_id: i64,
    peak_running: HashMap<String, usize>,
}

/// In-memory [`StatusStore`] used by the test suite and by embedders that
/// want the dispatcher without a database.
///
/// Also tracks the peak number of simultaneously `running` records per job,
/// which the tests use to assert the overlap invariant.
#[derive(Default)]
pub struct MemoryStatusStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of all run records, in insertion order.
    #[must_use]
    pub fn runs(&self) -> Vec<RunRecord> {
        self.lock().runs.clone()
    }

    /// Snapshot of all events, in insertion order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    /// Highest number of records simultaneously `running` for `job_name`.
    #[must_use]
    pub fn peak_running(&self, job_name: &str) -> usize {
        self.lock().peak_running.get(job_name).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl StatusStore for MemoryStatusStore {
    async fn insert_running(
        &self,
        job_name: &str,
        triggered_by: TriggeredBy,
        started_at: DateTime<Utc>,
    ) -> Result<RunRecord, StoreError> {
        let mut inner = self.lock();
        inner.next_run_id += 1;
        let record = RunRecord {
            id: inner.next_run_id,
            public_id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            status: RunStatus::Running,
            started_at,
            finished_at: None,
            rows_collected: 0,
            rows_inserted: 0,
            data_period: None,
            triggered_by,
            error_message: None,
            warnings: Vec::new(),
        };
        inner.runs.push(record.clone());

        let concurrent = inner
            .runs
            .iter()
            .filter(|r| r.job_name == job_name && r.status == RunStatus::Running)
            .count();
        let peak = inner.peak_running.entry(job_name.to_string()).or_insert(0);
        *peak = (*peak).max(concurrent);

        Ok(record)
    }

    async fn finalize_run(&self, id: i64, completion: RunCompletion) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let record = inner
            .runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        if record.status != RunStatus::Running {
            return Err(StoreError::InvalidTransition {
                id,
                expected: "running",
            });
        }
        record.status = completion.status;
        record.finished_at = Some(completion.finished_at);
        record.rows_collected = completion.rows_collected;
        record.rows_inserted = completion.rows_inserted;
        record.data_period = completion.data_period;
        record.error_message = completion.error_message;
        record.warnings = completion.warnings;
        Ok(())
    }

    async fn insert_event(&self, event: NewEvent) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.next_event_id += 1;
        let stored = Event {
            id: inner.next_event_id,
            event_type: event.event_type,
            source: event.source,
            summary: event.summary,
            details: event.details,
            priority: event.priority,
            created_at: event.created_at,
        };
        inner.events.push(stored);
        Ok(())
    }

    async fn last_success_times(&self) -> Result<Vec<JobLastSuccess>, StoreError> {
        let inner = self.lock();
        let mut latest: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for run in inner.runs.iter().filter(|r| r.status == RunStatus::Success) {
            let at = run.finished_at.unwrap_or(run.started_at);
            latest
                .entry(run.job_name.as_str())
                .and_modify(|t| *t = (*t).max(at))
                .or_insert(at);
        }
        Ok(latest
            .into_iter()
            .map(|(job_name, last_success_at)| JobLastSuccess {
                job_name: job_name.to_string(),
                last_success_at,
            })
            .collect())
    }

    async fn overdue_event_exists_on(
        &self,
        job_name: &str,
        day: NaiveDate,
    ) -> Result<bool, StoreError> {
        let inner = self.lock();
        Ok(inner.events.iter().any(|e| {
            e.event_type == EVENT_SOURCE_OVERDUE
                && e.source == job_name
                && e.created_at.date_naive() == day
        }))
    }
}
