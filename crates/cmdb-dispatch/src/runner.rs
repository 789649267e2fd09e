//! Executes one job attempt and the bounded retry loop.
//!
//! Every failure mode that originates inside a job (a registry miss, a
//! collector error or panic, an observer error, a telemetry write failure)
//! is absorbed here and turned into a run record and an event. Nothing from
//! inside a job propagates to the dispatcher.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};

use cmdb_core::{calendar, CollectorJob, TriggeredBy};

use crate::clock::Clock;
use crate::collector::CollectorOutput;
use crate::registry::Registry;
use crate::store::{
    NewEvent, RunCompletion, RunStatus, StatusStore, StoreError, EVENT_RUN_FAILED,
    EVENT_RUN_PARTIAL, EVENT_RUN_SUCCESS,
};

/// Terminal outcome of one run (or retry episode) of a job.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub job_name: String,
    /// `None` when even the initial status insert failed (telemetry loss,
    /// not a run failure).
    pub record_id: Option<i64>,
    pub status: RunStatus,
    pub rows_collected: i64,
    pub rows_inserted: i64,
    pub data_period: Option<String>,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
    /// Attempts consumed, including the one that produced this result.
    pub attempts: u32,
}

impl RunResult {
    /// Success and partial both count: the data landed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.status, RunStatus::Success | RunStatus::Partial)
    }
}

/// Best-effort post-success callback, keyed by job name.
///
/// The returned payload, if any, is merged into the success event's details.
/// Errors and panics are logged and never alter the job's terminal status.
#[async_trait::async_trait]
pub trait Observer: Send + Sync {
    async fn on_success(
        &self,
        job_name: &str,
        rows_collected: i64,
        data_period: Option<&str>,
    ) -> anyhow::Result<Option<Value>>;
}

pub struct Runner {
    registry: Arc<Registry>,
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    observers: HashMap<String, Vec<Arc<dyn Observer>>>,
}

impl Runner {
    #[must_use]
    pub fn new(registry: Arc<Registry>, store: Arc<dyn StatusStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            store,
            clock,
            observers: HashMap::new(),
        }
    }

    /// Attach a post-success observer for `job_name`.
    pub fn add_observer(&mut self, job_name: impl Into<String>, observer: Arc<dyn Observer>) {
        self.observers.entry(job_name.into()).or_default().push(observer);
    }

    /// Execute one attempt of `job`.
    ///
    /// Writes a `running` record, resolves and invokes the collector,
    /// finalizes the record, runs observers, and emits the outcome event.
    /// Always returns a terminal [`RunResult`]; never an error.
    pub async fn run(&self, job: &CollectorJob, triggered_by: TriggeredBy) -> RunResult {
        let started_at = self.clock.now_utc();
        tracing::info!(job = %job.name, triggered_by = %triggered_by, "run starting");

        let record_id = match self
            .store
            .insert_running(&job.name, triggered_by, started_at)
            .await
        {
            Ok(record) => Some(record.id),
            Err(e) => {
                tracing::warn!(job = %job.name, error = %e, "failed to persist running record; continuing");
                None
            }
        };

        let output = self.invoke_collector(job).await;

        let status = if output.success {
            if output.warnings.is_empty() {
                RunStatus::Success
            } else {
                RunStatus::Partial
            }
        } else {
            RunStatus::Failed
        };

        // Lag-days gives the period label its default; it never moves fires.
        let data_period = if status == RunStatus::Failed {
            output.data_period.clone()
        } else {
            output
                .data_period
                .clone()
                .or_else(|| Some(calendar::default_data_period(&job.schedule, started_at)))
        };

        let finished_at = self.clock.now_utc();
        let completion = RunCompletion {
            status,
            finished_at,
            rows_collected: output.records_fetched,
            rows_inserted: output.records_inserted,
            data_period: data_period.clone(),
            error_message: output.error_message.clone(),
            warnings: output.warnings.clone(),
        };

        if let Some(id) = record_id {
            if let Err(e) = self.store.finalize_run(id, completion).await {
                tracing::warn!(job = %job.name, run_id = id, error = %e, "failed to finalize run record");
            }
        }

        let mut details = json!({
            "job": job.name,
            "triggered_by": triggered_by.as_str(),
            "rows_collected": output.records_fetched,
            "rows_inserted": output.records_inserted,
            "data_period": data_period,
            "warnings": output.warnings,
            "error": output.error_message,
        });

        if status == RunStatus::Success {
            self.run_observers(job, output.records_fetched, data_period.as_deref(), &mut details)
                .await;
        }

        self.emit_outcome_event(job, status, &output, details, finished_at)
            .await;

        tracing::info!(job = %job.name, status = %status, rows = output.records_fetched, "run finished");

        RunResult {
            job_name: job.name.clone(),
            record_id,
            status,
            rows_collected: output.records_fetched,
            rows_inserted: output.records_inserted,
            data_period,
            error_message: output.error_message,
            warnings: output.warnings,
            attempts: 1,
        }
    }

    /// Execute up to `max_attempts` runs of `job`, sleeping `delay` between
    /// attempts, until one succeeds (fully or partially). Each attempt writes
    /// its own run record.
    pub async fn run_with_retry(
        &self,
        job: &CollectorJob,
        triggered_by: TriggeredBy,
        max_attempts: u32,
        delay: Duration,
    ) -> RunResult {
        let max_attempts = max_attempts.max(1);

        let mut result = self.run(job, triggered_by).await;
        result.attempts = 1;

        while !result.succeeded() && result.attempts < max_attempts {
            let attempt = result.attempts + 1;
            tracing::info!(
                job = %job.name,
                attempt,
                max_attempts,
                delay_secs = delay.as_secs(),
                "attempt failed; retrying"
            );
            tokio::time::sleep(delay).await;
            result = self.run(job, triggered_by).await;
            result.attempts = attempt;
        }

        result
    }

    /// Resolve the collector and invoke it inside a fault boundary.
    ///
    /// A registry miss, a collector error, and a collector panic all come
    /// back as a failed [`CollectorOutput`] rather than propagating.
    async fn invoke_collector(&self, job: &CollectorJob) -> CollectorOutput {
        let collector = match self.registry.get(job.collector_key()) {
            Ok(collector) => collector,
            Err(e) => {
                tracing::error!(job = %job.name, error = %e, "collector unavailable; job stays scheduled for its next fire");
                return CollectorOutput::failed(e.to_string());
            }
        };

        match AssertUnwindSafe(collector.collect()).catch_unwind().await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(job = %job.name, error = %format!("{e:#}"), "collector returned an error");
                CollectorOutput::failed(format!("{e:#}"))
            }
            Err(_) => {
                tracing::error!(job = %job.name, "collector panicked");
                CollectorOutput::failed("collector panicked")
            }
        }
    }

    /// Invoke every observer registered for the job, each in its own fault
    /// boundary, merging returned payloads into the event details.
    async fn run_observers(
        &self,
        job: &CollectorJob,
        rows_collected: i64,
        data_period: Option<&str>,
        details: &mut Value,
    ) {
        let Some(observers) = self.observers.get(&job.name) else {
            return;
        };

        for observer in observers {
            let call = observer.on_success(&job.name, rows_collected, data_period);
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(Some(payload))) => merge_enrichment(details, payload),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(job = %job.name, error = %format!("{e:#}"), "observer failed; job status unaffected");
                }
                Err(_) => {
                    tracing::warn!(job = %job.name, "observer panicked; job status unaffected");
                }
            }
        }
    }

    async fn emit_outcome_event(
        &self,
        job: &CollectorJob,
        status: RunStatus,
        output: &CollectorOutput,
        details: Value,
        at: chrono::DateTime<chrono::Utc>,
    ) {
        debug_assert!(status.is_terminal());
        let (event_type, priority, summary) = match status {
            RunStatus::Success | RunStatus::Running => (
                EVENT_RUN_SUCCESS,
                4,
                format!("{}: collected {} rows", job.name, output.records_fetched),
            ),
            RunStatus::Partial => (
                EVENT_RUN_PARTIAL,
                3,
                format!(
                    "{}: collected {} rows with {} warning(s)",
                    job.name,
                    output.records_fetched,
                    output.warnings.len()
                ),
            ),
            RunStatus::Failed => (
                EVENT_RUN_FAILED,
                2,
                format!(
                    "{}: failed: {}",
                    job.name,
                    output.error_message.as_deref().unwrap_or("unknown error")
                ),
            ),
        };

        let event = NewEvent {
            event_type: event_type.to_string(),
            source: job.name.clone(),
            summary,
            details,
            priority,
            created_at: at,
        };

        if let Err(e) = self.store.insert_event(event).await {
            log_telemetry_failure(&job.name, &e);
        }
    }
}

/// Merge an observer's enrichment payload into the event details. Object
/// payloads merge key-by-key; anything else lands under `"enrichment"`.
fn merge_enrichment(details: &mut Value, payload: Value) {
    match (details.as_object_mut(), payload) {
        (Some(map), Value::Object(extra)) => {
            for (key, value) in extra {
                map.insert(key, value);
            }
        }
        (Some(map), other) => {
            map.insert("enrichment".to_string(), other);
        }
        _ => {}
    }
}

fn log_telemetry_failure(job: &str, error: &StoreError) {
    tracing::warn!(job = %job, error = %error, "event write failed; execution unaffected");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;
