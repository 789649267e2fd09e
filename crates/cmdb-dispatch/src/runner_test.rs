use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveTime, TimeZone, Utc, Weekday};
use serde_json::json;

use cmdb_core::{CollectorJob, Frequency, ReleaseSchedule, TriggeredBy};

use super::*;
use crate::clock::Clock;
use crate::collector::Collector;
use crate::store::{Event, MemoryStatusStore, RunRecord};

// A Friday at 19:30 UTC == 15:30 America/New_York (EDT).
fn fire_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 11, 19, 30, 0).unwrap()
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

fn test_job(name: &str) -> CollectorJob {
    CollectorJob {
        name: name.to_string(),
        collector: None,
        schedule: ReleaseSchedule {
            frequency: Frequency::Weekly,
            day_of_week: Some(Weekday::Fri),
            day_of_month: None,
            time_of_day: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            timezone: chrono_tz::America::New_York,
            lag_days: 3,
            description: None,
        },
        priority: 1,
        enabled: true,
        retry_attempts: 3,
        retry_delay_secs: 0,
        topics: vec!["metals".to_string()],
        prerequisites: Vec::new(),
    }
}

enum Scripted {
    Output(CollectorOutput),
    Error(String),
    Panic,
}

/// Replays a fixed script of outcomes; panics if called more often than
/// scripted, which doubles as a "was not retried" assertion.
struct ScriptedCollector {
    script: Mutex<VecDeque<Scripted>>,
}

impl ScriptedCollector {
    fn new(steps: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
        })
    }
}

#[async_trait::async_trait]
impl Collector for ScriptedCollector {
    async fn collect(&self) -> anyhow::Result<CollectorOutput> {
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("collect() called more often than scripted");
        match step {
            Scripted::Output(output) => Ok(output),
            Scripted::Error(message) => Err(anyhow::anyhow!(message)),
            Scripted::Panic => panic!("scripted panic"),
        }
    }
}

fn runner_for(job: &CollectorJob, steps: Vec<Scripted>) -> (Runner, Arc<MemoryStatusStore>) {
    let mut registry = Registry::new();
    registry.register_shared(job.name.clone(), ScriptedCollector::new(steps));
    let store = Arc::new(MemoryStatusStore::new());
    let runner = Runner::new(
        Arc::new(registry),
        store.clone(),
        Arc::new(FixedClock(fire_instant())),
    );
    (runner, store)
}

fn statuses(runs: &[RunRecord]) -> Vec<RunStatus> {
    runs.iter().map(|r| r.status).collect()
}

fn events_of_type<'a>(events: &'a [Event], event_type: &str) -> Vec<&'a Event> {
    events.iter().filter(|e| e.event_type == event_type).collect()
}

#[tokio::test]
async fn successful_run_writes_record_and_event() {
    let job = test_job("cot");
    let (runner, store) = runner_for(&job, vec![Scripted::Output(CollectorOutput::ok(312))]);

    let result = runner.run(&job, TriggeredBy::Scheduler).await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.rows_collected, 312);
    assert!(result.succeeded());

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].job_name, "cot");
    assert_eq!(runs[0].status, RunStatus::Success);
    assert_eq!(runs[0].rows_collected, 312);
    assert_eq!(runs[0].triggered_by, TriggeredBy::Scheduler);
    assert!(runs[0].finished_at.is_some());
    // lag_days = 3 back from the Friday fire date.
    assert_eq!(runs[0].data_period.as_deref(), Some("2025-07-08"));

    let events = store.events();
    let success_events = events_of_type(&events, EVENT_RUN_SUCCESS);
    assert_eq!(success_events.len(), 1);
    assert_eq!(success_events[0].source, "cot");
    assert_eq!(success_events[0].priority, 4);
    assert_eq!(success_events[0].details["rows_collected"], json!(312));
}

#[tokio::test]
async fn collector_data_period_wins_over_default() {
    let job = test_job("cot");
    let output = CollectorOutput::ok(10).with_data_period("2025-07-04");
    let (runner, store) = runner_for(&job, vec![Scripted::Output(output)]);

    runner.run(&job, TriggeredBy::Manual).await;

    assert_eq!(store.runs()[0].data_period.as_deref(), Some("2025-07-04"));
}

#[tokio::test]
async fn warnings_downgrade_to_partial_and_are_not_retried() {
    let job = test_job("cot");
    let output = CollectorOutput::ok(10).with_warning("price column missing for 2 rows");
    // One scripted step only: a retry would panic the stub.
    let (runner, store) = runner_for(&job, vec![Scripted::Output(output)]);

    let result = runner
        .run_with_retry(&job, TriggeredBy::Scheduler, 3, std::time::Duration::ZERO)
        .await;

    assert_eq!(result.status, RunStatus::Partial);
    assert!(result.succeeded());
    assert_eq!(result.attempts, 1);
    assert_eq!(statuses(&store.runs()), vec![RunStatus::Partial]);
    assert_eq!(events_of_type(&store.events(), EVENT_RUN_PARTIAL).len(), 1);
}

#[tokio::test]
async fn retry_succeeds_after_two_failures() {
    let job = test_job("cot");
    let (runner, store) = runner_for(
        &job,
        vec![
            Scripted::Error("connection reset".to_string()),
            Scripted::Error("connection reset".to_string()),
            Scripted::Output(CollectorOutput::ok(312)),
        ],
    );

    let result = runner
        .run_with_retry(&job, TriggeredBy::Scheduler, 3, std::time::Duration::ZERO)
        .await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.attempts, 3);

    let runs = store.runs();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.job_name == "cot"));
    assert_eq!(
        statuses(&runs),
        vec![RunStatus::Failed, RunStatus::Failed, RunStatus::Success]
    );
}

#[tokio::test]
async fn retry_exhausts_on_persistent_failure() {
    let job = test_job("cot");
    let (runner, store) = runner_for(
        &job,
        vec![
            Scripted::Error("451 unavailable".to_string()),
            Scripted::Error("451 unavailable".to_string()),
            Scripted::Error("451 unavailable".to_string()),
        ],
    );

    let result = runner
        .run_with_retry(&job, TriggeredBy::Scheduler, 3, std::time::Duration::ZERO)
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.attempts, 3);

    let runs = store.runs();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.status == RunStatus::Failed));
}

#[tokio::test]
async fn unregistered_collector_fails_cleanly() {
    let job = test_job("cot");
    let store = Arc::new(MemoryStatusStore::new());
    let runner = Runner::new(
        Arc::new(Registry::new()),
        store.clone(),
        Arc::new(FixedClock(fire_instant())),
    );

    let result = runner.run(&job, TriggeredBy::Scheduler).await;

    assert_eq!(result.status, RunStatus::Failed);
    let message = result.error_message.unwrap();
    assert!(
        message.contains("no collector registered"),
        "unexpected message: {message}"
    );

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);

    let events = store.events();
    let failed = events_of_type(&events, EVENT_RUN_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].priority, 2);
}

#[tokio::test]
async fn collector_panic_is_contained() {
    let job = test_job("cot");
    let (runner, store) = runner_for(&job, vec![Scripted::Panic]);

    let result = runner.run(&job, TriggeredBy::Scheduler).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.error_message.as_deref(), Some("collector panicked"));
    assert_eq!(statuses(&store.runs()), vec![RunStatus::Failed]);
}

struct StaticObserver {
    payload: anyhow::Result<Option<serde_json::Value>>,
}

#[async_trait::async_trait]
impl Observer for StaticObserver {
    async fn on_success(
        &self,
        _job_name: &str,
        _rows_collected: i64,
        _data_period: Option<&str>,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        match &self.payload {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(anyhow::anyhow!(e.to_string())),
        }
    }
}

#[tokio::test]
async fn observer_enrichment_is_merged_into_success_event() {
    let job = test_job("cot");
    let (mut runner, store) = runner_for(&job, vec![Scripted::Output(CollectorOutput::ok(312))]);
    runner.add_observer(
        "cot",
        Arc::new(StaticObserver {
            payload: Ok(Some(json!({ "seasonal_zscore": 1.2 }))),
        }),
    );

    let result = runner.run(&job, TriggeredBy::Scheduler).await;

    assert_eq!(result.status, RunStatus::Success);
    let events = store.events();
    let success = events_of_type(&events, EVENT_RUN_SUCCESS);
    assert_eq!(success[0].details["seasonal_zscore"], json!(1.2));
}

#[tokio::test]
async fn failing_observer_does_not_alter_job_status() {
    let job = test_job("cot");
    let (mut runner, store) = runner_for(&job, vec![Scripted::Output(CollectorOutput::ok(312))]);
    runner.add_observer(
        "cot",
        Arc::new(StaticObserver {
            payload: Err(anyhow::anyhow!("enrichment model unavailable")),
        }),
    );

    let result = runner.run(&job, TriggeredBy::Scheduler).await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(statuses(&store.runs()), vec![RunStatus::Success]);
    assert_eq!(events_of_type(&store.events(), EVENT_RUN_SUCCESS).len(), 1);
}

/// A store whose every write fails, standing in for a database outage.
struct BrokenStore;

fn backend_down() -> StoreError {
    StoreError::Backend(Box::new(std::io::Error::other("db down")))
}

#[async_trait::async_trait]
impl StatusStore for BrokenStore {
    async fn insert_running(
        &self,
        _job_name: &str,
        _triggered_by: TriggeredBy,
        _started_at: DateTime<Utc>,
    ) -> Result<RunRecord, StoreError> {
        Err(backend_down())
    }

    async fn finalize_run(&self, _id: i64, _completion: RunCompletion) -> Result<(), StoreError> {
        Err(backend_down())
    }

    async fn insert_event(&self, _event: NewEvent) -> Result<(), StoreError> {
        Err(backend_down())
    }

    async fn last_success_times(&self) -> Result<Vec<crate::store::JobLastSuccess>, StoreError> {
        Err(backend_down())
    }

    async fn overdue_event_exists_on(
        &self,
        _job_name: &str,
        _day: chrono::NaiveDate,
    ) -> Result<bool, StoreError> {
        Err(backend_down())
    }
}

#[tokio::test]
async fn telemetry_outage_does_not_abort_the_run() {
    let job = test_job("cot");
    let mut registry = Registry::new();
    registry.register_shared(
        "cot",
        ScriptedCollector::new(vec![Scripted::Output(CollectorOutput::ok(312))]),
    );
    let runner = Runner::new(
        Arc::new(registry),
        Arc::new(BrokenStore),
        Arc::new(FixedClock(fire_instant())),
    );

    let result = runner.run(&job, TriggeredBy::Scheduler).await;

    // The collection itself still completed; only telemetry was lost.
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.rows_collected, 312);
    assert!(result.record_id.is_none());
}
