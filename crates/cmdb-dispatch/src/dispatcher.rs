//! The long-lived scheduling daemon.
//!
//! One timer task per schedulable job, driven by the release calendar, plus
//! a daily overdue sweep on a plain cron rule. Release rules (business days,
//! negative day-of-month, quarter-opening months) are not expressible as
//! cron, so job timers compute their own next-fire instants; the sweep is an
//! ordinary cron job and runs on `tokio-cron-scheduler`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};

use cmdb_core::{calendar, AppConfig, CollectorJob, JobsFile, TriggeredBy};

use crate::clock::Clock;
use crate::freshness::freshness_report;
use crate::guard::RunGuard;
use crate::runner::{RunResult, Runner};
use crate::store::{
    NewEvent, StatusStore, EVENT_DISPATCHER_STARTED, EVENT_DISPATCHER_STOPPED, EVENT_RUN_MISSED,
    EVENT_SOURCE_OVERDUE, SOURCE_DISPATCHER,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown job: '{0}'")]
    UnknownJob(String),
    #[error("job '{0}' is already running")]
    AlreadyRunning(String),
    #[error("overdue sweep scheduler error: {0}")]
    Sweep(String),
}

/// Operator-tunable daemon knobs.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// A fire serviced later than this after its due time is dropped as
    /// missed instead of running arbitrarily late.
    pub misfire_grace_secs: u64,
    /// How long `stop()` waits for in-flight runs before aborting them.
    pub shutdown_timeout_secs: u64,
    /// 6-field cron for the daily overdue sweep. Empty disables the sweep.
    pub sweep_cron: String,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            misfire_grace_secs: 3600,
            shutdown_timeout_secs: 30,
            sweep_cron: "0 30 7 * * MON-FRI".to_string(),
        }
    }
}

impl From<&AppConfig> for DispatcherSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            misfire_grace_secs: config.misfire_grace_secs,
            shutdown_timeout_secs: config.shutdown_timeout_secs,
            sweep_cron: config.sweep_cron.clone(),
        }
    }
}

pub struct Dispatcher {
    jobs: Arc<JobsFile>,
    runner: Arc<Runner>,
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    guard: Arc<RunGuard>,
    settings: DispatcherSettings,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
    sweep: Option<JobScheduler>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        jobs: Arc<JobsFile>,
        runner: Arc<Runner>,
        store: Arc<dyn StatusStore>,
        clock: Arc<dyn Clock>,
        settings: DispatcherSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs,
            runner,
            store,
            clock,
            guard: Arc::new(RunGuard::new()),
            settings,
            shutdown,
            tasks: JoinSet::new(),
            sweep: None,
        }
    }

    /// Install one timer per enabled, non-on-demand job and start the
    /// overdue sweep. Returns once everything is armed; the timers run on
    /// the runtime until [`Dispatcher::stop`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Sweep`] if the sweep scheduler cannot be
    /// built or started. Job timers themselves cannot fail to install.
    pub async fn start(&mut self) -> Result<(), DispatchError> {
        let schedulable: Vec<CollectorJob> = self
            .jobs
            .jobs
            .iter()
            .filter(|j| j.schedulable())
            .cloned()
            .collect();
        let installed = schedulable.len();

        for job in schedulable {
            let timer = JobTimer {
                job,
                runner: Arc::clone(&self.runner),
                store: Arc::clone(&self.store),
                clock: Arc::clone(&self.clock),
                guard: Arc::clone(&self.guard),
                misfire_grace: chrono::Duration::seconds(
                    i64::try_from(self.settings.misfire_grace_secs).unwrap_or(i64::MAX),
                ),
            };
            let shutdown = self.shutdown.subscribe();
            self.tasks.spawn(timer.run(shutdown));
        }

        if self.settings.sweep_cron.is_empty() {
            tracing::info!("overdue sweep disabled (empty cron)");
        } else {
            self.start_sweep().await?;
        }

        self.emit_lifecycle(
            EVENT_DISPATCHER_STARTED,
            format!("dispatcher started with {installed} scheduled jobs"),
            json!({ "scheduled_jobs": installed }),
        )
        .await;
        tracing::info!(jobs = installed, "dispatcher started");
        Ok(())
    }

    /// Graceful shutdown: stop accepting new fires, then wait for in-flight
    /// runs to reach a terminal state, bounded by the configured timeout.
    pub async fn stop(&mut self) {
        tracing::info!("dispatcher stopping; draining in-flight runs");
        let _ = self.shutdown.send(true);

        if let Some(mut sweep) = self.sweep.take() {
            if let Err(e) = sweep.shutdown().await {
                tracing::warn!(error = %e, "sweep scheduler shutdown failed");
            }
        }

        let timeout = std::time::Duration::from_secs(self.settings.shutdown_timeout_secs);
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!("job timer task panicked");
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                timeout_secs = self.settings.shutdown_timeout_secs,
                "shutdown timeout elapsed with runs still in flight; aborting them"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        self.emit_lifecycle(
            EVENT_DISPATCHER_STOPPED,
            "dispatcher stopped".to_string(),
            json!({ "drained": drained.is_ok() }),
        )
        .await;
        tracing::info!("dispatcher stopped");
    }

    /// Manual, single-attempt invocation bypassing the calendar.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownJob`] if no job with that name is
    /// configured, or [`DispatchError::AlreadyRunning`] if a run for it is
    /// currently in flight.
    pub async fn run_job_now(&self, name: &str) -> Result<RunResult, DispatchError> {
        let job = self
            .jobs
            .get(name)
            .ok_or_else(|| DispatchError::UnknownJob(name.to_string()))?;
        let _permit = self
            .guard
            .acquire(&job.name)
            .ok_or_else(|| DispatchError::AlreadyRunning(job.name.clone()))?;
        Ok(self.runner.run(job, TriggeredBy::Manual).await)
    }

    /// Run every enabled job whose calendar entry is due today, with the
    /// retry policy, and return the results. Used for manual catch-up after
    /// downtime.
    pub async fn run_all_due_today(&self) -> Vec<RunResult> {
        let mut results = Vec::new();
        for job in self.jobs.jobs.iter().filter(|j| j.enabled) {
            let local_today = self
                .clock
                .now_utc()
                .with_timezone(&job.schedule.timezone)
                .date_naive();
            if !calendar::fires_on(&job.schedule, local_today) {
                continue;
            }
            let Some(_permit) = self.guard.acquire(&job.name) else {
                tracing::warn!(job = %job.name, "already running; skipping catch-up");
                continue;
            };
            results.push(
                self.runner
                    .run_with_retry(
                        job,
                        TriggeredBy::Backfill,
                        job.retry_attempts,
                        job.retry_delay(),
                    )
                    .await,
            );
        }
        results
    }

    async fn start_sweep(&mut self) -> Result<(), DispatchError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| DispatchError::Sweep(e.to_string()))?;

        let store = Arc::clone(&self.store);
        let jobs = Arc::clone(&self.jobs);
        let clock = Arc::clone(&self.clock);

        let job = Job::new_async(self.settings.sweep_cron.as_str(), move |_uuid, _lock| {
            let store = Arc::clone(&store);
            let jobs = Arc::clone(&jobs);
            let clock = Arc::clone(&clock);

            Box::pin(async move {
                tracing::info!("sweep: starting daily overdue check");
                run_overdue_sweep(store.as_ref(), &jobs, clock.as_ref()).await;
                tracing::info!("sweep: daily overdue check complete");
            })
        })
        .map_err(|e| DispatchError::Sweep(e.to_string()))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| DispatchError::Sweep(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| DispatchError::Sweep(e.to_string()))?;

        tracing::info!(cron = %self.settings.sweep_cron, "sweep: registered overdue check");
        self.sweep = Some(scheduler);
        Ok(())
    }

    async fn emit_lifecycle(&self, event_type: &str, summary: String, details: serde_json::Value) {
        let event = NewEvent {
            event_type: event_type.to_string(),
            source: SOURCE_DISPATCHER.to_string(),
            summary,
            details,
            priority: 5,
            created_at: self.clock.now_utc(),
        };
        if let Err(e) = self.store.insert_event(event).await {
            tracing::warn!(error = %e, "lifecycle event write failed");
        }
    }
}

/// One pass of the overdue check: for each job the freshness view flags,
/// write at most one overdue event per calendar day.
pub async fn run_overdue_sweep(store: &dyn StatusStore, jobs: &JobsFile, clock: &dyn Clock) {
    let now = clock.now_utc();
    let report = match freshness_report(store, jobs, now).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "sweep: freshness query failed");
            return;
        }
    };

    let today = now.date_naive();
    for entry in report.iter().filter(|e| e.is_overdue) {
        match store.overdue_event_exists_on(&entry.job_name, today).await {
            Ok(true) => {
                tracing::debug!(job = %entry.job_name, "sweep: overdue event already logged today");
            }
            Ok(false) => {
                let summary = match entry.hours_since {
                    Some(hours) => format!(
                        "{}: no successful run in {hours:.0} hours (expected {})",
                        entry.job_name, entry.expected_frequency
                    ),
                    None => format!("{}: no successful run on record", entry.job_name),
                };
                let event = NewEvent {
                    event_type: EVENT_SOURCE_OVERDUE.to_string(),
                    source: entry.job_name.clone(),
                    summary,
                    details: json!({
                        "hours_since": entry.hours_since,
                        "expected_frequency": entry.expected_frequency.to_string(),
                        "last_success_at": entry.last_success_at.map(|t| t.to_rfc3339()),
                    }),
                    priority: 2,
                    created_at: now,
                };
                if let Err(e) = store.insert_event(event).await {
                    tracing::warn!(job = %entry.job_name, error = %e, "sweep: overdue event write failed");
                }
            }
            Err(e) => {
                tracing::warn!(job = %entry.job_name, error = %e, "sweep: dedup lookup failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-job timer
// ---------------------------------------------------------------------------

struct JobTimer {
    job: CollectorJob,
    runner: Arc<Runner>,
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    guard: Arc<RunGuard>,
    misfire_grace: chrono::Duration,
}

impl JobTimer {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut cursor = self.clock.now_utc();
        loop {
            let Some(due) = calendar::next_fire_after(&self.job.schedule, cursor) else {
                tracing::warn!(job = %self.job.name, "schedule produced no next fire; timer exiting");
                return;
            };
            let now = self.clock.now_utc();
            let wait = (due - now).to_std().unwrap_or(std::time::Duration::ZERO);
            tracing::debug!(job = %self.job.name, due = %due, "timer armed");

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => return,
            }
            if *shutdown.borrow() {
                return;
            }

            self.fire(due).await;

            // Recompute from the current instant: any slots missed while
            // this one was serviced collapse into the next computation, so a
            // backlog never triggers more than one catch-up run. The
            // one-minute nudge keeps an instantaneous run from re-arming the
            // slot it just serviced.
            cursor = self.clock.now_utc().max(due + chrono::Duration::minutes(1));
        }
    }

    async fn fire(&self, due: DateTime<Utc>) {
        let woke_at = self.clock.now_utc();
        if classify_fire(due, woke_at, self.misfire_grace) == FireDisposition::Missed {
            let late_secs = (woke_at - due).num_seconds();
            tracing::warn!(
                job = %self.job.name,
                due = %due,
                late_secs,
                "fire serviced too late; treating as missed"
            );
            let event = NewEvent {
                event_type: EVENT_RUN_MISSED.to_string(),
                source: self.job.name.clone(),
                summary: format!("{}: fire at {due} missed beyond grace period", self.job.name),
                details: json!({ "due": due.to_rfc3339(), "late_secs": late_secs }),
                priority: 3,
                created_at: woke_at,
            };
            if let Err(e) = self.store.insert_event(event).await {
                tracing::warn!(job = %self.job.name, error = %e, "missed-fire event write failed");
            }
            return;
        }

        let Some(_permit) = self.guard.acquire(&self.job.name) else {
            tracing::warn!(job = %self.job.name, "previous run still executing; skipping this fire");
            return;
        };

        let result = self
            .runner
            .run_with_retry(
                &self.job,
                TriggeredBy::Scheduler,
                self.job.retry_attempts,
                self.job.retry_delay(),
            )
            .await;
        tracing::info!(
            job = %self.job.name,
            status = %result.status,
            attempts = result.attempts,
            "scheduled run complete"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FireDisposition {
    Fire,
    Missed,
}

fn classify_fire(
    due: DateTime<Utc>,
    woke_at: DateTime<Utc>,
    grace: chrono::Duration,
) -> FireDisposition {
    if woke_at - due > grace {
        FireDisposition::Missed
    } else {
        FireDisposition::Fire
    }
}
