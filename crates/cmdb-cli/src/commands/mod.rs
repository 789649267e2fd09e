//! Command handlers for the operator CLI.
//!
//! These are called from `main` after configuration is loaded. Commands that
//! only read configuration (`list`, `schedule`) never touch the database;
//! everything else connects a pool and wires the full dispatcher stack.

use std::sync::Arc;

use chrono::Utc;

use cmdb_core::{calendar, AppConfig, JobsFile};
use cmdb_db::{PgStatusStore, PoolConfig};
use cmdb_dispatch::{
    freshness_report, Clock, Dispatcher, DispatcherSettings, Registry, RunResult, Runner,
    StatusStore, SystemClock,
};

/// Everything a database-backed command needs.
struct Stack {
    jobs: Arc<JobsFile>,
    store: Arc<dyn StatusStore>,
    dispatcher: Dispatcher,
}

async fn build_stack(config: &AppConfig) -> anyhow::Result<Stack> {
    let jobs = Arc::new(cmdb_core::load_jobs(&config.jobs_path)?);
    let pool = cmdb_db::connect_pool(&config.database_url, PoolConfig::from_app_config(config)).await?;

    let store: Arc<dyn StatusStore> = Arc::new(PgStatusStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let mut registry = Registry::new();
    cmdb_sources::register_all(&mut registry, config)?;

    let runner = Arc::new(Runner::new(
        Arc::new(registry),
        Arc::clone(&store),
        Arc::clone(&clock),
    ));
    let dispatcher = Dispatcher::new(
        Arc::clone(&jobs),
        runner,
        Arc::clone(&store),
        clock,
        DispatcherSettings::from(config),
    );

    Ok(Stack {
        jobs,
        store,
        dispatcher,
    })
}

/// Run the daemon in the foreground until Ctrl-C.
pub(crate) async fn start(config: &AppConfig) -> anyhow::Result<()> {
    let stack = build_stack(config).await?;
    let mut dispatcher = stack.dispatcher;

    dispatcher.start().await?;
    println!(
        "dispatcher running with {} schedulable jobs; press Ctrl-C to stop",
        stack.jobs.jobs.iter().filter(|j| j.schedulable()).count()
    );

    tokio::signal::ctrl_c().await?;
    dispatcher.stop().await;
    Ok(())
}

/// Single on-demand execution of one job.
///
/// # Errors
///
/// Returns an error (non-zero exit) when the job is unknown, already
/// running, or finishes in a failed state.
pub(crate) async fn run(config: &AppConfig, job_name: &str) -> anyhow::Result<()> {
    let stack = build_stack(config).await?;
    let result = stack.dispatcher.run_job_now(job_name).await?;

    print_result(&result);
    if !result.succeeded() {
        anyhow::bail!(
            "job '{job_name}' failed: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// List the jobs due today; with `--execute`, run them with the retry policy.
pub(crate) async fn today(config: &AppConfig, execute: bool) -> anyhow::Result<()> {
    if !execute {
        let jobs = cmdb_core::load_jobs(&config.jobs_path)?;
        let due = due_today(&jobs);
        if due.is_empty() {
            println!("no jobs due today");
            return Ok(());
        }
        println!("due today:");
        for name in due {
            println!("  {name}");
        }
        return Ok(());
    }

    let stack = build_stack(config).await?;
    let results = stack.dispatcher.run_all_due_today().await;
    if results.is_empty() {
        println!("no jobs due today");
        return Ok(());
    }
    for result in &results {
        print_result(result);
    }
    let failed = results.iter().filter(|r| !r.succeeded()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} due jobs failed", results.len());
    }
    Ok(())
}

/// Print the freshness view.
pub(crate) async fn status(config: &AppConfig) -> anyhow::Result<()> {
    let stack = build_stack(config).await?;
    let report = freshness_report(stack.store.as_ref(), &stack.jobs, Utc::now()).await?;

    println!(
        "{:<24} {:<10} {:<20} {:>12} {:>8}",
        "JOB", "FREQ", "LAST SUCCESS", "HOURS AGO", "OVERDUE"
    );
    for entry in report {
        let last = entry
            .last_success_at
            .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        let hours = entry
            .hours_since
            .map_or_else(|| "-".to_string(), |h| format!("{h:.1}"));
        println!(
            "{:<24} {:<10} {:<20} {:>12} {:>8}",
            entry.job_name,
            entry.expected_frequency.to_string(),
            last,
            hours,
            if entry.is_overdue { "YES" } else { "no" }
        );
    }
    Ok(())
}

/// Print every configured job with its schedule and registration state.
pub(crate) fn list(config: &AppConfig) -> anyhow::Result<()> {
    let jobs = cmdb_core::load_jobs(&config.jobs_path)?;
    let mut registry = Registry::new();
    cmdb_sources::register_all(&mut registry, config)?;

    println!(
        "{:<24} {:<10} {:<8} {:<10} {:<10}",
        "JOB", "FREQ", "ENABLED", "COLLECTOR", "SCHEDULABLE"
    );
    for job in &jobs.jobs {
        println!(
            "{:<24} {:<10} {:<8} {:<10} {:<10}",
            job.name,
            job.schedule.frequency.to_string(),
            if job.enabled { "yes" } else { "no" },
            if registry.is_registered(job.collector_key()) {
                "yes"
            } else {
                "MISSING"
            },
            if job.schedulable() { "yes" } else { "no" }
        );
    }
    Ok(())
}

/// Print the resolved fire calendar for the next seven days.
pub(crate) fn schedule(config: &AppConfig) -> anyhow::Result<()> {
    let jobs = cmdb_core::load_jobs(&config.jobs_path)?;
    let now = Utc::now();

    let mut fires: Vec<(chrono::DateTime<Utc>, &str)> = Vec::new();
    for job in jobs.jobs.iter().filter(|j| j.schedulable()) {
        for fire in calendar::upcoming_fires(&job.schedule, now, chrono::Duration::days(7)) {
            fires.push((fire, job.name.as_str()));
        }
    }
    fires.sort();

    if fires.is_empty() {
        println!("no fires scheduled in the next 7 days");
        return Ok(());
    }
    for (fire, name) in fires {
        println!("{}  {name}", fire.format("%a %Y-%m-%d %H:%M UTC"));
    }
    Ok(())
}

/// Apply pending migrations.
pub(crate) async fn migrate(config: &AppConfig) -> anyhow::Result<()> {
    let pool =
        cmdb_db::connect_pool(&config.database_url, PoolConfig::from_app_config(config)).await?;
    cmdb_db::run_migrations(&pool).await?;
    println!("migrations up to date");
    Ok(())
}

fn due_today(jobs: &JobsFile) -> Vec<&str> {
    let now = Utc::now();
    jobs.jobs
        .iter()
        .filter(|job| {
            job.enabled
                && calendar::fires_on(
                    &job.schedule,
                    now.with_timezone(&job.schedule.timezone).date_naive(),
                )
        })
        .map(|job| job.name.as_str())
        .collect()
}

fn print_result(result: &RunResult) {
    match result.error_message.as_deref() {
        Some(error) if !result.succeeded() => {
            println!(
                "{}: {} after {} attempt(s): {error}",
                result.job_name, result.status, result.attempts
            );
        }
        _ => {
            println!(
                "{}: {} ({} rows, period {})",
                result.job_name,
                result.status,
                result.rows_collected,
                result.data_period.as_deref().unwrap_or("-")
            );
        }
    }
}
