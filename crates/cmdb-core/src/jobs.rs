use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// How often a source publishes new data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    OnDemand,
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
            Frequency::Quarterly => write!(f, "quarterly"),
            Frequency::OnDemand => write!(f, "on_demand"),
        }
    }
}

/// When a source's upstream data becomes available.
///
/// A pure description of the release rule; the calendar functions in
/// [`crate::calendar`] turn it into concrete fire instants. `day_of_month`
/// may be negative, meaning "N days before the end of the month" counting
/// the last day as -1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSchedule {
    pub frequency: Frequency,
    /// Required for weekly schedules.
    #[serde(default)]
    pub day_of_week: Option<Weekday>,
    /// Required for monthly and quarterly schedules. 1–31, or -1..=-28.
    #[serde(default)]
    pub day_of_month: Option<i8>,
    pub time_of_day: NaiveTime,
    pub timezone: Tz,
    /// Days between the end of the reporting period and publication. Affects
    /// only how the collected data's period is labelled, never the fire time.
    #[serde(default)]
    pub lag_days: u32,
    #[serde(default)]
    pub description: Option<String>,
}

/// Who asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Scheduler,
    Manual,
    Backfill,
}

impl TriggeredBy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TriggeredBy::Scheduler => "scheduler",
            TriggeredBy::Manual => "manual",
            TriggeredBy::Backfill => "backfill",
        }
    }
}

impl std::fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduler" => Ok(TriggeredBy::Scheduler),
            "manual" => Ok(TriggeredBy::Manual),
            "backfill" => Ok(TriggeredBy::Backfill),
            other => Err(format!("unknown trigger source '{other}'")),
        }
    }
}

/// One named, independently scheduled data-collection unit.
///
/// Defined once in `config/jobs.yaml` and read-only afterwards. The
/// `collector` key names the registry entry to run and defaults to the job
/// name itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorJob {
    pub name: String,
    #[serde(default)]
    pub collector: Option<String>,
    pub schedule: ReleaseSchedule,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Total attempts per scheduled firing, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Commodity/topic tags, e.g. `energy`, `metals`, `ags`.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Declared ordering hints. Validated against known job names but not
    /// enforced at runtime.
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

fn default_priority() -> u8 {
    3
}

fn default_enabled() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    300
}

impl CollectorJob {
    /// Registry key for this job's collector.
    #[must_use]
    pub fn collector_key(&self) -> &str {
        self.collector.as_deref().unwrap_or(&self.name)
    }

    /// Fixed delay between retry attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Whether the dispatcher should install a timer for this job.
    #[must_use]
    pub fn schedulable(&self) -> bool {
        self.enabled && self.schedule.frequency != Frequency::OnDemand
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsFile {
    pub jobs: Vec<CollectorJob>,
}

impl JobsFile {
    /// Look up a job by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CollectorJob> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// Load and validate the job configuration from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_jobs(path: &Path) -> Result<JobsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::JobsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let jobs_file: JobsFile = serde_yaml::from_str(&content)?;

    validate_jobs(&jobs_file)?;

    Ok(jobs_file)
}

fn validate_jobs(jobs_file: &JobsFile) -> Result<(), ConfigError> {
    let mut seen_names = HashSet::new();

    for job in &jobs_file.jobs {
        if job.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "job name must be non-empty".to_string(),
            ));
        }

        if !seen_names.insert(job.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate job name: '{}'",
                job.name
            )));
        }

        if job.priority == 0 {
            return Err(ConfigError::Validation(format!(
                "job '{}' has priority 0; priorities start at 1 (highest)",
                job.name
            )));
        }

        if job.retry_attempts == 0 {
            return Err(ConfigError::Validation(format!(
                "job '{}' has retry_attempts 0; at least one attempt is required",
                job.name
            )));
        }

        validate_schedule(job)?;
    }

    // Prerequisites may only name other configured jobs.
    let names: HashSet<&str> = jobs_file.jobs.iter().map(|j| j.name.as_str()).collect();
    for job in &jobs_file.jobs {
        for prereq in &job.prerequisites {
            if prereq == &job.name {
                return Err(ConfigError::Validation(format!(
                    "job '{}' lists itself as a prerequisite",
                    job.name
                )));
            }
            if !names.contains(prereq.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "job '{}' lists unknown prerequisite '{}'",
                    job.name, prereq
                )));
            }
        }
    }

    Ok(())
}

fn validate_schedule(job: &CollectorJob) -> Result<(), ConfigError> {
    let schedule = &job.schedule;
    match schedule.frequency {
        Frequency::Weekly => {
            if schedule.day_of_week.is_none() {
                return Err(ConfigError::Validation(format!(
                    "weekly job '{}' must set day_of_week",
                    job.name
                )));
            }
        }
        Frequency::Monthly | Frequency::Quarterly => {
            let Some(day) = schedule.day_of_month else {
                return Err(ConfigError::Validation(format!(
                    "{} job '{}' must set day_of_month",
                    schedule.frequency, job.name
                )));
            };
            if day == 0 || day > 31 || day < -28 {
                return Err(ConfigError::Validation(format!(
                    "job '{}' has day_of_month {day}; must be 1..=31 or -1..=-28",
                    job.name
                )));
            }
        }
        Frequency::Daily | Frequency::OnDemand => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "jobs_test.rs"]
mod tests;
