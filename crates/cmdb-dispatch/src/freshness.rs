//! Derived staleness view over the run history.
//!
//! Nothing here is stored: the view is recomputed on demand from the latest
//! successful run per job and the job's configured frequency.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use cmdb_core::{Frequency, JobsFile};

use crate::store::{StatusStore, StoreError};

/// One job's staleness, as reported by `cmdb status` and the overdue sweep.
#[derive(Debug, Clone)]
pub struct FreshnessEntry {
    pub job_name: String,
    pub last_success_at: Option<DateTime<Utc>>,
    pub hours_since: Option<f64>,
    pub expected_frequency: Frequency,
    pub is_overdue: bool,
}

/// Hours after which a job of the given frequency counts as overdue.
///
/// Weekly and slower frequencies use 1.5x the nominal interval. Daily
/// sources publish business days only, so their threshold spans the
/// Friday-to-Monday gap instead. On-demand jobs are never overdue.
#[must_use]
pub fn overdue_threshold_hours(frequency: Frequency) -> Option<f64> {
    match frequency {
        Frequency::Daily => Some(72.0),
        Frequency::Weekly => Some(1.5 * 168.0),
        Frequency::Monthly => Some(1.5 * 31.0 * 24.0),
        Frequency::Quarterly => Some(1.5 * 93.0 * 24.0),
        Frequency::OnDemand => None,
    }
}

/// Build the freshness view for every configured job.
///
/// A job with no successful run on record is overdue by definition, unless
/// it is on-demand.
///
/// # Errors
///
/// Returns [`StoreError`] if the run history cannot be read.
pub async fn freshness_report(
    store: &dyn StatusStore,
    jobs: &JobsFile,
    now: DateTime<Utc>,
) -> Result<Vec<FreshnessEntry>, StoreError> {
    let last_successes = store.last_success_times().await?;
    let by_name: HashMap<&str, DateTime<Utc>> = last_successes
        .iter()
        .map(|s| (s.job_name.as_str(), s.last_success_at))
        .collect();

    Ok(jobs
        .jobs
        .iter()
        .map(|job| {
            let last_success_at = by_name.get(job.name.as_str()).copied();
            #[allow(clippy::cast_precision_loss)]
            let hours_since = last_success_at.map(|t| (now - t).num_seconds() as f64 / 3600.0);
            let is_overdue = overdue_threshold_hours(job.schedule.frequency)
                .is_some_and(|threshold| hours_since.is_none_or(|h| h > threshold));

            FreshnessEntry {
                job_name: job.name.clone(),
                last_success_at,
                hours_since,
                expected_frequency: job.schedule.frequency,
                is_overdue,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveTime, TimeZone};

    use cmdb_core::{CollectorJob, ReleaseSchedule, TriggeredBy};

    use super::*;
    use crate::store::{MemoryStatusStore, RunCompletion, RunStatus};

    fn jobs_file(entries: Vec<(&str, Frequency)>) -> JobsFile {
        JobsFile {
            jobs: entries
                .into_iter()
                .map(|(name, frequency)| CollectorJob {
                    name: name.to_string(),
                    collector: None,
                    schedule: ReleaseSchedule {
                        frequency,
                        day_of_week: Some(chrono::Weekday::Fri),
                        day_of_month: Some(1),
                        time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                        timezone: chrono_tz::UTC,
                        lag_days: 0,
                        description: None,
                    },
                    priority: 3,
                    enabled: true,
                    retry_attempts: 3,
                    retry_delay_secs: 0,
                    topics: Vec::new(),
                    prerequisites: Vec::new(),
                })
                .collect(),
        }
    }

    async fn record_success(store: &MemoryStatusStore, job: &str, at: DateTime<Utc>) {
        let record = store
            .insert_running(job, TriggeredBy::Scheduler, at)
            .await
            .unwrap();
        store
            .finalize_run(
                record.id,
                RunCompletion {
                    status: RunStatus::Success,
                    finished_at: at,
                    rows_collected: 1,
                    rows_inserted: 1,
                    data_period: None,
                    error_message: None,
                    warnings: Vec::new(),
                },
            )
            .await
            .unwrap();
    }

    #[test]
    fn thresholds_scale_with_frequency() {
        assert_eq!(overdue_threshold_hours(Frequency::Daily), Some(72.0));
        assert_eq!(overdue_threshold_hours(Frequency::Weekly), Some(252.0));
        assert_eq!(overdue_threshold_hours(Frequency::OnDemand), None);
    }

    #[tokio::test]
    async fn fresh_job_is_not_overdue() {
        let store = Arc::new(MemoryStatusStore::new());
        let now = Utc.with_ymd_and_hms(2025, 7, 11, 19, 30, 0).unwrap();
        record_success(&store, "cot", now - chrono::Duration::hours(24)).await;

        let jobs = jobs_file(vec![("cot", Frequency::Weekly)]);
        let report = freshness_report(store.as_ref(), &jobs, now).await.unwrap();

        assert_eq!(report.len(), 1);
        assert!(!report[0].is_overdue);
        assert_eq!(report[0].hours_since, Some(24.0));
    }

    #[tokio::test]
    async fn stale_job_is_overdue() {
        let store = Arc::new(MemoryStatusStore::new());
        let now = Utc.with_ymd_and_hms(2025, 7, 11, 19, 30, 0).unwrap();
        record_success(&store, "cot", now - chrono::Duration::days(14)).await;

        let jobs = jobs_file(vec![("cot", Frequency::Weekly)]);
        let report = freshness_report(store.as_ref(), &jobs, now).await.unwrap();

        assert!(report[0].is_overdue);
    }

    #[tokio::test]
    async fn job_with_no_success_is_overdue_unless_on_demand() {
        let store = Arc::new(MemoryStatusStore::new());
        let now = Utc.with_ymd_and_hms(2025, 7, 11, 19, 30, 0).unwrap();

        let jobs = jobs_file(vec![
            ("cot", Frequency::Weekly),
            ("adhoc", Frequency::OnDemand),
        ]);
        let report = freshness_report(store.as_ref(), &jobs, now).await.unwrap();

        let cot = report.iter().find(|e| e.job_name == "cot").unwrap();
        assert!(cot.is_overdue);
        assert!(cot.last_success_at.is_none());

        let adhoc = report.iter().find(|e| e.job_name == "adhoc").unwrap();
        assert!(!adhoc.is_overdue);
    }
}
