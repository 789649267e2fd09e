//! Pure domain layer for the cmdb dispatcher: application configuration,
//! job definitions, and the release calendar.
//!
//! Nothing in this crate performs I/O beyond reading configuration files,
//! and nothing is async. The calendar functions in particular take "now" as
//! a parameter so they can be exercised against any simulated instant.

use thiserror::Error;

pub mod app_config;
pub mod calendar;
pub mod config;
pub mod jobs;

pub use app_config::{AppConfig, Environment};
pub use calendar::{
    default_data_period, fires_on, next_fire_after, resolve_day_of_month, upcoming_fires,
};
pub use config::{load_app_config, load_app_config_from_env};
pub use jobs::{load_jobs, CollectorJob, Frequency, JobsFile, ReleaseSchedule, TriggeredBy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for env var {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
    #[error("failed to read jobs file '{path}': {source}")]
    JobsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse jobs file: {0}")]
    JobsFileParse(#[from] serde_yaml::Error),
    #[error("invalid job configuration: {0}")]
    Validation(String),
}
