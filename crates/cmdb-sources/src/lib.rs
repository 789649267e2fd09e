//! Collectors for the external market-data sources the dispatcher polls.
//!
//! Each collector is a thin client for one publisher's API: fetch the latest
//! release, count the records, and report the period it covers. Anything
//! heavier (normalization, unit conversion, domain persistence) belongs to
//! downstream consumers, not here.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use cmdb_core::AppConfig;
use cmdb_dispatch::{Collector, Registry, RegistryError};

pub mod cot;
pub mod eia;

pub use cot::CotCollector;
pub use eia::EiaCollector;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid base URL '{0}'")]
    InvalidBaseUrl(String),
}

/// Build the shared HTTP client all collectors use.
///
/// # Errors
///
/// Returns [`SourceError::Http`] if the underlying `reqwest::Client` cannot
/// be constructed.
pub fn http_client(config: &AppConfig) -> Result<reqwest::Client, SourceError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(config.http_user_agent.clone())
        .build()?;
    Ok(client)
}

/// Register every production collector with the registry.
///
/// The EIA collector needs an API key; when `EIA_API_KEY` is unset its
/// factory yields a construction error at resolution time, so the job is
/// skipped each firing (and stays scheduled) rather than poisoning startup.
///
/// # Errors
///
/// Returns [`SourceError::Http`] if the shared HTTP client cannot be built.
pub fn register_all(registry: &mut Registry, config: &AppConfig) -> Result<(), SourceError> {
    let client = http_client(config)?;

    registry.register_shared(
        "cot_disaggregated",
        Arc::new(CotCollector::new(client.clone(), cot::DISAGGREGATED_FUTURES)),
    );
    registry.register_shared(
        "cot_legacy",
        Arc::new(CotCollector::new(client.clone(), cot::LEGACY_FUTURES)),
    );

    let eia_key = config.eia_api_key.clone();
    registry.register("eia_weekly_petroleum", move || {
        let key = eia_key.clone().ok_or_else(|| RegistryError::Construction {
            name: "eia_weekly_petroleum".to_string(),
            reason: "EIA_API_KEY is not set".to_string(),
        })?;
        let collector: Arc<dyn Collector> = Arc::new(EiaCollector::new(client.clone(), key));
        Ok(collector)
    });

    Ok(())
}
