//! CFTC Commitments of Traders collector.
//!
//! Pulls the public reporting Socrata API and counts the markets in the most
//! recent report week. The same collector serves the disaggregated and
//! legacy report variants via their resource paths.

use anyhow::Context;
use serde::Deserialize;

use cmdb_dispatch::{Collector, CollectorOutput};

pub const DEFAULT_BASE_URL: &str = "https://publicreporting.cftc.gov";

/// Disaggregated report, futures only.
pub const DISAGGREGATED_FUTURES: &str = "/resource/72hh-3qpy.json";
/// Legacy report, futures only.
pub const LEGACY_FUTURES: &str = "/resource/6dca-aqww.json";

/// Enough for several report weeks across all markets; the latest week is
/// filtered out client-side.
const FETCH_LIMIT: &str = "1000";

pub struct CotCollector {
    client: reqwest::Client,
    base_url: String,
    resource: &'static str,
}

impl CotCollector {
    /// Collector against the production CFTC endpoint.
    #[must_use]
    pub fn new(client: reqwest::Client, resource: &'static str) -> Self {
        Self::with_base_url(client, resource, DEFAULT_BASE_URL)
    }

    /// Collector against a custom base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(client: reqwest::Client, resource: &'static str, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            resource,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CotRow {
    #[serde(default)]
    report_date_as_yyyy_mm_dd: Option<String>,
}

#[async_trait::async_trait]
impl Collector for CotCollector {
    async fn collect(&self) -> anyhow::Result<CollectorOutput> {
        let url = format!("{}{}", self.base_url, self.resource);
        let rows: Vec<CotRow> = self
            .client
            .get(&url)
            .query(&[
                ("$order", "report_date_as_yyyy_mm_dd DESC"),
                ("$limit", FETCH_LIMIT),
            ])
            .send()
            .await
            .context("COT request failed")?
            .error_for_status()
            .context("COT request returned an error status")?
            .json()
            .await
            .context("COT response was not valid JSON")?;

        if rows.is_empty() {
            return Ok(CollectorOutput::failed("COT API returned no rows"));
        }

        let undated = rows
            .iter()
            .filter(|r| r.report_date_as_yyyy_mm_dd.is_none())
            .count();
        let Some(latest) = rows
            .iter()
            .filter_map(|r| r.report_date_as_yyyy_mm_dd.as_deref())
            .max()
            .map(str::to_string)
        else {
            return Ok(CollectorOutput::failed("COT rows carry no report date"));
        };

        let current_week = rows
            .iter()
            .filter(|r| r.report_date_as_yyyy_mm_dd.as_deref() == Some(latest.as_str()))
            .count();
        let records = i64::try_from(current_week).unwrap_or(i64::MAX);

        // The Socrata report date is the Tuesday the positions are as of.
        let period = latest.chars().take(10).collect::<String>();
        tracing::debug!(resource = self.resource, report_date = %period, markets = records, "COT release fetched");

        let mut output = CollectorOutput::ok(records).with_data_period(period.clone());
        output.data = serde_json::json!({
            "report_date": period,
            "rows_fetched": rows.len(),
        });
        if undated > 0 {
            output = output.with_warning(format!("{undated} rows missing report_date"));
        }
        Ok(output)
    }
}
