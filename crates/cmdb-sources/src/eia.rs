//! EIA weekly petroleum stocks collector (EIA open-data v2 API).

use anyhow::Context;
use serde::Deserialize;

use cmdb_dispatch::{Collector, CollectorOutput};

pub const DEFAULT_BASE_URL: &str = "https://api.eia.gov";

const WEEKLY_STOCKS_ROUTE: &str = "/v2/petroleum/stoc/wstk/data/";

pub struct EiaCollector {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EiaCollector {
    /// Collector against the production EIA endpoint.
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self::with_base_url(client, api_key, DEFAULT_BASE_URL)
    }

    /// Collector against a custom base URL (for testing with wiremock).
    #[must_use]
    pub fn with_base_url(client: reqwest::Client, api_key: String, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    response: Option<Payload>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    data: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct Point {
    #[serde(default)]
    period: Option<String>,
}

#[async_trait::async_trait]
impl Collector for EiaCollector {
    async fn collect(&self) -> anyhow::Result<CollectorOutput> {
        let url = format!("{}{}", self.base_url, WEEKLY_STOCKS_ROUTE);
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("frequency", "weekly"),
                ("data[0]", "value"),
                ("sort[0][column]", "period"),
                ("sort[0][direction]", "desc"),
                ("length", "200"),
            ])
            .send()
            .await
            .context("EIA request failed")?
            .error_for_status()
            .context("EIA request returned an error status")?
            .json()
            .await
            .context("EIA response was not valid JSON")?;

        if let Some(error) = envelope.error {
            return Ok(CollectorOutput::failed(format!("EIA API error: {error}")));
        }
        let Some(payload) = envelope.response else {
            return Ok(CollectorOutput::failed("EIA response missing payload"));
        };
        if payload.data.is_empty() {
            return Ok(CollectorOutput::failed("EIA API returned no data points"));
        }

        // Sorted newest-first server-side; the first period is the release week.
        let Some(latest) = payload.data.iter().find_map(|p| p.period.clone()) else {
            return Ok(CollectorOutput::failed("EIA data points carry no period"));
        };

        let current_week = payload
            .data
            .iter()
            .filter(|p| p.period.as_deref() == Some(latest.as_str()))
            .count();
        let records = i64::try_from(current_week).unwrap_or(i64::MAX);
        tracing::debug!(period = %latest, series = records, "EIA weekly stocks fetched");

        let mut output = CollectorOutput::ok(records).with_data_period(latest.clone());
        output.data = serde_json::json!({
            "period": latest,
            "points_fetched": payload.data.len(),
        });
        Ok(output)
    }
}
