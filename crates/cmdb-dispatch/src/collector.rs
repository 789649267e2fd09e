//! The contract between the dispatcher core and external data collectors.
//!
//! A collector owns everything source-specific: HTTP calls, parsing, unit
//! handling, persistence of the domain data itself. The core depends on
//! nothing beyond this trait and the [`CollectorOutput`] it reports.

use serde_json::Value;

/// What one collection attempt reported back.
///
/// `success: false` and a returned `Err` are both treated as collector
/// failures by the runner; warnings on an otherwise successful attempt
/// downgrade it to a partial result.
#[derive(Debug, Clone)]
pub struct CollectorOutput {
    pub success: bool,
    pub records_fetched: i64,
    pub records_inserted: i64,
    /// Opaque payload passed through to downstream consumers untouched.
    pub data: Value,
    /// Free-form descriptor of the period the data covers, e.g. a
    /// `data_as_of` or `period_end` date.
    pub data_period: Option<String>,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
}

impl CollectorOutput {
    /// A fully successful attempt that fetched and inserted `records` rows.
    #[must_use]
    pub fn ok(records: i64) -> Self {
        Self {
            success: true,
            records_fetched: records,
            records_inserted: records,
            data: Value::Null,
            data_period: None,
            error_message: None,
            warnings: Vec::new(),
        }
    }

    /// A failed attempt with an operator-readable reason.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            records_fetched: 0,
            records_inserted: 0,
            data: Value::Null,
            data_period: None,
            error_message: Some(message.into()),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_data_period(mut self, period: impl Into<String>) -> Self {
        self.data_period = Some(period.into());
        self
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// One external data source's collection routine.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Perform one collection attempt.
    ///
    /// # Errors
    ///
    /// Implementations may return any error; the runner converts it into a
    /// failed run record. Errors never propagate past the runner boundary.
    async fn collect(&self) -> anyhow::Result<CollectorOutput>;
}
