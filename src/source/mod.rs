//! Metrics backends -- the fetch side of the pipeline.
//!
//! A [`MetricsSource`] runs one range query over one [`TimeRange`] and returns
//! flat [`RawSample`] rows. Transport, auth and retries belong to the
//! implementation; the pipeline only builds queries and ranges.

pub mod fixture;
pub mod prometheus;
pub mod scenario;
pub mod selector;

use crate::window::TimeRange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub use self::fixture::FixtureSource;
pub use self::prometheus::PrometheusSource;

/// A series label set, ordered by label name.
pub type Labels = BTreeMap<String, String>;

/// Label Prometheus uses for the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend reported {error_type}: {error}")]
    Api { error_type: String, error: String },

    #[error("unexpected result type {0:?}, expected matrix")]
    ResultType(String),

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("failed to read fixture {path}: {source}")]
    FixtureIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fixture {path}: {message}")]
    FixtureParse { path: PathBuf, message: String },

    #[error("invalid selector {query:?}: {reason}")]
    Selector { query: String, reason: String },
}

/// One fetched data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub labels: Labels,
    pub timestamp: DateTime<Utc>,
    /// Non-numeric backend values arrive as `NaN`.
    pub value: f64,
}

/// Trait for all metrics backends.
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    /// Run `query` over `range` and return every point of every series.
    async fn fetch(&self, range: TimeRange, query: &str) -> Result<Vec<RawSample>, SourceError>;
}

// ---------------------------------------------------------------------------
// Prometheus HTTP API wire format
// ---------------------------------------------------------------------------

/// Body of a `/api/v1/query_range` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<QueryData>,
    #[serde(rename = "errorType", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<MatrixSeries>,
}

/// One series of a matrix result: `{"metric": {...}, "values": [[ts, "v"], ...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixSeries {
    pub metric: Labels,
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

impl MatrixSeries {
    /// Flatten into samples. Points whose timestamp cannot be represented are
    /// dropped here; unparsable values become `NaN`.
    pub fn into_samples(self) -> impl Iterator<Item = RawSample> {
        let MatrixSeries { metric, values } = self;
        values.into_iter().filter_map(move |(ts, value)| {
            let Some(timestamp) = timestamp_from_secs(ts) else {
                tracing::debug!(ts, "dropping sample with unrepresentable timestamp");
                return None;
            };
            Some(RawSample {
                labels: metric.clone(),
                timestamp,
                value: value.trim().parse().unwrap_or(f64::NAN),
            })
        })
    }
}

impl QueryResponse {
    /// Unwrap a successful matrix response into samples.
    pub fn into_samples(self) -> Result<Vec<RawSample>, SourceError> {
        if self.status != "success" {
            return Err(SourceError::Api {
                error_type: self.error_type.unwrap_or_else(|| self.status.clone()),
                error: self.error.unwrap_or_default(),
            });
        }
        let data = self
            .data
            .ok_or_else(|| SourceError::Decode("missing data field".to_string()))?;
        if data.result_type != "matrix" {
            return Err(SourceError::ResultType(data.result_type));
        }
        Ok(data
            .result
            .into_iter()
            .flat_map(MatrixSeries::into_samples)
            .collect())
    }
}

/// Prometheus timestamps are float seconds; keep millisecond precision.
pub fn timestamp_from_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

pub fn timestamp_to_secs(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}
