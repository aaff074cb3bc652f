//! Offline metrics source backed by a file.
//!
//! `.json` files hold a saved `query_range` response (or just its `result`
//! array); `.toml` files hold a [`Scenario`] that is rendered relative to
//! the load time. Queries are evaluated by selector matching only.

use super::scenario::Scenario;
use super::selector::Selector;
use super::{MatrixSeries, MetricsSource, QueryResponse, RawSample, SourceError};
use crate::window::TimeRange;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum FixtureFile {
    Response(QueryResponse),
    Series(Vec<MatrixSeries>),
}

#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    samples: Vec<RawSample>,
}

impl FixtureSource {
    pub fn new(samples: Vec<RawSample>) -> Self {
        Self { samples }
    }

    pub fn from_series(series: Vec<MatrixSeries>) -> Self {
        Self::new(series.into_iter().flat_map(MatrixSeries::into_samples).collect())
    }

    pub fn from_scenario(scenario: &Scenario, now: DateTime<Utc>, step: Duration) -> Result<Self, String> {
        Ok(Self::from_series(scenario.series(now, step)?))
    }

    /// Load a fixture file. Scenarios are anchored at `now` on a `step` grid.
    pub fn load(path: &Path, now: DateTime<Utc>, step: Duration) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|source| SourceError::FixtureIo {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |message: String| SourceError::FixtureParse {
            path: path.to_path_buf(),
            message,
        };

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let source = if is_toml {
            let scenario = Scenario::from_toml(&content).map_err(parse_err)?;
            Self::from_scenario(&scenario, now, step).map_err(parse_err)?
        } else {
            match serde_json::from_str::<FixtureFile>(&content) {
                Ok(FixtureFile::Response(response)) => Self::new(response.into_samples()?),
                Ok(FixtureFile::Series(series)) => Self::from_series(series),
                Err(e) => return Err(parse_err(e.to_string())),
            }
        };

        tracing::info!(path = %path.display(), samples = source.len(), "loaded fixture");
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[async_trait::async_trait]
impl MetricsSource for FixtureSource {
    async fn fetch(&self, range: TimeRange, query: &str) -> Result<Vec<RawSample>, SourceError> {
        let selectors = Selector::parse_union(query)?;
        Ok(self
            .samples
            .iter()
            .filter(|s| range.contains(s.timestamp))
            .filter(|s| selectors.iter().any(|sel| sel.matches(&s.labels)))
            .cloned()
            .collect())
    }
}
