use super::{timestamp_to_secs, MetricsSource, QueryResponse, RawSample, SourceError};
use crate::config::PrometheusConfig;
use crate::window::TimeRange;
use anyhow::{Context, Result};
use chrono::Duration;
use reqwest::Client;

/// Range queries against a Prometheus-compatible HTTP API.
pub struct PrometheusSource {
    client: Client,
    base_url: String,
    step: Duration,
    bearer_token: Option<String>,
}

impl PrometheusSource {
    pub fn new(config: &PrometheusConfig, step: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client")?;

        let bearer_token = match &config.bearer_token_file {
            Some(path) => {
                let token = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read bearer token: {}", path.display()))?;
                Some(token.trim().to_string())
            }
            None => None,
        };

        Ok(Self::with_client(client, &config.url, step).bearer_token(bearer_token))
    }

    pub fn with_client(client: Client, base_url: &str, step: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            step,
            bearer_token: None,
        }
    }

    pub fn bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.is_empty());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v1/query_range", self.base_url)
    }
}

#[async_trait::async_trait]
impl MetricsSource for PrometheusSource {
    async fn fetch(&self, range: TimeRange, query: &str) -> Result<Vec<RawSample>, SourceError> {
        let url = self.endpoint();
        let start = timestamp_to_secs(range.start()).to_string();
        let end = timestamp_to_secs(range.end()).to_string();
        let step = format!("{}s", self.step.num_seconds().max(1));

        let mut request = self.client.get(&url).query(&[
            ("query", query),
            ("start", start.as_str()),
            ("end", end.as_str()),
            ("step", step.as_str()),
        ]);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(%url, %query, %range, "query_range");
        let response = request
            .send()
            .await
            .map_err(|source| SourceError::Http { url: url.clone(), source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| SourceError::Http { url, source })?;

        // Prometheus reports bad queries as 400/422 with a JSON error body.
        let parsed = serde_json::from_str::<QueryResponse>(&body);
        if !status.is_success() {
            return match parsed {
                Ok(parsed) if parsed.status != "success" => parsed.into_samples(),
                _ => Err(SourceError::Status {
                    status: status.as_u16(),
                    body: body.chars().take(512).collect(),
                }),
            };
        }
        parsed
            .map_err(|e| SourceError::Decode(e.to_string()))?
            .into_samples()
    }
}
