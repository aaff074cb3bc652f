//! TOML configuration for incident-timeline.
//!
//! Layered: an explicit path, the `INCIDENT_TIMELINE_CONFIG` environment
//! variable, the system location, then compiled-in defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::IncidentDeriver;
use crate::window::chunk::{DEFAULT_MAX_SAMPLES, DEFAULT_STEP_SECS, MAX_STEP_SECS};
use crate::window::{Chunker, Lookback};

pub const CONFIG_ENV_VAR: &str = "INCIDENT_TIMELINE_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/incident-timeline/config.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Reject values that cannot describe a usable range query.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_STEP_SECS).contains(&self.query.step_secs) {
            anyhow::bail!(
                "query.step_secs must be between 1 and {}, got {}",
                MAX_STEP_SECS,
                self.query.step_secs
            );
        }
        if self.query.max_samples_per_query == 0 {
            anyhow::bail!("query.max_samples_per_query must be positive");
        }
        Ok(())
    }

    /// Try, in order: `INCIDENT_TIMELINE_CONFIG`, the system path, defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "INCIDENT_TIMELINE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// An explicit `--config` path must load; otherwise fall back quietly.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Prometheus
// ---------------------------------------------------------------------------

/// Metrics backend connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Base URL; `/api/v1/query_range` is appended.
    pub url: String,
    /// File holding a bearer token, e.g. a mounted service account token.
    pub bearer_token_file: Option<PathBuf>,
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090".to_string(),
            bearer_token_file: None,
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Recording rule carrying per-component health codes.
    pub health_metric: String,
    /// Metric holding alert states.
    pub alerts_metric: String,
    /// Range query resolution (seconds, 1 to 86400).
    pub step_secs: i64,
    /// Points per series the backend returns for one query.
    pub max_samples_per_query: u32,
    /// Labels a health sample must carry to be used.
    pub required_labels: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            health_metric: "cluster:health:components:map".to_string(),
            alerts_metric: "ALERTS".to_string(),
            step_secs: DEFAULT_STEP_SECS,
            max_samples_per_query: DEFAULT_MAX_SAMPLES,
            required_labels: vec!["component".to_string()],
        }
    }
}

impl QueryConfig {
    pub fn step(&self) -> Duration {
        Duration::seconds(self.step_secs.clamp(1, MAX_STEP_SECS))
    }

    pub fn chunker(&self) -> Chunker {
        Chunker::new(self.step(), self.max_samples_per_query)
    }

    pub fn deriver(&self) -> IncidentDeriver {
        IncidentDeriver::new(self.step()).with_required_labels(self.required_labels.iter().cloned())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    /// Lookback used when a request does not name one.
    pub default_days: Lookback,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            default_days: Lookback::SevenDays,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
