//! incident-timeline -- cluster health incidents from Prometheus time series.
//!
//! This crate derives a timeline of incidents from the component-health
//! recording rule, correlates the alerts behind a selected incident, and
//! serves the result over a small JSON API.

pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod pipeline;
pub mod source;
pub mod window;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::{AppConfig, LogFormat, LoggingConfig};
use crate::detect::FilterCriteria;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::source::{FixtureSource, MetricsSource, PrometheusSource};

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Pick the metrics backend: a fixture file when given, Prometheus otherwise.
pub fn build_source(config: &AppConfig, fixture: Option<&Path>) -> Result<Arc<dyn MetricsSource>> {
    let step = config.query.step();
    match fixture {
        Some(path) => {
            let source = FixtureSource::load(path, chrono::Utc::now(), step)
                .with_context(|| format!("failed to load fixture {}", path.display()))?;
            Ok(Arc::new(source))
        }
        None => {
            tracing::info!(url = %config.prometheus.url, "using Prometheus backend");
            Ok(Arc::new(PrometheusSource::new(&config.prometheus, step)?))
        }
    }
}

pub fn build_pipeline(config: &AppConfig, source: Arc<dyn MetricsSource>, criteria: FilterCriteria) -> Pipeline {
    Pipeline::new(source, PipelineSettings::from_config(&config.query), criteria)
}

/// Start the API server and load the default lookback in the background.
pub async fn serve(config: &AppConfig, bind: &str, source: Arc<dyn MetricsSource>) -> Result<()> {
    let default_days = config.filters.default_days;
    let criteria = FilterCriteria::default().with_days(Some(default_days));
    let pipeline = Arc::new(build_pipeline(config, source, criteria));

    let initial = pipeline.clone();
    tokio::spawn(async move {
        if let Err(e) = initial.refresh_incidents().await {
            tracing::warn!(error = %e, "initial incident load failed");
        }
    });

    let addr: std::net::SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", bind))?;
    let app = api::router(api::state::AppState::new(pipeline, default_days));

    tracing::info!(%addr, "incident-timeline listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
