//! The incident dataflow: chunk → fetch (fan-out) → derive → publish, then
//! correlate the selected incident's alerts.
//!
//! Two stages, each with its own generation and cancellation token. The
//! incident stage re-triggers the alert stage after it publishes; a filter
//! change reruns only what it invalidates.

pub mod stage;
pub mod store;

use crate::analysis::{AlertCorrelator, GroupAggregator};
use crate::config::QueryConfig;
use crate::detect::filter;
use crate::detect::{FilterCriteria, Incident, IncidentDeriver};
use crate::source::{MetricsSource, RawSample, SourceError};
use crate::window::{Chunker, TimeRange};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use self::stage::{Stage, Ticket};
pub use self::store::{IncidentStore, LoadedWindow, Snapshot, Warnings};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch for {range} failed: {source}")]
    Fetch {
        range: TimeRange,
        #[source]
        source: SourceError,
    },
}

/// How a stage run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Results were swapped into the store.
    Published,
    /// A newer run started first; nothing was written.
    Superseded,
    /// Nothing to fetch; the store kept its contents.
    Skipped,
}

/// Which stages a filter change invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recompute {
    None,
    /// Refetch incidents; alerts follow once they are published.
    Incidents,
    Alerts,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub health_query: String,
    pub chunker: Chunker,
    pub deriver: IncidentDeriver,
    pub correlator: AlertCorrelator,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(query: &QueryConfig) -> Self {
        Self {
            health_query: query.health_metric.clone(),
            chunker: query.chunker(),
            deriver: query.deriver(),
            correlator: AlertCorrelator::new(query.step()).with_metric(query.alerts_metric.as_str()),
        }
    }
}

pub struct Pipeline {
    source: Arc<dyn MetricsSource>,
    store: IncidentStore,
    settings: PipelineSettings,
    incidents: Stage,
    alerts: Stage,
}

impl Pipeline {
    pub fn new(source: Arc<dyn MetricsSource>, settings: PipelineSettings, criteria: FilterCriteria) -> Self {
        Self {
            source,
            store: IncidentStore::new(criteria),
            settings,
            incidents: Stage::new("incidents"),
            alerts: Stage::new("alerts"),
        }
    }

    pub fn store(&self) -> &IncidentStore {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot().await
    }

    /// Store new criteria and recompute the filtered set in the same swap.
    /// Returns the stages that must rerun.
    pub async fn set_filters(&self, criteria: FilterCriteria) -> Recompute {
        let mut recompute = Recompute::None;
        self.store
            .update(|s| {
                let stale_window = s.requested != criteria.days;
                let never_loaded = s.loaded.is_none() && !s.incidents_loading;
                let selection_changed = s.criteria.selected_group() != criteria.selected_group();
                recompute = if stale_window || never_loaded {
                    Recompute::Incidents
                } else if selection_changed {
                    Recompute::Alerts
                } else {
                    Recompute::None
                };
                s.filtered = filter::apply(&criteria, &s.incidents);
                s.criteria = criteria;
            })
            .await;
        debug!(?recompute, "filters updated");
        recompute
    }

    pub async fn run(&self, recompute: Recompute) -> Result<StageOutcome, PipelineError> {
        match recompute {
            Recompute::None => Ok(StageOutcome::Skipped),
            Recompute::Incidents => self.refresh_incidents().await,
            Recompute::Alerts => self.refresh_alerts().await,
        }
    }

    pub async fn apply_filters(&self, criteria: FilterCriteria) -> Result<StageOutcome, PipelineError> {
        let recompute = self.set_filters(criteria).await;
        self.run(recompute).await
    }

    pub async fn refresh_incidents(&self) -> Result<StageOutcome, PipelineError> {
        self.refresh_incidents_at(Utc::now()).await
    }

    /// Fetch and derive the incident set for the lookback in the current
    /// criteria, with the window ending at `now`.
    pub async fn refresh_incidents_at(&self, now: DateTime<Utc>) -> Result<StageOutcome, PipelineError> {
        let ticket = self.incidents.begin();
        let snapshot = self
            .store
            .update(|s| {
                s.requested = s.criteria.days;
                s.incidents_loading = true;
                s.last_error = None;
            })
            .await;
        let lookback = snapshot.criteria.days;
        let ranges = self.settings.chunker.chunk_lookback(lookback, now);

        let Some(lookback) = lookback.filter(|_| !ranges.is_empty()) else {
            info!("no lookback selected, keeping current incidents");
            let current = self
                .store
                .publish_if(
                    |_| self.incidents.is_current(ticket.generation),
                    |s| s.incidents_loading = false,
                )
                .await;
            if current && snapshot.criteria.selected_group().is_some() {
                self.chain_alerts().await;
            }
            return Ok(StageOutcome::Skipped);
        };

        info!(
            %lookback,
            chunks = ranges.len(),
            generation = ticket.generation,
            "refreshing incidents"
        );
        let samples = match self.fan_out(&ticket, &ranges, &self.settings.health_query).await {
            Ok(Some(samples)) => samples,
            Ok(None) => return Ok(StageOutcome::Superseded),
            Err(e) => {
                let current = self
                    .store
                    .publish_if(
                        |_| self.incidents.is_current(ticket.generation),
                        |s| {
                            s.incidents_loading = false;
                            s.requested = s.loaded.as_ref().map(|l| l.lookback);
                            s.last_error = Some(e.to_string());
                        },
                    )
                    .await;
                return if current {
                    warn!(error = %e, "incident refresh failed");
                    Err(e)
                } else {
                    Ok(StageOutcome::Superseded)
                };
            }
        };

        let derivation = self.settings.deriver.derive_as_of(&samples, now);
        let incidents: Vec<Arc<Incident>> = derivation.incidents.into_iter().map(Arc::new).collect();
        let count = incidents.len();

        let published = self
            .store
            .publish_if(
                |s| self.incidents.is_current(ticket.generation) && s.criteria.days == Some(lookback),
                |s| {
                    s.filtered = filter::apply(&s.criteria, &incidents);
                    s.incidents = incidents;
                    s.loaded = Some(LoadedWindow { lookback, as_of: now, ranges });
                    s.warnings.skipped_samples = derivation.skipped;
                    s.incidents_loading = false;
                },
            )
            .await;
        if !published {
            debug!(generation = ticket.generation, "incident results superseded");
            return Ok(StageOutcome::Superseded);
        }
        info!(incidents = count, skipped = derivation.skipped, "incidents published");

        if self.store.snapshot().await.criteria.selected_group().is_some() {
            self.chain_alerts().await;
        }
        Ok(StageOutcome::Published)
    }

    async fn chain_alerts(&self) {
        if let Err(e) = self.refresh_alerts().await {
            warn!(error = %e, "alert refresh after incident publish failed");
        }
    }

    /// Correlate the alerts of the selected incident over the loaded window.
    pub async fn refresh_alerts(&self) -> Result<StageOutcome, PipelineError> {
        let ticket = self.alerts.begin();
        let snapshot = self.store.update(|s| s.alerts_loading = true).await;
        let group = snapshot.criteria.selected_group().map(str::to_string);

        let selected: Vec<Arc<Incident>> = match &group {
            Some(group) => snapshot
                .incidents
                .iter()
                .filter(|i| i.id == *group)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let query = self.settings.correlator.alert_query(&selected);

        let (Some(loaded), Some(query)) = (snapshot.loaded.as_ref(), query) else {
            // Nothing selected, or nothing to correlate against: clear.
            let cleared = self
                .store
                .publish_if(
                    |_| self.alerts.is_current(ticket.generation),
                    |s| {
                        s.alerts.clear();
                        s.table.clear();
                        s.warnings.skipped_alert_samples = 0;
                        s.warnings.unmatched_alert_samples = 0;
                        s.alerts_loading = false;
                    },
                )
                .await;
            return Ok(if cleared {
                StageOutcome::Published
            } else {
                StageOutcome::Superseded
            });
        };

        info!(
            group = group.as_deref().unwrap_or_default(),
            incidents = selected.len(),
            generation = ticket.generation,
            "refreshing alerts"
        );
        let samples = match self.fan_out(&ticket, &loaded.ranges, &query).await {
            Ok(Some(samples)) => samples,
            Ok(None) => return Ok(StageOutcome::Superseded),
            Err(e) => {
                let current = self
                    .store
                    .publish_if(
                        |_| self.alerts.is_current(ticket.generation),
                        |s| {
                            s.alerts_loading = false;
                            s.last_error = Some(e.to_string());
                        },
                    )
                    .await;
                return if current {
                    warn!(error = %e, "alert refresh failed");
                    Err(e)
                } else {
                    Ok(StageOutcome::Superseded)
                };
            }
        };

        let correlation = self
            .settings
            .correlator
            .correlate_as_of(&selected, &samples, loaded.as_of);
        let table = GroupAggregator::group_for_table(&correlation.intervals);
        let count = correlation.intervals.len();

        let published = self
            .store
            .publish_if(
                |s| {
                    self.alerts.is_current(ticket.generation)
                        && s.criteria.selected_group() == group.as_deref()
                },
                |s| {
                    s.alerts = correlation.intervals;
                    s.table = table;
                    s.warnings.skipped_alert_samples = correlation.skipped;
                    s.warnings.unmatched_alert_samples = correlation.unmatched;
                    s.alerts_loading = false;
                },
            )
            .await;
        if !published {
            return Ok(StageOutcome::Superseded);
        }
        info!(alerts = count, "alerts published");
        Ok(StageOutcome::Published)
    }

    /// One fetch per range, issued together; all must succeed. `None` when
    /// the run was cancelled before the last fetch returned.
    async fn fan_out(
        &self,
        ticket: &Ticket,
        ranges: &[TimeRange],
        query: &str,
    ) -> Result<Option<Vec<RawSample>>, PipelineError> {
        let fetches = ranges.iter().map(|&range| async move {
            self.source
                .fetch(range, query)
                .await
                .map_err(|source| PipelineError::Fetch { range, source })
        });

        tokio::select! {
            _ = ticket.token.cancelled() => {
                debug!(generation = ticket.generation, "stage run cancelled");
                Ok(None)
            }
            result = try_join_all(fetches) => {
                let chunks = result?;
                Ok(Some(chunks.into_iter().flatten().collect()))
            }
        }
    }
}
