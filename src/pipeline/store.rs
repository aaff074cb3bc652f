//! Shared incident state, replaced wholesale on every update.

use crate::analysis::{AlertGroupRow, AlertInterval};
use crate::detect::{FilterCriteria, Incident};
use crate::window::{Lookback, TimeRange};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The window the current incident set was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedWindow {
    pub lookback: Lookback,
    pub as_of: DateTime<Utc>,
    pub ranges: Vec<TimeRange>,
}

/// Counters of samples dropped by the last derivation and correlation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Warnings {
    pub skipped_samples: usize,
    pub skipped_alert_samples: usize,
    pub unmatched_alert_samples: usize,
}

/// One consistent view of everything the pipeline has published.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub criteria: FilterCriteria,
    /// Lookback of the newest incident run, loaded or in flight.
    pub requested: Option<Lookback>,
    pub loaded: Option<LoadedWindow>,
    pub incidents: Vec<Arc<Incident>>,
    /// `incidents` passed through `criteria`, newest first.
    pub filtered: Vec<Arc<Incident>>,
    pub alerts: Vec<AlertInterval>,
    pub table: Vec<AlertGroupRow>,
    pub incidents_loading: bool,
    pub alerts_loading: bool,
    pub warnings: Warnings,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IncidentStore {
    inner: Arc<RwLock<Arc<Snapshot>>>,
}

impl IncidentStore {
    pub fn new(criteria: FilterCriteria) -> Self {
        let snapshot = Snapshot {
            criteria,
            ..Snapshot::default()
        };
        Self {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.read().await.clone()
    }

    /// Apply `f` to a copy of the current snapshot and swap it in.
    pub async fn update<F>(&self, f: F) -> Arc<Snapshot>
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut guard = self.inner.write().await;
        let mut next = Snapshot::clone(&**guard);
        f(&mut next);
        let next = Arc::new(next);
        *guard = next.clone();
        next
    }

    /// Like [`update`](Self::update), but only when `cond` holds for the
    /// current snapshot. Both run under the write lock.
    pub async fn publish_if<C, F>(&self, cond: C, f: F) -> bool
    where
        C: FnOnce(&Snapshot) -> bool,
        F: FnOnce(&mut Snapshot),
    {
        let mut guard = self.inner.write().await;
        if !cond(&**guard) {
            return false;
        }
        let mut next = Snapshot::clone(&**guard);
        f(&mut next);
        *guard = Arc::new(next);
        true
    }
}
