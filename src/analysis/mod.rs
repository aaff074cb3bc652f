//! Alert analysis for selected incidents: correlation and table grouping.

pub mod aggregator;
pub mod correlation;

use crate::detect::{IncidentState, Severity};
use crate::source::Labels;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::aggregator::{AlertGroupRow, GroupAggregator};
pub use self::correlation::{AlertCorrelator, Correlation};

/// One firing interval of one alert, attached to the incident it explains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertInterval {
    /// Alerting rule name (`alertname`).
    pub rule: String,
    pub labels: Labels,
    pub incident_id: String,
    pub namespace: Option<String>,
    pub severity: Severity,
    pub firing_start: DateTime<Utc>,
    /// `None` while the alert is still firing.
    pub firing_end: Option<DateTime<Utc>>,
}

impl AlertInterval {
    pub fn state(&self) -> IncidentState {
        IncidentState::from_end(self.firing_end)
    }

    pub fn is_open(&self) -> bool {
        self.firing_end.is_none()
    }
}
