//! Groups correlated alert intervals into alert table rows.

use super::AlertInterval;
use crate::detect::{IncidentState, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One row of the alerts table: every interval of one rule in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertGroupRow {
    pub rule: String,
    pub namespace: Option<String>,
    /// Worst severity among the grouped intervals.
    pub severity: Severity,
    /// Firing if any grouped interval is still open.
    pub state: IncidentState,
    pub firing_start: DateTime<Utc>,
    /// Latest end, only once every interval has resolved.
    pub firing_end: Option<DateTime<Utc>>,
    /// Number of grouped intervals.
    pub alerts: usize,
    pub incident_ids: Vec<String>,
}

/// Groups correlated alert intervals for compact display.
pub struct GroupAggregator;

impl GroupAggregator {
    /// Rows ordered by earliest start, newest first; ties by rule name, then
    /// namespace.
    pub fn group_for_table(intervals: &[AlertInterval]) -> Vec<AlertGroupRow> {
        let mut groups: BTreeMap<(&str, Option<&str>), Vec<&AlertInterval>> = BTreeMap::new();
        for interval in intervals {
            groups
                .entry((interval.rule.as_str(), interval.namespace.as_deref()))
                .or_default()
                .push(interval);
        }

        let mut rows: Vec<AlertGroupRow> = groups
            .into_iter()
            .filter_map(|((rule, namespace), members)| {
                let firing_start = members.iter().map(|i| i.firing_start).min()?;
                let severity = members.iter().map(|i| i.severity).max()?;
                let firing = members.iter().any(|i| i.is_open());
                let firing_end = if firing {
                    None
                } else {
                    members.iter().filter_map(|i| i.firing_end).max()
                };
                let incident_ids: BTreeSet<&str> =
                    members.iter().map(|i| i.incident_id.as_str()).collect();

                Some(AlertGroupRow {
                    rule: rule.to_string(),
                    namespace: namespace.map(str::to_string),
                    severity,
                    state: IncidentState::from_end(firing_end),
                    firing_start,
                    firing_end,
                    alerts: members.len(),
                    incident_ids: incident_ids.into_iter().map(str::to_string).collect(),
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            b.firing_start
                .cmp(&a.firing_start)
                .then_with(|| a.rule.cmp(&b.rule))
                .then_with(|| a.namespace.cmp(&b.namespace))
        });
        rows
    }
}
