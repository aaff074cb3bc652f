//! Correlates `ALERTS` series with the incidents they were raised for.
//!
//! Health series carry the alert that degraded them as `src_*` labels, so the
//! correlation is a label join followed by the same run detection the
//! incident deriver uses.

use super::AlertInterval;
use crate::detect::run::{split_runs, Partition};
use crate::detect::{Incident, Severity, ALERT_SOURCE_LABELS};
use crate::source::selector::{self, Selector};
use crate::source::{Labels, RawSample, METRIC_NAME_LABEL};
use crate::window::chunk::DEFAULT_STEP_SECS;
use chrono::{DateTime, Duration, Utc};
use std::borrow::Borrow;
use tracing::{debug, warn};

const ALERTNAME_LABEL: &str = "alertname";
const ALERTSTATE_LABEL: &str = "alertstate";

/// Output of one correlation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    pub intervals: Vec<AlertInterval>,
    /// Malformed alert samples.
    pub skipped: usize,
    /// Samples of alert series that matched no selected incident.
    pub unmatched: usize,
}

#[derive(Debug, Clone)]
pub struct AlertCorrelator {
    step: Duration,
    metric: String,
}

impl Default for AlertCorrelator {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_STEP_SECS))
    }
}

impl AlertCorrelator {
    pub fn new(step: Duration) -> Self {
        Self {
            step: step.max(Duration::seconds(1)),
            metric: "ALERTS".to_string(),
        }
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    /// Query selecting the alerts behind `selected`, or `None` when no
    /// selected incident names a source alert.
    pub fn alert_query<T: Borrow<Incident>>(&self, selected: &[T]) -> Option<String> {
        let selectors = selected
            .iter()
            .flat_map(|incident| Borrow::<Incident>::borrow(incident).alert_sources())
            .filter(|source| source.iter().any(|(label, _)| *label == ALERTNAME_LABEL))
            .map(|source| {
                source
                    .into_iter()
                    .fold(Selector::metric(self.metric.as_str()), |sel, (k, v)| sel.with(k, v))
            });
        selector::union(selectors)
    }

    /// Correlate, judging "still firing" against the newest alert sample.
    pub fn correlate<T: Borrow<Incident>>(&self, selected: &[T], samples: &[RawSample]) -> Correlation {
        self.correlate_inner(selected, samples, None)
    }

    /// Correlate, judging "still firing" against `as_of`.
    pub fn correlate_as_of<T: Borrow<Incident>>(
        &self,
        selected: &[T],
        samples: &[RawSample],
        as_of: DateTime<Utc>,
    ) -> Correlation {
        self.correlate_inner(selected, samples, Some(as_of))
    }

    fn correlate_inner<T: Borrow<Incident>>(
        &self,
        selected: &[T],
        samples: &[RawSample],
        as_of: Option<DateTime<Utc>>,
    ) -> Correlation {
        let mut partition = Partition::default();
        let mut skipped = 0usize;

        for sample in samples {
            let named = sample
                .labels
                .get(ALERTNAME_LABEL)
                .is_some_and(|n| !n.is_empty());
            if !named || !sample.value.is_finite() || sample.value < 0.0 {
                skipped += 1;
                continue;
            }
            // Pending alerts have not fired yet.
            let pending = sample
                .labels
                .get(ALERTSTATE_LABEL)
                .is_some_and(|s| s == "pending");
            let value = if pending { 0.0 } else { sample.value };

            let mut key = sample.labels.clone();
            key.remove(METRIC_NAME_LABEL);
            key.remove(ALERTSTATE_LABEL);
            partition.insert(key, sample.timestamp, value);
        }

        let mut candidates: Vec<&Incident> = selected.iter().map(Borrow::<Incident>::borrow).collect();
        candidates.sort_by(|a, b| a.firing_start.cmp(&b.firing_start).then_with(|| a.id.cmp(&b.id)));

        let mut out = Correlation {
            skipped,
            ..Correlation::default()
        };
        let Some(reference) = as_of.or(partition.latest) else {
            return out;
        };

        for (labels, series) in partition.series {
            let matching: Vec<&Incident> = candidates
                .iter()
                .copied()
                .filter(|incident| raised_for(incident, &labels))
                .collect();
            let Some(earliest) = matching.first().copied() else {
                out.unmatched += series.len();
                continue;
            };

            let rule = labels.get(ALERTNAME_LABEL).cloned().unwrap_or_default();
            let namespace = labels.get("namespace").cloned();
            let severity = Severity::from_label(labels.get("severity").map(String::as_str));

            for run in split_runs(&series, self.step) {
                let firing_start = run.first();
                let firing_end = (!run.is_open(reference, self.step))
                    .then(|| run.closed_at.unwrap_or_else(|| run.last()));
                let owner = matching
                    .iter()
                    .copied()
                    .find(|incident| incident.overlaps(firing_start, firing_end))
                    .unwrap_or(earliest);

                out.intervals.push(AlertInterval {
                    rule: rule.clone(),
                    labels: labels.clone(),
                    incident_id: owner.id.clone(),
                    namespace: namespace.clone(),
                    severity,
                    firing_start,
                    firing_end,
                });
            }
        }

        out.intervals.sort_by(|a, b| {
            a.firing_start
                .cmp(&b.firing_start)
                .then_with(|| a.rule.cmp(&b.rule))
                .then_with(|| a.labels.cmp(&b.labels))
        });

        if out.skipped > 0 || out.unmatched > 0 {
            warn!(
                skipped = out.skipped,
                unmatched = out.unmatched,
                "dropped alert samples during correlation"
            );
        }
        debug!(intervals = out.intervals.len(), "correlated alerts");
        out
    }
}

/// Some source series of the incident names this alert. `alertname` must
/// agree; `namespace` and `severity` are compared when both sides carry them.
fn raised_for(incident: &Incident, alert: &Labels) -> bool {
    incident.source_labels().any(|source| {
        ALERT_SOURCE_LABELS.iter().all(|(src, label)| {
            match (source.get(*src), alert.get(*label)) {
                (Some(want), Some(have)) => want == have,
                _ => *label != ALERTNAME_LABEL,
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 12, 6, 0, 0).unwrap()
    }

    fn incident(id: &str, alertname: &str, namespace: &str, start_min: i64, end_min: Option<i64>) -> Incident {
        let component: Labels = [
            ("group_id", id),
            ("component", "monitoring"),
            ("src_alertname", alertname),
            ("src_namespace", namespace),
            ("src_severity", "warning"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Incident {
            id: id.to_string(),
            component,
            severity: Severity::Warning,
            firing_start: t0() + Duration::minutes(start_min),
            firing_end: end_min.map(|m| t0() + Duration::minutes(m)),
            history: Vec::new(),
            sources: Vec::new(),
        }
    }

    fn alert(name: &str, namespace: &str, state: &str, minute: i64, value: f64) -> RawSample {
        RawSample {
            labels: [
                ("__name__", "ALERTS"),
                ("alertname", name),
                ("namespace", namespace),
                ("severity", "warning"),
                ("alertstate", state),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            timestamp: t0() + Duration::minutes(minute),
            value,
        }
    }

    fn correlator() -> AlertCorrelator {
        AlertCorrelator::new(Duration::minutes(5))
    }

    #[test]
    fn test_alert_query_is_deduplicated_and_sorted() {
        let selected = vec![
            incident("b", "TargetDown", "openshift-monitoring", 0, None),
            incident("a", "KubePodCrashLooping", "openshift-etcd", 0, None),
            incident("b", "TargetDown", "openshift-monitoring", 30, None),
        ];
        let query = correlator().alert_query(&selected).unwrap();
        assert_eq!(
            query,
            "ALERTS{alertname=\"KubePodCrashLooping\", namespace=\"openshift-etcd\", severity=\"warning\"} \
             or ALERTS{alertname=\"TargetDown\", namespace=\"openshift-monitoring\", severity=\"warning\"}"
        );
    }

    #[test]
    fn test_alert_query_without_source_labels() {
        let mut bare = incident("a", "x", "y", 0, None);
        bare.component.remove("src_alertname");
        assert_eq!(correlator().alert_query(&[bare]), None);
        assert_eq!(correlator().alert_query::<Incident>(&[]), None);
    }

    #[test]
    fn test_alert_query_uses_configured_metric() {
        let selected = vec![incident("a", "Watchdog", "openshift-monitoring", 0, None)];
        let query = correlator().with_metric("ALERTS_ROLLUP").alert_query(&selected).unwrap();
        assert!(query.starts_with("ALERTS_ROLLUP{alertname=\"Watchdog\""));
    }

    #[test]
    fn test_closed_interval_ends_at_zero_sample() {
        let selected = vec![incident("inc", "TargetDown", "openshift-monitoring", 0, Some(30))];
        let samples = vec![
            alert("TargetDown", "openshift-monitoring", "firing", 0, 1.0),
            alert("TargetDown", "openshift-monitoring", "firing", 5, 1.0),
            alert("TargetDown", "openshift-monitoring", "firing", 10, 0.0),
        ];
        let out = correlator().correlate_as_of(&selected, &samples, t0() + Duration::hours(1));
        assert_eq!(out.intervals.len(), 1);
        let interval = &out.intervals[0];
        assert_eq!(interval.rule, "TargetDown");
        assert_eq!(interval.incident_id, "inc");
        assert_eq!(interval.namespace.as_deref(), Some("openshift-monitoring"));
        assert_eq!(interval.firing_start, t0());
        assert_eq!(interval.firing_end, Some(t0() + Duration::minutes(10)));
        assert!(!interval.labels.contains_key("alertstate"));
    }

    #[test]
    fn test_vanished_series_ends_at_last_sample() {
        let selected = vec![incident("inc", "TargetDown", "openshift-monitoring", 0, None)];
        let samples = vec![
            alert("TargetDown", "openshift-monitoring", "firing", 0, 1.0),
            alert("TargetDown", "openshift-monitoring", "firing", 5, 1.0),
        ];
        let out = correlator().correlate_as_of(&selected, &samples, t0() + Duration::hours(1));
        assert_eq!(out.intervals[0].firing_end, Some(t0() + Duration::minutes(5)));

        let open = correlator().correlate(&selected, &samples);
        assert!(open.intervals[0].is_open());
    }

    #[test]
    fn test_pending_samples_do_not_fire() {
        let selected = vec![incident("inc", "TargetDown", "openshift-monitoring", 0, None)];
        let samples = vec![
            alert("TargetDown", "openshift-monitoring", "pending", 0, 1.0),
            alert("TargetDown", "openshift-monitoring", "firing", 5, 1.0),
        ];
        let out = correlator().correlate(&selected, &samples);
        assert_eq!(out.intervals.len(), 1);
        assert_eq!(out.intervals[0].firing_start, t0() + Duration::minutes(5));
    }

    #[test]
    fn test_unmatched_and_malformed_are_counted() {
        let selected = vec![incident("inc", "TargetDown", "openshift-monitoring", 0, None)];
        let mut nameless = alert("TargetDown", "openshift-monitoring", "firing", 0, 1.0);
        nameless.labels.remove("alertname");
        let samples = vec![
            nameless,
            alert("TargetDown", "openshift-monitoring", "firing", 5, f64::NAN),
            alert("Watchdog", "openshift-monitoring", "firing", 0, 1.0),
            alert("Watchdog", "openshift-monitoring", "firing", 5, 1.0),
            alert("TargetDown", "other-namespace", "firing", 0, 1.0),
        ];
        let out = correlator().correlate(&selected, &samples);
        assert!(out.intervals.is_empty());
        assert_eq!(out.skipped, 2);
        assert_eq!(out.unmatched, 3);
    }

    #[test]
    fn test_interval_goes_to_overlapping_incident() {
        // Same component flapped twice; both runs share the group id but the
        // alert interval must land on the run it overlaps.
        let mut first = incident("g", "TargetDown", "openshift-monitoring", 0, Some(20));
        first.id = "g-first".into();
        let second = incident("g", "TargetDown", "openshift-monitoring", 60, None);
        let samples = vec![
            alert("TargetDown", "openshift-monitoring", "firing", 65, 1.0),
            alert("TargetDown", "openshift-monitoring", "firing", 70, 1.0),
            alert("TargetDown", "openshift-monitoring", "firing", 0, 1.0),
        ];
        let out = correlator().correlate(&[first, second], &samples);
        assert_eq!(out.intervals.len(), 2);
        assert_eq!(out.intervals[0].incident_id, "g-first");
        assert_eq!(out.intervals[1].incident_id, "g");
    }

    #[test]
    fn test_correlation_is_order_independent() {
        let selected = vec![incident("inc", "TargetDown", "openshift-monitoring", 0, None)];
        let mut samples = vec![
            alert("TargetDown", "openshift-monitoring", "firing", 0, 1.0),
            alert("TargetDown", "openshift-monitoring", "firing", 5, 0.0),
            alert("TargetDown", "openshift-monitoring", "firing", 10, 1.0),
        ];
        let forward = correlator().correlate(&selected, &samples);
        samples.reverse();
        assert_eq!(forward, correlator().correlate(&selected, &samples));
        assert_eq!(forward.intervals.len(), 2);
    }

    #[test]
    fn test_grouped_incident_selects_every_source_alert() {
        let mut merged = incident("g", "TargetDown", "openshift-monitoring", 0, None);
        let other = incident("g", "PrometheusDown", "openshift-monitoring", 0, None);
        merged.sources = vec![merged.component.clone(), other.component.clone()];
        merged.component.remove("src_alertname");

        let query = correlator().alert_query(&[merged.clone()]).unwrap();
        assert!(query.contains("alertname=\"PrometheusDown\""));
        assert!(query.contains(" or "));
        assert!(query.contains("alertname=\"TargetDown\""));

        let samples = vec![
            alert("TargetDown", "openshift-monitoring", "firing", 0, 1.0),
            alert("PrometheusDown", "openshift-monitoring", "firing", 5, 1.0),
            alert("Watchdog", "openshift-monitoring", "firing", 5, 1.0),
        ];
        let out = correlator().correlate(&[merged], &samples);
        let rules: Vec<&str> = out.intervals.iter().map(|i| i.rule.as_str()).collect();
        assert_eq!(rules, vec!["TargetDown", "PrometheusDown"]);
        assert!(out.intervals.iter().all(|i| i.incident_id == "g"));
        assert_eq!(out.unmatched, 1);
    }
}
