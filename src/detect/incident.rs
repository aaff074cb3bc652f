//! Turn raw component-health samples into incident records.
//!
//! Samples are partitioned by component identity (every label except the
//! metric name), and each maximal run of positive values becomes one
//! [`Incident`]. Series sharing a `group_id` (one per source alert) fold into
//! a single incident. The result depends only on the set of samples, never
//! on the order they were fetched in.

use super::run::{split_runs, Partition, Run};
use super::{group_id, incident_id, Incident, Severity, SeverityPoint};
use crate::source::{Labels, RawSample, METRIC_NAME_LABEL};
use crate::window::chunk::DEFAULT_STEP_SECS;
use chrono::{DateTime, Duration, Utc};
use std::collections::btree_map::{BTreeMap, Entry};

/// Output of one derivation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Derivation {
    pub incidents: Vec<Incident>,
    /// Samples dropped as malformed.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct IncidentDeriver {
    step: Duration,
    required_labels: Vec<String>,
}

impl Default for IncidentDeriver {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_STEP_SECS))
    }
}

impl IncidentDeriver {
    /// `step` is the query resolution: consecutive samples further apart
    /// than this belong to different incidents.
    pub fn new(step: Duration) -> Self {
        Self {
            step: step.max(Duration::seconds(1)),
            required_labels: vec!["component".to_string()],
        }
    }

    pub fn with_required_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Derive incidents, judging "still open" against the newest sample in
    /// the set.
    pub fn derive(&self, samples: &[RawSample]) -> Derivation {
        self.derive_inner(samples, None)
    }

    /// Derive incidents, judging "still open" against `as_of` (normally the
    /// end of the queried window).
    pub fn derive_as_of(&self, samples: &[RawSample], as_of: DateTime<Utc>) -> Derivation {
        self.derive_inner(samples, Some(as_of))
    }

    fn is_valid(&self, sample: &RawSample) -> bool {
        sample.value.is_finite()
            && sample.value >= 0.0
            && self
                .required_labels
                .iter()
                .all(|l| sample.labels.get(l).is_some_and(|v| !v.is_empty()))
    }

    fn incident_from_run(&self, id: String, component: &Labels, run: &Run, reference: DateTime<Utc>) -> Incident {
        let history: Vec<SeverityPoint> = run
            .points
            .iter()
            .filter_map(|(timestamp, value)| {
                Severity::from_code(*value).map(|severity| SeverityPoint {
                    timestamp: *timestamp,
                    severity,
                })
            })
            .collect();
        let severity = history
            .iter()
            .map(|p| p.severity)
            .max()
            .unwrap_or(Severity::Warning);

        Incident {
            id,
            component: component.clone(),
            severity,
            firing_start: run.first(),
            firing_end: (!run.is_open(reference, self.step)).then(|| run.last()),
            history,
            sources: vec![component.clone()],
        }
    }

    fn derive_inner(&self, samples: &[RawSample], as_of: Option<DateTime<Utc>>) -> Derivation {
        let mut partition = Partition::default();
        let mut skipped = 0usize;

        for sample in samples {
            if !self.is_valid(sample) {
                skipped += 1;
                continue;
            }
            let mut key = sample.labels.clone();
            key.remove(METRIC_NAME_LABEL);
            partition.insert(key, sample.timestamp, sample.value);
        }

        if skipped > 0 {
            tracing::warn!(skipped, total = samples.len(), "dropped malformed health samples");
        }

        let Some(reference) = as_of.or(partition.latest) else {
            return Derivation { incidents: Vec::new(), skipped };
        };

        let mut incidents = Vec::new();
        let mut groups: BTreeMap<String, Incident> = BTreeMap::new();
        for (component, series) in partition.series {
            let id = incident_id(&component);
            let grouped = group_id(&component).is_some();
            for run in split_runs(&series, self.step) {
                let part = self.incident_from_run(id.clone(), &component, &run, reference);
                if !grouped {
                    incidents.push(part);
                    continue;
                }
                match groups.entry(id.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(part);
                    }
                    Entry::Occupied(mut slot) => slot.get_mut().absorb(part),
                }
            }
        }
        incidents.extend(groups.into_values().map(|mut incident| {
            incident.normalize();
            incident
        }));

        incidents.sort_by(|a, b| {
            a.firing_start
                .cmp(&b.firing_start)
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| a.component.cmp(&b.component))
        });

        tracing::debug!(incidents = incidents.len(), samples = samples.len(), "derived incidents");
        Derivation { incidents, skipped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::filter::{self, FilterCriteria, FilterValue};
    use crate::detect::IncidentState;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap()
    }

    fn labels(component: &str) -> Labels {
        [
            ("__name__".to_string(), "cluster:health:components:map".to_string()),
            ("component".to_string(), component.to_string()),
            ("layer".to_string(), "core".to_string()),
        ]
        .into()
    }

    fn sample(component: &str, minute: i64, value: f64) -> RawSample {
        RawSample {
            labels: labels(component),
            timestamp: t0() + Duration::minutes(minute),
            value,
        }
    }

    fn deriver() -> IncidentDeriver {
        IncidentDeriver::new(Duration::minutes(5))
    }

    #[test]
    fn test_single_run_becomes_closed_incident() {
        let samples = vec![
            sample("etcd", 0, 1.0),
            sample("etcd", 5, 2.0),
            sample("etcd", 10, 1.0),
            sample("etcd", 15, 0.0),
        ];
        let out = deriver().derive(&samples);
        assert_eq!(out.skipped, 0);
        assert_eq!(out.incidents.len(), 1);

        let incident = &out.incidents[0];
        assert_eq!(incident.firing_start, t0());
        assert_eq!(incident.firing_end, Some(t0() + Duration::minutes(10)));
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.history.len(), 3);
        assert_eq!(incident.state(), IncidentState::Resolved);
        assert!(!incident.component.contains_key("__name__"));
    }

    #[test]
    fn test_run_reaching_reference_is_open() {
        let samples = vec![sample("etcd", 0, 1.0), sample("etcd", 5, 1.0)];
        let out = deriver().derive_as_of(&samples, t0() + Duration::minutes(5));
        assert!(out.incidents[0].is_open());

        let later = deriver().derive_as_of(&samples, t0() + Duration::hours(1));
        assert_eq!(later.incidents[0].firing_end, Some(t0() + Duration::minutes(5)));
    }

    #[test]
    fn test_zero_in_the_middle_yields_two_incidents() {
        let samples = vec![
            sample("network", 0, 1.0),
            sample("network", 5, 0.0),
            sample("network", 10, 2.0),
        ];
        let out = deriver().derive(&samples);
        assert_eq!(out.incidents.len(), 2);
        assert_eq!(out.incidents[0].firing_end, Some(t0()));
        assert_eq!(out.incidents[0].severity, Severity::Warning);
        assert!(out.incidents[1].is_open());
        assert_eq!(out.incidents[1].severity, Severity::Critical);
        assert_eq!(out.incidents[0].id, out.incidents[1].id);
    }

    #[test]
    fn test_order_independent_and_idempotent() {
        let mut samples = vec![
            sample("etcd", 0, 1.0),
            sample("etcd", 5, 1.0),
            sample("monitoring", 0, 2.0),
            sample("monitoring", 20, 1.0),
            sample("etcd", 10, 0.0),
        ];
        let d = deriver();
        let forward = d.derive(&samples);
        samples.reverse();
        let backward = d.derive(&samples);
        assert_eq!(forward, backward);
        assert_eq!(forward, d.derive(&samples));
        // monitoring splits on the 20 minute hole
        assert_eq!(forward.incidents.len(), 3);
    }

    #[test]
    fn test_duplicate_timestamps_keep_higher_value() {
        let samples = vec![sample("etcd", 0, 1.0), sample("etcd", 0, 2.0)];
        let out = deriver().derive(&samples);
        assert_eq!(out.incidents.len(), 1);
        assert_eq!(out.incidents[0].history.len(), 1);
        assert_eq!(out.incidents[0].severity, Severity::Critical);
    }

    #[test]
    fn test_malformed_samples_are_counted() {
        let mut missing = sample("etcd", 0, 1.0);
        missing.labels.remove("component");
        let samples = vec![
            missing,
            sample("etcd", 5, f64::NAN),
            sample("etcd", 10, -1.0),
            sample("etcd", 15, f64::INFINITY),
            sample("etcd", 20, 1.0),
        ];
        let out = deriver().derive(&samples);
        assert_eq!(out.skipped, 4);
        assert_eq!(out.incidents.len(), 1);
        assert_eq!(out.incidents[0].firing_start, t0() + Duration::minutes(20));
    }

    #[test]
    fn test_custom_required_labels() {
        let samples = vec![sample("etcd", 0, 1.0)];
        let out = deriver()
            .with_required_labels(["component", "group_id"])
            .derive(&samples);
        assert_eq!(out.skipped, 1);
        assert!(out.incidents.is_empty());
    }

    #[test]
    fn test_empty_and_all_zero_inputs() {
        assert_eq!(deriver().derive(&[]), Derivation::default());
        let zeros = vec![sample("etcd", 0, 0.0), sample("etcd", 5, 0.0)];
        assert!(deriver().derive(&zeros).incidents.is_empty());
    }

    #[test]
    fn test_output_sorted_by_start() {
        let samples = vec![
            sample("z-late", 30, 1.0),
            sample("a-early", 0, 1.0),
            sample("m-mid", 10, 1.0),
        ];
        let out = deriver().derive(&samples);
        let starts: Vec<_> = out.incidents.iter().map(|i| i.firing_start).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    fn grouped(alertname: &str, minute: i64, value: f64) -> RawSample {
        let mut s = sample("monitoring", minute, value);
        s.labels.insert("group_id".to_string(), "g-1".to_string());
        s.labels.insert("src_alertname".to_string(), alertname.to_string());
        s.labels.insert("src_namespace".to_string(), "openshift-monitoring".to_string());
        s
    }

    #[test]
    fn test_series_sharing_group_id_are_one_incident() {
        let samples = vec![
            grouped("TargetDown", 0, 1.0),
            grouped("TargetDown", 5, 1.0),
            grouped("TargetDown", 10, 0.0),
            grouped("PrometheusDown", 5, 2.0),
            grouped("PrometheusDown", 10, 2.0),
            grouped("PrometheusDown", 15, 2.0),
        ];
        let out = deriver().derive_as_of(&samples, t0() + Duration::minutes(15));
        assert_eq!(out.incidents.len(), 1);

        let incident = &out.incidents[0];
        assert_eq!(incident.id, "g-1");
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.firing_start, t0());
        assert!(incident.is_open());
        assert_eq!(incident.sources.len(), 2);
        assert_eq!(incident.alert_sources().len(), 2);
        assert_eq!(incident.label("component"), Some("monitoring"));
        let stamps: Vec<_> = incident.history.iter().map(|p| p.timestamp).collect();
        assert_eq!(
            stamps,
            vec![t0(), t0() + Duration::minutes(5), t0() + Duration::minutes(10), t0() + Duration::minutes(15)]
        );

        let mut criteria = FilterCriteria::default();
        criteria.toggle(FilterValue::GroupId("g-1".into()));
        assert_eq!(filter::apply(&criteria, &out.incidents).len(), 1);
        assert_eq!(filter::incident_id_options(&out.incidents), vec!["g-1".to_string()]);
    }

    #[test]
    fn test_grouped_incident_resolves_when_every_part_has() {
        let samples = vec![
            grouped("TargetDown", 0, 1.0),
            grouped("TargetDown", 5, 0.0),
            grouped("PrometheusDown", 10, 1.0),
            grouped("PrometheusDown", 15, 0.0),
            sample("etcd", 30, 1.0),
        ];
        let out = deriver().derive(&samples);
        assert_eq!(out.incidents.len(), 2);
        let group = out.incidents.iter().find(|i| i.id == "g-1").unwrap();
        assert_eq!(group.firing_end, Some(t0() + Duration::minutes(10)));
        assert_eq!(group.severity, Severity::Warning);
        assert_eq!(group.state(), IncidentState::Resolved);
    }
}
