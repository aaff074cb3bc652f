//! Incident derivation from component-health samples, and the incident filter.

pub mod filter;
pub mod incident;
pub(crate) mod run;

use crate::source::Labels;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::filter::FilterCriteria;
pub use self::incident::{Derivation, IncidentDeriver};

/// Labels on a health series that name the alert behind it, paired with the
/// label the alert itself carries.
pub const ALERT_SOURCE_LABELS: [(&str, &str); 3] = [
    ("src_alertname", "alertname"),
    ("src_namespace", "namespace"),
    ("src_severity", "severity"),
];

/// Label whose value, when present, is used verbatim as the incident id.
pub const GROUP_ID_LABEL: &str = "group_id";

/// Severity levels for incidents and alerts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Map a health sample value to a severity. `0` (and anything that is
    /// not a positive number) means "not degraded"; positive fractions round
    /// up to the next level.
    pub fn from_code(value: f64) -> Option<Self> {
        if !(value > 0.0) || !value.is_finite() {
            None
        } else if value <= 1.0 {
            Some(Severity::Warning)
        } else {
            Some(Severity::Critical)
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
        }
    }

    /// Severity from an alert's `severity` label; unknown values are `Info`.
    pub fn from_label(label: Option<&str>) -> Self {
        label.and_then(Self::parse).unwrap_or(Severity::Info)
    }

    /// Case-insensitive; accepts the toolbar's "Informative" spelling.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "warning" => Some(Severity::Warning),
            "info" | "informative" => Some(Severity::Info),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Whether an incident or alert is still firing at the end of the window.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum IncidentState {
    Firing,
    Resolved,
}

impl IncidentState {
    pub fn from_end(end: Option<DateTime<Utc>>) -> Self {
        match end {
            None => IncidentState::Firing,
            Some(_) => IncidentState::Resolved,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "firing" => Some(IncidentState::Firing),
            "resolved" => Some(IncidentState::Resolved),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentState::Firing => "firing",
            IncidentState::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for IncidentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One observation in an incident's severity history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityPoint {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
}

/// A bounded interval of degraded health for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub component: Labels,
    pub severity: Severity,
    pub firing_start: DateTime<Utc>,
    /// `None` while the incident is still firing.
    pub firing_end: Option<DateTime<Utc>>,
    pub history: Vec<SeverityPoint>,
    /// Label sets of every health series merged into this incident, sorted.
    #[serde(default)]
    pub sources: Vec<Labels>,
}

impl Incident {
    pub fn state(&self) -> IncidentState {
        IncidentState::from_end(self.firing_end)
    }

    pub fn is_open(&self) -> bool {
        self.firing_end.is_none()
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.component.get(name).map(String::as_str)
    }

    /// Reset `severity` to the worst level in `history`.
    pub fn recompute_severity(&mut self) {
        if let Some(peak) = self.history.iter().map(|p| p.severity).max() {
            self.severity = peak;
        }
    }

    /// Health series label sets behind this incident. An incident built
    /// without `sources` reports its own component labels.
    pub fn source_labels(&self) -> impl Iterator<Item = &Labels> {
        let own = self.sources.is_empty().then_some(&self.component);
        self.sources.iter().chain(own)
    }

    /// One entry per source series that names the alert it was raised from.
    pub fn alert_sources(&self) -> Vec<Vec<(&'static str, &str)>> {
        self.source_labels()
            .map(alert_source)
            .filter(|source| !source.is_empty())
            .collect()
    }

    /// Fold another part of the same group into this incident. Recompute
    /// the severity once every part is in.
    pub fn absorb(&mut self, part: Incident) {
        self.firing_start = self.firing_start.min(part.firing_start);
        self.firing_end = match (self.firing_end, part.firing_end) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        self.component.retain(|k, v| part.component.get(k) == Some(&*v));
        self.history.extend(part.history);
        self.sources.extend(part.sources);
    }

    /// Sort history and sources; one history point per timestamp, the worst.
    pub fn normalize(&mut self) {
        self.history
            .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| b.severity.cmp(&a.severity)));
        self.history.dedup_by_key(|p| p.timestamp);
        self.sources.sort();
        self.sources.dedup();
        self.recompute_severity();
    }

    /// Whether `[start, end]` intersects the incident window. Open ends are
    /// unbounded.
    pub fn overlaps(&self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> bool {
        let starts_before_end = self.firing_end.map_or(true, |own_end| start <= own_end);
        let ends_after_start = end.map_or(true, |end| self.firing_start <= end);
        starts_before_end && ends_after_start
    }
}

/// The alert labels a health series names as its source (`alertname`,
/// `namespace`, `severity`), keyed by the alert's own label names.
pub fn alert_source(labels: &Labels) -> Vec<(&'static str, &str)> {
    ALERT_SOURCE_LABELS
        .iter()
        .filter_map(|(src, alert)| labels.get(*src).map(|v| (*alert, v.as_str())))
        .collect()
}

/// The `group_id` of a health series, when it carries a non-empty one.
pub fn group_id(labels: &Labels) -> Option<&str> {
    labels
        .get(GROUP_ID_LABEL)
        .map(String::as_str)
        .filter(|g| !g.is_empty())
}

/// Deterministic incident id for a component label set.
pub fn incident_id(component: &Labels) -> String {
    if let Some(group) = group_id(component) {
        return group.to_string();
    }
    let canonical = component
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, canonical.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_severity_codes() {
        assert_eq!(Severity::from_code(0.0), None);
        assert_eq!(Severity::from_code(-1.0), None);
        assert_eq!(Severity::from_code(f64::NAN), None);
        assert_eq!(Severity::from_code(0.5), Some(Severity::Warning));
        assert_eq!(Severity::from_code(1.0), Some(Severity::Warning));
        assert_eq!(Severity::from_code(2.0), Some(Severity::Critical));
        assert_eq!(Severity::from_code(7.0), Some(Severity::Critical));
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::from_label(Some("CRITICAL")), Severity::Critical);
        assert_eq!(Severity::from_label(Some("Informative")), Severity::Info);
        assert_eq!(Severity::from_label(Some("page")), Severity::Info);
        assert_eq!(Severity::from_label(None), Severity::Info);
    }

    #[test]
    fn test_incident_id_prefers_group_label() {
        let with_group = labels(&[("component", "etcd"), ("group_id", "abc-123")]);
        assert_eq!(incident_id(&with_group), "abc-123");

        let a = labels(&[("component", "etcd"), ("layer", "core")]);
        let b = labels(&[("layer", "core"), ("component", "etcd")]);
        let c = labels(&[("component", "kube-apiserver"), ("layer", "core")]);
        assert_eq!(incident_id(&a), incident_id(&b));
        assert_ne!(incident_id(&a), incident_id(&c));
    }

    #[test]
    fn test_overlaps_with_open_ends() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let incident = Incident {
            id: "x".into(),
            component: Labels::new(),
            severity: Severity::Warning,
            firing_start: t0,
            firing_end: Some(t0 + Duration::hours(1)),
            history: Vec::new(),
            sources: Vec::new(),
        };
        assert!(incident.overlaps(t0 + Duration::minutes(30), None));
        assert!(incident.overlaps(t0 - Duration::hours(1), Some(t0)));
        assert!(!incident.overlaps(t0 + Duration::hours(2), None));
        assert!(!incident.overlaps(t0 - Duration::hours(2), Some(t0 - Duration::hours(1))));
    }

    #[test]
    fn test_recompute_severity_takes_history_peak() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let mut incident = Incident {
            id: "x".into(),
            component: Labels::new(),
            severity: Severity::Warning,
            firing_start: t0,
            firing_end: None,
            history: vec![
                SeverityPoint { timestamp: t0, severity: Severity::Warning },
                SeverityPoint { timestamp: t0 + Duration::minutes(5), severity: Severity::Critical },
            ],
            sources: Vec::new(),
        };
        incident.recompute_severity();
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.state(), IncidentState::Firing);
    }

    #[test]
    fn test_absorb_merges_parts_of_one_group() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let part = |alertname: &str, start: i64, end: Option<i64>, severity: Severity| {
            let component = labels(&[
                ("group_id", "g-1"),
                ("component", "monitoring"),
                ("src_alertname", alertname),
            ]);
            Incident {
                id: "g-1".into(),
                component: component.clone(),
                severity,
                firing_start: t0 + Duration::minutes(start),
                firing_end: end.map(|m| t0 + Duration::minutes(m)),
                history: vec![SeverityPoint { timestamp: t0 + Duration::minutes(start), severity }],
                sources: vec![component],
            }
        };

        let mut merged = part("TargetDown", 10, Some(30), Severity::Warning);
        merged.absorb(part("Watchdog", 10, Some(60), Severity::Critical));
        merged.absorb(part("KubeletDown", 0, Some(20), Severity::Warning));
        merged.normalize();

        assert_eq!(merged.firing_start, t0);
        assert_eq!(merged.firing_end, Some(t0 + Duration::minutes(60)));
        assert_eq!(merged.severity, Severity::Critical);
        assert_eq!(merged.history.len(), 2);
        assert_eq!(merged.history[1].severity, Severity::Critical);
        assert_eq!(merged.label("component"), Some("monitoring"));
        assert_eq!(merged.label("src_alertname"), None);

        let names: Vec<&str> = merged
            .alert_sources()
            .iter()
            .map(|source| source[0].1)
            .collect();
        assert_eq!(names, vec!["KubeletDown", "TargetDown", "Watchdog"]);

        merged.absorb(part("NodeDown", 90, None, Severity::Warning));
        assert!(merged.is_open());
    }

    #[test]
    fn test_source_labels_fall_back_to_component() {
        let incident = Incident {
            id: "x".into(),
            component: labels(&[("src_alertname", "TargetDown"), ("src_namespace", "ns")]),
            severity: Severity::Warning,
            firing_start: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
            firing_end: None,
            history: Vec::new(),
            sources: Vec::new(),
        };
        assert_eq!(
            incident.alert_sources(),
            vec![vec![("alertname", "TargetDown"), ("namespace", "ns")]]
        );
        assert_eq!(group_id(&labels(&[("group_id", "")])), None);
    }
}
