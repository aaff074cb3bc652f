//! Synthetic incident scenarios rendered as Prometheus series.
//!
//! A scenario lists incidents by offset from "now" so that fixtures stay
//! valid whenever they are loaded:
//!
//! ```toml
//! [[incidents]]
//! id = "etcd-quorum"
//! component = "etcd"
//! start = "2d"        # began two days ago
//! duration = "3h"     # omit while still firing
//!
//! [[incidents.alerts]]
//! name = "etcdMembersDown"
//! namespace = "openshift-etcd"
//! severity = "critical"
//! ```

use super::{timestamp_to_secs, Labels, MatrixSeries, METRIC_NAME_LABEL};
use crate::detect::{Severity, GROUP_ID_LABEL};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

pub const DEFAULT_HEALTH_METRIC: &str = "cluster:health:components:map";
pub const DEFAULT_ALERTS_METRIC: &str = "ALERTS";

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_health_metric")]
    pub health_metric: String,
    #[serde(default = "default_alerts_metric")]
    pub alerts_metric: String,
    #[serde(default)]
    pub incidents: Vec<ScenarioIncident>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioIncident {
    pub id: String,
    pub component: String,
    #[serde(default = "default_layer")]
    pub layer: String,
    /// Health level; defaults to the worst alert severity.
    #[serde(default)]
    pub severity: Option<Severity>,
    /// How long before "now" the incident began, e.g. `"90m"`.
    pub start: String,
    /// How long it lasted; `None` keeps it firing.
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub alerts: Vec<ScenarioAlert>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioAlert {
    pub name: String,
    pub namespace: String,
    #[serde(default = "default_alert_severity")]
    pub severity: Severity,
}

fn default_health_metric() -> String {
    DEFAULT_HEALTH_METRIC.to_string()
}

fn default_alerts_metric() -> String {
    DEFAULT_ALERTS_METRIC.to_string()
}

fn default_layer() -> String {
    "core".to_string()
}

fn default_alert_severity() -> Severity {
    Severity::Warning
}

/// Parse `"30s"`, `"15m"`, `"2h"` or `"7d"`.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in duration {:?}", value))?;
    let (digits, unit) = value.split_at(split);
    let amount: i64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {:?}, use e.g. \"30m\", \"2h\", \"7d\"", value))?;
    let duration = match unit {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        other => return Err(format!("unknown duration unit {:?}", other)),
    };
    duration.ok_or_else(|| format!("duration {:?} is out of range", value))
}

impl Scenario {
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Render every incident as health series plus one `ALERTS` series per
    /// alert. Points sit on the `now - k * step` grid, which is where chunked
    /// range queries ending at `now` evaluate.
    pub fn series(&self, now: DateTime<Utc>, step: Duration) -> Result<Vec<MatrixSeries>, String> {
        let mut out = Vec::new();
        for incident in &self.incidents {
            let start = now
                .checked_sub_signed(parse_duration(&incident.start)?)
                .ok_or_else(|| format!("start of {:?} is out of range", incident.id))?;
            let end = match &incident.duration {
                Some(d) => start.checked_add_signed(parse_duration(d)?).map_or(now, |end| end.min(now)),
                None => now,
            };
            let resolved = end < now;
            let points = grid(start, end, now, step);
            if points.is_empty() {
                tracing::warn!(id = %incident.id, "scenario incident has no samples on the step grid");
                continue;
            }
            // Resolution shows up as an explicit zero on the next grid point.
            let closing = points
                .last()
                .map(|last| *last + step)
                .filter(|next| resolved && *next <= now);

            let severity = incident.severity.unwrap_or_else(|| {
                incident
                    .alerts
                    .iter()
                    .map(|a| a.severity)
                    .max()
                    .unwrap_or(Severity::Warning)
            });
            let health_value = severity.code().max(1).to_string();

            let mut base = Labels::new();
            base.insert(METRIC_NAME_LABEL.to_string(), self.health_metric.clone());
            base.insert(GROUP_ID_LABEL.to_string(), incident.id.clone());
            base.insert("component".to_string(), incident.component.clone());
            base.insert("layer".to_string(), incident.layer.clone());

            if incident.alerts.is_empty() {
                out.push(render(base, &points, closing, &health_value));
                continue;
            }
            for alert in &incident.alerts {
                let mut health = base.clone();
                health.insert("src_alertname".to_string(), alert.name.clone());
                health.insert("src_namespace".to_string(), alert.namespace.clone());
                health.insert("src_severity".to_string(), alert.severity.to_string());
                out.push(render(health, &points, closing, &health_value));

                let mut labels = Labels::new();
                labels.insert(METRIC_NAME_LABEL.to_string(), self.alerts_metric.clone());
                labels.insert("alertname".to_string(), alert.name.clone());
                labels.insert("namespace".to_string(), alert.namespace.clone());
                labels.insert("severity".to_string(), alert.severity.to_string());
                labels.insert("alertstate".to_string(), "firing".to_string());
                out.push(render(labels, &points, None, "1"));
            }
        }
        Ok(out)
    }
}

fn grid(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>, step: Duration) -> Vec<DateTime<Utc>> {
    let step_ms = step.num_milliseconds().max(1);
    let oldest = (now - start).num_milliseconds() / step_ms;
    let mut points: Vec<DateTime<Utc>> = (0..=oldest)
        .map(|k| now - Duration::milliseconds(k * step_ms))
        .filter(|ts| *ts >= start && *ts <= end)
        .collect();
    points.reverse();
    points
}

fn render(
    metric: Labels,
    points: &[DateTime<Utc>],
    closing: Option<DateTime<Utc>>,
    value: &str,
) -> MatrixSeries {
    let mut values: Vec<(f64, String)> = points
        .iter()
        .map(|ts| (timestamp_to_secs(*ts), value.to_string()))
        .collect();
    if let Some(ts) = closing {
        values.push((timestamp_to_secs(ts), "0".to_string()));
    }
    MatrixSeries { metric, values }
}
