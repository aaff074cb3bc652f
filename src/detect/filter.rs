//! Filter criteria and the incident filter predicate.

use super::{Incident, IncidentState, Severity};
use crate::window::Lookback;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;

/// User-selected constraints on the incident list.
///
/// An empty set means "no constraint" for that category. `days` drives what
/// is fetched and is not evaluated by [`apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterCriteria {
    pub days: Option<Lookback>,
    pub severity: BTreeSet<Severity>,
    pub state: BTreeSet<IncidentState>,
    /// Selection order matters: the first id is the selected group.
    pub group_id: Vec<String>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            days: Some(Lookback::default()),
            severity: BTreeSet::new(),
            state: BTreeSet::new(),
            group_id: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCategory {
    Severity,
    State,
    GroupId,
}

/// One selectable value of a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Severity(Severity),
    State(IncidentState),
    GroupId(String),
}

impl FilterValue {
    pub fn category(&self) -> FilterCategory {
        match self {
            FilterValue::Severity(_) => FilterCategory::Severity,
            FilterValue::State(_) => FilterCategory::State,
            FilterValue::GroupId(_) => FilterCategory::GroupId,
        }
    }
}

impl FilterCriteria {
    pub fn with_days(mut self, days: Option<Lookback>) -> Self {
        self.days = days;
        self
    }

    /// The incident whose alerts are correlated, if any.
    pub fn selected_group(&self) -> Option<&str> {
        self.group_id.first().map(String::as_str)
    }

    /// Whether any of severity, state or group id constrain the list.
    pub fn has_active_filters(&self) -> bool {
        !(self.severity.is_empty() && self.state.is_empty() && self.group_id.is_empty())
    }

    pub fn contains(&self, value: &FilterValue) -> bool {
        match value {
            FilterValue::Severity(s) => self.severity.contains(s),
            FilterValue::State(s) => self.state.contains(s),
            FilterValue::GroupId(id) => self.group_id.contains(id),
        }
    }

    /// Select `value` if it is not selected, deselect it otherwise.
    pub fn toggle(&mut self, value: FilterValue) {
        if self.contains(&value) {
            self.remove(&value);
            return;
        }
        match value {
            FilterValue::Severity(s) => {
                self.severity.insert(s);
            }
            FilterValue::State(s) => {
                self.state.insert(s);
            }
            FilterValue::GroupId(id) => self.group_id.push(id),
        }
    }

    pub fn remove(&mut self, value: &FilterValue) {
        match value {
            FilterValue::Severity(s) => {
                self.severity.remove(s);
            }
            FilterValue::State(s) => {
                self.state.remove(s);
            }
            FilterValue::GroupId(id) => self.group_id.retain(|g| g != id),
        }
    }

    pub fn clear_category(&mut self, category: FilterCategory) {
        match category {
            FilterCategory::Severity => self.severity.clear(),
            FilterCategory::State => self.state.clear(),
            FilterCategory::GroupId => self.group_id.clear(),
        }
    }

    /// Drop every chip. The lookback stays.
    pub fn clear_all(&mut self) {
        self.severity.clear();
        self.state.clear();
        self.group_id.clear();
    }

    pub fn matches(&self, incident: &Incident) -> bool {
        (self.severity.is_empty() || self.severity.contains(&incident.severity))
            && (self.state.is_empty() || self.state.contains(&incident.state()))
            && (self.group_id.is_empty() || self.group_id.iter().any(|g| *g == incident.id))
    }
}

/// Incidents passing `criteria`, newest first (ties by id).
pub fn apply<T>(criteria: &FilterCriteria, incidents: &[T]) -> Vec<T>
where
    T: Borrow<Incident> + Clone,
{
    let mut out: Vec<T> = incidents
        .iter()
        .filter(|i| criteria.matches(Borrow::<Incident>::borrow(*i)))
        .cloned()
        .collect();
    out.sort_by(|a, b| {
        let (a, b) = (Borrow::<Incident>::borrow(a), Borrow::<Incident>::borrow(b));
        b.firing_start
            .cmp(&a.firing_start)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

/// Distinct incident ids, sorted, for the group selector.
pub fn incident_id_options<T: Borrow<Incident>>(incidents: &[T]) -> Vec<String> {
    incidents
        .iter()
        .map(|i| Borrow::<Incident>::borrow(i).id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Labels;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn incident(id: &str, hour: i64, severity: Severity, resolved: bool) -> Incident {
        let start = t0() + Duration::hours(hour);
        Incident {
            id: id.to_string(),
            component: Labels::new(),
            severity,
            firing_start: start,
            firing_end: resolved.then(|| start + Duration::minutes(30)),
            history: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Twelve incidents, three of them critical.
    fn twelve() -> Vec<Arc<Incident>> {
        (0..12)
            .map(|n| {
                let severity = match n % 4 {
                    0 => Severity::Critical,
                    1 | 2 => Severity::Warning,
                    _ => Severity::Info,
                };
                Arc::new(incident(&format!("inc-{:02}", n), n * 3, severity, n % 2 == 0))
            })
            .collect()
    }

    #[test]
    fn test_empty_criteria_keeps_everything_newest_first() {
        let all = twelve();
        let out = apply(&FilterCriteria::default(), &all);
        assert_eq!(out.len(), 12);
        assert_eq!(out[0].id, "inc-11");
        assert_eq!(out[11].id, "inc-00");
        // shared, not copied
        assert!(Arc::ptr_eq(&out[0], &all[11]));
    }

    #[test]
    fn test_severity_filter() {
        let mut criteria = FilterCriteria::default();
        criteria.toggle(FilterValue::Severity(Severity::Critical));
        let out = apply(&criteria, &twelve());
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|i| i.severity == Severity::Critical));
    }

    #[test]
    fn test_state_and_group_filters_combine() {
        let mut criteria = FilterCriteria::default();
        criteria.toggle(FilterValue::State(IncidentState::Firing));
        assert_eq!(apply(&criteria, &twelve()).len(), 6);

        criteria.toggle(FilterValue::GroupId("inc-03".into()));
        criteria.toggle(FilterValue::GroupId("inc-04".into()));
        let out = apply(&criteria, &twelve());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "inc-03");
        assert_eq!(criteria.selected_group(), Some("inc-03"));
    }

    #[test]
    fn test_multiple_values_in_category_are_or() {
        let mut criteria = FilterCriteria::default();
        criteria.toggle(FilterValue::Severity(Severity::Critical));
        criteria.toggle(FilterValue::Severity(Severity::Info));
        assert_eq!(apply(&criteria, &twelve()).len(), 6);
    }

    #[test]
    fn test_ties_are_ordered_by_id() {
        let items = vec![
            incident("b", 0, Severity::Warning, false),
            incident("a", 0, Severity::Warning, false),
        ];
        let out = apply(&FilterCriteria::default(), &items);
        assert_eq!(out[0].id, "a");
        assert_eq!(out[1].id, "b");
    }

    #[test]
    fn test_toggle_remove_and_clear() {
        let mut criteria = FilterCriteria::default().with_days(Some(Lookback::OneDay));
        criteria.toggle(FilterValue::Severity(Severity::Warning));
        criteria.toggle(FilterValue::State(IncidentState::Resolved));
        criteria.toggle(FilterValue::GroupId("x".into()));
        assert!(criteria.has_active_filters());

        criteria.toggle(FilterValue::Severity(Severity::Warning));
        assert!(criteria.severity.is_empty());

        criteria.remove(&FilterValue::GroupId("x".into()));
        assert!(criteria.group_id.is_empty());
        assert_eq!(criteria.selected_group(), None);

        criteria.clear_category(FilterCategory::State);
        assert!(!criteria.has_active_filters());

        criteria.toggle(FilterValue::GroupId("y".into()));
        criteria.clear_all();
        assert!(!criteria.has_active_filters());
        assert_eq!(criteria.days, Some(Lookback::OneDay));
    }

    #[test]
    fn test_id_options_are_unique_and_sorted() {
        let items = vec![
            incident("b", 0, Severity::Warning, false),
            incident("a", 1, Severity::Warning, false),
            incident("b", 2, Severity::Warning, true),
        ];
        assert_eq!(incident_id_options(&items), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_criteria_json_shape() {
        let mut criteria = FilterCriteria::default();
        criteria.toggle(FilterValue::GroupId("g1".into()));
        let value = serde_json::to_value(&criteria).unwrap();
        assert_eq!(value["days"], "7 days");
        assert_eq!(value["groupId"][0], "g1");
        let back: FilterCriteria = serde_json::from_value(value).unwrap();
        assert_eq!(back, criteria);
    }
}
