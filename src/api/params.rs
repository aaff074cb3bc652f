//! Filter criteria as URL query parameters.
//!
//! `days=7%20days&severity=critical,warning&state=firing&groupId=a,b`.
//! Multi-valued keys are comma separated and may also repeat; a literal comma
//! inside a value travels percent-encoded. Names and values are
//! case-insensitive; unknown values are dropped. `days=` with no value means
//! "no lookback".

use crate::detect::{FilterCriteria, IncidentState, Severity};
use crate::window::Lookback;
use std::borrow::Cow;
use tracing::debug;

/// Parse a raw query string. A missing `days` means `default_days`; an empty
/// or unknown `days` value means "no lookback".
pub fn parse_query(query: &str, default_days: Lookback) -> FilterCriteria {
    let mut criteria = FilterCriteria::default().with_days(Some(default_days));

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(key);

        match key.to_ascii_lowercase().as_str() {
            "days" => {
                let value = decode(raw);
                criteria.days = Lookback::parse(&value);
                if criteria.days.is_none() && !value.trim().is_empty() {
                    tracing::warn!(days = %value, "unrecognized lookback in query");
                }
            }
            "severity" => {
                for v in values(raw) {
                    match Severity::parse(&v) {
                        Some(s) => {
                            criteria.severity.insert(s);
                        }
                        None => debug!(severity = %v, "ignoring unknown severity"),
                    }
                }
            }
            "state" => {
                for v in values(raw) {
                    match IncidentState::parse(&v) {
                        Some(s) => {
                            criteria.state.insert(s);
                        }
                        None => debug!(state = %v, "ignoring unknown state"),
                    }
                }
            }
            "groupid" | "group_id" => {
                for v in values(raw) {
                    if !criteria.group_id.contains(&v) {
                        criteria.group_id.push(v);
                    }
                }
            }
            other => debug!(key = other, "ignoring unknown query parameter"),
        }
    }
    criteria
}

/// Render criteria in the form [`parse_query`] reads.
pub fn to_query(criteria: &FilterCriteria) -> String {
    let days = criteria.days.map(|d| urlencoding::encode(d.label())).unwrap_or_default();
    let mut parts = vec![format!("days={}", days)];
    if !criteria.severity.is_empty() {
        let joined: Vec<&str> = criteria.severity.iter().map(|s| s.as_str()).collect();
        parts.push(format!("severity={}", joined.join(",")));
    }
    if !criteria.state.is_empty() {
        let joined: Vec<&str> = criteria.state.iter().map(|s| s.as_str()).collect();
        parts.push(format!("state={}", joined.join(",")));
    }
    if !criteria.group_id.is_empty() {
        let joined: Vec<Cow<'_, str>> = criteria
            .group_id
            .iter()
            .map(|g| urlencoding::encode(g))
            .collect();
        parts.push(format!("groupId={}", joined.join(",")));
    }
    parts.join("&")
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Split before decoding so an encoded comma stays part of its value.
fn values(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(|v| decode(v).trim().to_string())
        .filter(|v| !v.is_empty())
}
