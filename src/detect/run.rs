//! Contiguous non-zero run detection shared by incident and alert derivation.

use crate::source::Labels;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// One series, sorted by timestamp, one value per timestamp.
pub(crate) type Series = BTreeMap<DateTime<Utc>, f64>;

/// Samples grouped by identity key, deduplicated per timestamp.
#[derive(Debug, Default)]
pub(crate) struct Partition {
    pub series: BTreeMap<Labels, Series>,
    pub latest: Option<DateTime<Utc>>,
}

impl Partition {
    /// Duplicate timestamps for the same key keep the higher value.
    pub fn insert(&mut self, key: Labels, timestamp: DateTime<Utc>, value: f64) {
        self.series
            .entry(key)
            .or_default()
            .entry(timestamp)
            .and_modify(|v| {
                if value > *v {
                    *v = value;
                }
            })
            .or_insert(value);
        self.latest = Some(self.latest.map_or(timestamp, |l| l.max(timestamp)));
    }
}

/// A maximal stretch of positive values.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Run {
    pub points: Vec<(DateTime<Utc>, f64)>,
    /// Timestamp of the zero sample that ended the run, if one did.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn first(&self) -> DateTime<Utc> {
        self.points[0].0
    }

    pub fn last(&self) -> DateTime<Utc> {
        self.points[self.points.len() - 1].0
    }

    /// Still firing at `reference`: not ended by a zero sample and its last
    /// point lies less than one step before `reference`.
    pub fn is_open(&self, reference: DateTime<Utc>, step: Duration) -> bool {
        self.closed_at.is_none() && reference - self.last() < step
    }
}

/// Split a series into runs. A zero value ends the current run, and so does a
/// hole of more than one `step` between consecutive samples.
pub(crate) fn split_runs(series: &Series, step: Duration) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut current: Option<Run> = None;

    for (&ts, &value) in series {
        if value > 0.0 {
            if let Some(run) = current.take() {
                if ts - run.last() > step {
                    runs.push(run);
                } else {
                    current = Some(run);
                }
            }
            current
                .get_or_insert_with(|| Run { points: Vec::new(), closed_at: None })
                .points
                .push((ts, value));
        } else if let Some(mut run) = current.take() {
            if ts - run.last() <= step {
                run.closed_at = Some(ts);
            }
            runs.push(run);
        }
    }
    runs.extend(current);
    runs
}
