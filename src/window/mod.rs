//! Lookback windows and the query time ranges derived from them.

pub mod chunk;

pub use self::chunk::Chunker;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A query window `[start, end]` handed to the metrics backend.
///
/// Only produced by [`TimeRange::new`] or the [`Chunker`], so `start < end`
/// always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Returns `None` unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Inclusive on both ends, matching `query_range` evaluation.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} .. {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// The lookback windows the incidents view accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Lookback {
    #[serde(rename = "1 day")]
    OneDay,
    #[serde(rename = "3 days")]
    ThreeDays,
    #[serde(rename = "7 days")]
    SevenDays,
    #[serde(rename = "15 days")]
    FifteenDays,
}

impl Lookback {
    pub const ALL: [Lookback; 4] = [
        Lookback::OneDay,
        Lookback::ThreeDays,
        Lookback::SevenDays,
        Lookback::FifteenDays,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Lookback::OneDay => "1 day",
            Lookback::ThreeDays => "3 days",
            Lookback::SevenDays => "7 days",
            Lookback::FifteenDays => "15 days",
        }
    }

    pub fn days(self) -> i64 {
        match self {
            Lookback::OneDay => 1,
            Lookback::ThreeDays => 3,
            Lookback::SevenDays => 7,
            Lookback::FifteenDays => 15,
        }
    }

    pub fn span(self) -> Duration {
        Duration::days(self.days())
    }

    /// Parse one of the accepted labels. Whitespace and case are ignored;
    /// anything else is `None`.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.split_whitespace().collect::<Vec<_>>().join(" ");
        Self::ALL
            .into_iter()
            .find(|l| l.label().eq_ignore_ascii_case(&normalized))
    }

    /// Span for a raw label; unknown labels mean "no lookback".
    pub fn span_for_label(label: &str) -> Duration {
        match Self::parse(label) {
            Some(lookback) => lookback.span(),
            None => {
                tracing::warn!(%label, "unrecognized lookback label, treating as empty window");
                Duration::zero()
            }
        }
    }
}

impl Default for Lookback {
    fn default() -> Self {
        Lookback::SevenDays
    }
}

impl std::fmt::Display for Lookback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}
