//! Splits a lookback window into backend-sized query ranges.

use super::{Lookback, TimeRange};
use chrono::{DateTime, Duration, Utc};

/// Default evaluation step of a range query (5 minutes).
pub const DEFAULT_STEP_SECS: i64 = 300;

/// Coarsest evaluation step accepted (one day).
pub const MAX_STEP_SECS: i64 = 86_400;

/// Points per series the backend is asked for in one query. At the default
/// step this caps every chunk at exactly one day.
pub const DEFAULT_MAX_SAMPLES: u32 = 288;

/// Partitions a span ending at `now` into contiguous chunks no longer than
/// `step * max_samples`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    step: Duration,
    max_samples: u32,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            step: Duration::seconds(DEFAULT_STEP_SECS),
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }
}

impl Chunker {
    /// Steps are clamped to `[1s, MAX_STEP_SECS]` and a zero sample budget
    /// is raised to one.
    pub fn new(step: Duration, max_samples: u32) -> Self {
        Self {
            step: step.clamp(Duration::seconds(1), Duration::seconds(MAX_STEP_SECS)),
            max_samples: max_samples.max(1),
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn max_chunk(&self) -> Duration {
        self.step
            .num_milliseconds()
            .checked_mul(i64::from(self.max_samples))
            .and_then(Duration::try_milliseconds)
            .unwrap_or(Duration::MAX)
    }

    /// Ordered oldest-to-newest. Every chunk except possibly the oldest has
    /// the full chunk length and the newest ends at `now`. A non-positive
    /// span yields no chunks.
    pub fn chunk(&self, total: Duration, now: DateTime<Utc>) -> Vec<TimeRange> {
        if total <= Duration::zero() {
            return Vec::new();
        }
        let Some(origin) = now.checked_sub_signed(total) else {
            tracing::warn!(span_secs = total.num_seconds(), "lookback span out of range");
            return Vec::new();
        };

        let max = self.max_chunk();
        let mut ranges = Vec::new();
        let mut end = now;
        while end > origin {
            let start = end
                .checked_sub_signed(max)
                .map_or(origin, |s| s.max(origin));
            ranges.push(TimeRange { start, end });
            end = start;
        }
        ranges.reverse();
        ranges
    }

    /// Chunks for a selected lookback; `None` issues no queries.
    pub fn chunk_lookback(&self, lookback: Option<Lookback>, now: DateTime<Utc>) -> Vec<TimeRange> {
        let span = lookback.map_or_else(Duration::zero, Lookback::span);
        self.chunk(span, now)
    }
}
