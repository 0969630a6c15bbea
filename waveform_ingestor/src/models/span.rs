//! Half-open UTC time spans and the small amount of interval arithmetic the
//! fetch pipeline needs (coalescing, coverage checks, remainders).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSpan {
    /// Inclusive start (UTC).
    pub start: DateTime<Utc>,
    /// Exclusive end (UTC).
    pub end: DateTime<Utc>,
}

impl TimeSpan {
    /// Returns `None` when `end <= start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    /// Span starting at `start` lasting `duration`. `None` for non-positive durations.
    pub fn from_duration(start: DateTime<Utc>, duration: Duration) -> Option<Self> {
        Self::new(start, start + duration)
    }

    /// Length of the span.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// True when the two spans share at least one instant.
    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when `other` lies entirely within `self`.
    pub fn contains(&self, other: &TimeSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Sort and coalesce spans; touching or overlapping spans are merged.
pub fn coalesce<I>(spans: I) -> Vec<TimeSpan>
where
    I: IntoIterator<Item = TimeSpan>,
{
    let mut sorted: Vec<TimeSpan> = spans.into_iter().collect();
    sorted.sort_by_key(|s| s.start);

    let mut out: Vec<TimeSpan> = Vec::with_capacity(sorted.len());
    for span in sorted {
        match out.last_mut() {
            Some(last) if span.start <= last.end => {
                if span.end > last.end {
                    last.end = span.end;
                }
            }
            _ => out.push(span),
        }
    }
    out
}

/// True when the union of `spans` covers all of `target`.
pub fn covers<I>(spans: I, target: &TimeSpan) -> bool
where
    I: IntoIterator<Item = TimeSpan>,
{
    coalesce(spans).iter().any(|s| s.contains(target))
}

/// The parts of `target` not covered by any of `spans`, in time order.
pub fn remainder<I>(target: &TimeSpan, spans: I) -> Vec<TimeSpan>
where
    I: IntoIterator<Item = TimeSpan>,
{
    let mut out = Vec::new();
    let mut cursor = target.start;
    for s in coalesce(spans) {
        if s.end <= cursor {
            continue;
        }
        if s.start >= target.end {
            break;
        }
        if s.start > cursor {
            out.push(TimeSpan {
                start: cursor,
                end: s.start,
            });
        }
        cursor = cursor.max(s.end);
        if cursor >= target.end {
            break;
        }
    }
    if cursor < target.end {
        out.push(TimeSpan {
            start: cursor,
            end: target.end,
        });
    }
    out
}
