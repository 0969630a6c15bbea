//! Client-side scheduling rules applied to a polled batch: duplicate
//! suppression, age-proportional retry eligibility, and the empty-poll backoff.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use waveform_ingestor::models::request::FetchRequest;

/// Age-proportional retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Minimum spacing between attempts.
    pub base_interval: Duration,
    /// Rows younger than this are retried every `base_interval`.
    pub young_age: Duration,
    /// Upper bound on spacing.
    pub max_interval: Duration,
    /// Past this age a row gets one attempt regardless of spacing.
    pub settle_age: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::minutes(10),
            young_age: Duration::hours(24),
            max_interval: Duration::hours(24),
            settle_age: Duration::hours(2),
        }
    }
}

impl RetryPolicy {
    /// Spacing between attempts for a row of the given age.
    pub fn retry_interval(&self, age: Duration) -> Duration {
        if age <= self.young_age {
            return self.base_interval;
        }
        let base_ms = self.base_interval.num_milliseconds() as i128;
        let max_ms = (self.max_interval.num_milliseconds() as i128).max(base_ms);
        let young_ms = self.young_age.num_milliseconds().max(1) as i128;
        let scaled_ms = base_ms * age.num_milliseconds() as i128 / young_ms;
        Duration::milliseconds(scaled_ms.clamp(base_ms, max_ms) as i64)
    }

    /// Whether `req` should be attempted at `now`.
    pub fn is_eligible(&self, req: &FetchRequest, now: DateTime<Utc>) -> bool {
        if req.updated <= req.created {
            return true;
        }
        let age = now - req.created;
        if age > self.settle_age && req.updated < req.created + self.settle_age {
            return true;
        }
        now - req.updated >= self.retry_interval(age)
    }
}

/// Split `rows` into the first occurrence of each channel/interval and the
/// duplicates that follow it. Order is preserved.
pub fn split_duplicates(rows: Vec<FetchRequest>) -> (Vec<FetchRequest>, Vec<FetchRequest>) {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut kept = Vec::with_capacity(rows.len());
    let mut dupes = Vec::new();
    for row in rows {
        if seen.insert(row.duplicate_key()) {
            kept.push(row);
        } else {
            dupes.push(row);
        }
    }
    (kept, dupes)
}

/// Doubling sleep used while the queue has nothing eligible.
#[derive(Debug, Clone)]
pub struct EmptyPollBackoff {
    initial: std::time::Duration,
    max: std::time::Duration,
    current: Option<std::time::Duration>,
}

impl Default for EmptyPollBackoff {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(30), std::time::Duration::from_secs(120))
    }
}

impl EmptyPollBackoff {
    pub fn new(initial: std::time::Duration, max: std::time::Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
        }
    }

    /// Delay for the next consecutive empty poll.
    pub fn next_delay(&mut self) -> std::time::Duration {
        let next = match self.current {
            None => self.initial,
            Some(d) => d.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    /// Called after a poll that found eligible work.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Detects a batch size repeating across polls, meaning nothing was resolved.
#[derive(Debug, Default, Clone)]
pub struct StallDetector {
    last: Option<usize>,
}

impl StallDetector {
    /// Record this poll's eligible count; true when it equals the previous
    /// non-zero count.
    pub fn observe(&mut self, eligible: usize) -> bool {
        let stalled = eligible > 0 && self.last == Some(eligible);
        self.last = Some(eligible);
        stalled
    }
}
