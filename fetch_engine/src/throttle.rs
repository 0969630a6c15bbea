//! Per-worker bandwidth controller.
//!
//! Sources report every chunk they receive; the controller turns that byte
//! stream into pacing delays against the current allowed rate, and moves the
//! rate up or down from link-latency telemetry at most once per re-tune
//! period. A worker on a private link always runs at its ceiling.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Lowest allowed rate in bytes per second.
pub const MIN_RATE: u64 = 100;
/// Bytes accumulated before a pacing decision is made.
pub const GRANULARITY: u64 = 512;
/// Minimum spacing between telemetry-driven re-tunes.
pub const RETUNE_PERIOD: Duration = Duration::from_secs(120);

/// What a re-tune did to the rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retune {
    Decreased,
    Increased,
    Unchanged,
}

/// How a latency sample compares with the last one this worker saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// A different measurement from the last one observed.
    pub is_new: bool,
    /// Lower latency than the last observed measurement, or the first one.
    pub improving: bool,
}

/// Mutable rate-control state owned by one worker.
#[derive(Debug, Clone)]
pub struct Throttle {
    ceiling: u64,
    rate: u64,
    significant_latency: f64,
    local_link: bool,
    pending_bytes: u64,
    window_start: Instant,
    last_retune: Option<Instant>,
    last_latency: Option<f64>,
    observed: Option<(DateTime<Utc>, f64)>,
}

impl Throttle {
    /// Start at `ceiling` bytes/s. `significant_latency` is in seconds.
    pub fn new(ceiling: u64, significant_latency: f64, local_link: bool) -> Self {
        let ceiling = ceiling.max(MIN_RATE);
        Self {
            ceiling,
            rate: ceiling,
            significant_latency,
            local_link,
            pending_bytes: 0,
            window_start: Instant::now(),
            last_retune: None,
            last_latency: None,
            observed: None,
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Force the allowed rate, clamped to `[MIN_RATE, ceiling]`.
    pub fn set_rate(&mut self, rate: u64) {
        if !self.local_link {
            self.rate = rate.clamp(MIN_RATE, self.ceiling);
        }
    }

    /// Scale the rate by `num / den`, clamped.
    pub fn scale(&mut self, num: u64, den: u64) {
        let scaled = self.rate.saturating_mul(num) / den.max(1);
        self.set_rate(scaled);
    }

    /// Remember the latest telemetry sample and compare it with the previous
    /// one. Outlives any single fetch.
    pub fn observe(&mut self, sampled_at: DateTime<Utc>, latency_secs: f64) -> Observation {
        match self.observed.replace((sampled_at, latency_secs)) {
            None => Observation {
                is_new: true,
                improving: true,
            },
            Some((at, previous)) => Observation {
                is_new: at != sampled_at,
                improving: latency_secs < previous,
            },
        }
    }

    /// Account for `n` received bytes. Returns how long the caller should
    /// sleep to stay under the allowed rate.
    pub fn on_bytes_transferred(&mut self, n: usize, now: Instant) -> Option<Duration> {
        self.pending_bytes = self.pending_bytes.saturating_add(n as u64);
        if self.pending_bytes < GRANULARITY {
            return None;
        }
        let required = Duration::from_secs_f64(self.pending_bytes as f64 / self.rate as f64);
        let elapsed = now.saturating_duration_since(self.window_start);
        let deficit = required.saturating_sub(elapsed);
        self.pending_bytes = 0;
        self.window_start = now + deficit;
        (!deficit.is_zero()).then_some(deficit)
    }

    /// True when a telemetry re-tune is allowed at `now`.
    pub fn retune_due(&self, now: Instant) -> bool {
        !self.local_link
            && self
                .last_retune
                .is_none_or(|t| now.saturating_duration_since(t) >= RETUNE_PERIOD)
    }

    /// Apply one latency observation (seconds), or `None` when unknown.
    pub fn retune_with(&mut self, latency: Option<f64>, now: Instant) -> Retune {
        if self.local_link {
            self.rate = self.ceiling;
            return Retune::Unchanged;
        }
        self.last_retune = Some(now);
        let Some(latency) = latency else {
            return Retune::Unchanged;
        };
        let previous = self.last_latency.replace(latency);
        let before = self.rate;

        if latency > self.significant_latency && previous.is_some_and(|p| latency > p) {
            self.scale(3, 4);
        } else if latency < self.significant_latency / 2.0 && previous.is_none_or(|p| latency <= p) {
            self.scale(5, 4);
        }

        match self.rate.cmp(&before) {
            std::cmp::Ordering::Less => Retune::Decreased,
            std::cmp::Ordering::Greater => Retune::Increased,
            std::cmp::Ordering::Equal => Retune::Unchanged,
        }
    }
}
