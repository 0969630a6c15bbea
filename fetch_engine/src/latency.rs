//! Wait-for-latency barriers and the [`LinkControl`] a worker hands to its
//! sources.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use waveform_ingestor::{models::channel::ChannelKey, sources::LinkControl};

use crate::{
    admission::AdmissionHandle,
    shutdown::sleep_or_cancel,
    telemetry::{LatencySample, Telemetry},
    throttle::{Retune, Throttle},
};

/// Thresholds shared by both barriers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySettings {
    /// Latency in seconds considered significant.
    pub significant_secs: f64,
    /// Samples older than this are ignored.
    pub freshness: Duration,
    /// Poll period of [`LinkControl::wait_for_latency`].
    pub poll: Duration,
    /// Poll period of [`LinkControl::wait_for_changing_latency`].
    pub change_poll: Duration,
}

impl Default for LatencySettings {
    fn default() -> Self {
        Self {
            significant_secs: 60.0,
            freshness: Duration::from_secs(600),
            poll: Duration::from_secs(30),
            change_poll: Duration::from_secs(5),
        }
    }
}

impl LatencySettings {
    /// How long to wait for a new sample before proceeding anyway.
    pub fn change_grace(&self) -> Duration {
        Duration::from_secs_f64((self.significant_secs / 2.0).max(0.0))
    }
}

/// Pacing state lent to a source for the duration of one fetch.
///
/// The last latency sample seen lives on the [`Throttle`], so it carries
/// over from one fetch to the next.
pub struct WorkerLink<'a> {
    channel: ChannelKey,
    telemetry: &'a dyn Telemetry,
    throttle: &'a mut Throttle,
    admission: &'a mut AdmissionHandle,
    settings: LatencySettings,
    cancel: CancellationToken,
}

impl<'a> WorkerLink<'a> {
    pub fn new(
        channel: ChannelKey,
        telemetry: &'a dyn Telemetry,
        throttle: &'a mut Throttle,
        admission: &'a mut AdmissionHandle,
        settings: LatencySettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            telemetry,
            throttle,
            admission,
            settings,
            cancel,
        }
    }

    async fn sample(&self, station: bool) -> Option<LatencySample> {
        let res = if station {
            self.telemetry.station_latency(&self.channel).await
        } else {
            self.telemetry.latency_for(&self.channel).await
        };
        match res {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(channel = %self.channel, error = %e, "latency lookup failed");
                None
            }
        }
    }

    async fn maybe_retune(&mut self, now: Instant) {
        if !self.throttle.retune_due(now) {
            return;
        }
        let latency = self.sample(false).await.map(|s| s.latency_secs);
        let outcome = self.throttle.retune_with(latency, now);
        if outcome != Retune::Unchanged {
            tracing::debug!(
                channel = %self.channel,
                ?latency,
                rate = self.throttle.rate(),
                ?outcome,
                "throttle re-tuned"
            );
        }
    }
}

#[async_trait]
impl LinkControl for WorkerLink<'_> {
    async fn on_bytes_transferred(&mut self, n: usize) {
        let now = Instant::now();
        self.maybe_retune(now).await;
        if let Some(delay) = self.throttle.on_bytes_transferred(n, now) {
            sleep_or_cancel(delay, &self.cancel).await;
        }
    }

    async fn wait_for_latency(&mut self) -> Option<f64> {
        let mut paused = false;
        let mut last = None;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(s) = self.sample(true).await else {
                break;
            };
            last = Some(s.latency_secs);
            if s.latency_secs <= self.settings.significant_secs / 2.0
                || !s.is_fresh(self.settings.freshness)
            {
                break;
            }
            if !paused {
                tracing::info!(
                    channel = %self.channel,
                    latency = s.latency_secs,
                    "station latency high; pausing"
                );
            }
            paused = true;
            self.admission.mark_impaired();
            if !sleep_or_cancel(self.settings.poll, &self.cancel).await {
                break;
            }
        }
        if paused {
            self.admission.acquire_if_impaired(&self.cancel).await;
        } else {
            self.admission.release();
        }
        last
    }

    async fn wait_for_changing_latency(&mut self) {
        let deadline = Instant::now() + self.settings.change_grace();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(s) = self.sample(false).await {
                let seen = self.throttle.observe(s.sampled_at, s.latency_secs);
                let fresh = s.is_fresh(self.settings.freshness);
                if fresh && s.latency_secs < self.settings.significant_secs {
                    if seen.is_new {
                        if seen.improving {
                            self.throttle.scale(5, 4);
                        }
                        break;
                    }
                } else {
                    self.throttle.scale(4, 5);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(channel = %self.channel, "no new latency sample; proceeding");
                break;
            }
            self.admission.mark_impaired();
            let nap = self.settings.change_poll.min(deadline - now);
            if !sleep_or_cancel(nap, &self.cancel).await {
                break;
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
