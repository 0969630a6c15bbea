//! One worker per acquisition target.
//!
//! Each poll reads the target's OPEN rows, drops duplicates, applies the
//! retry schedule, and then walks the survivors most-recent-first: skip what
//! holdings already cover, fetch the rest through the gap type's source,
//! deliver, and record the outcome. A failure inside one row is logged and
//! never aborts the rest of the batch.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use waveform_ingestor::{
    io::sink::SinkConnector,
    models::{
        block::Block,
        request::{FetchRequest, RequestStatus},
        span::{self, TimeSpan},
    },
    sources::FetchOutcome,
};

use crate::{
    admission::{Admission, AdmissionGate, AdmissionHandle},
    alert::{self, AlertKind},
    config::{EngineSection, TargetCfg},
    error::EngineError,
    holdings::{
        HoldingsOracle,
        dedup::{self, DedupMode},
    },
    latency::{LatencySettings, WorkerLink},
    queue::{
        QueueFilter, WorkQueue,
        retry::{EmptyPollBackoff, RetryPolicy, StallDetector, split_duplicates},
    },
    shutdown::sleep_or_cancel,
    sink_writer::SinkWriter,
    sources::Route,
    telemetry::Telemetry,
    throttle::Throttle,
};

/// Pause when a poll yields the same non-zero batch as the last one.
pub const STALL_PAUSE: Duration = Duration::from_secs(60);

/// Static per-worker settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub name: String,
    pub gap_type: String,
    pub channel_pattern: Option<regex::Regex>,
    /// How far back request starts are polled.
    pub window: chrono::Duration,
    pub throttle_ceiling: u64,
    pub local_link: bool,
    pub authoritative: bool,
    pub latency: LatencySettings,
    pub live_window: chrono::Duration,
    pub redundant_tolerance: usize,
    pub dry_run: bool,
    pub retry: RetryPolicy,
    /// Exit instead of sleeping once nothing is eligible.
    pub single_shot: bool,
}

impl WorkerSettings {
    pub fn from_config(
        name: &str,
        target: &TargetCfg,
        engine: &EngineSection,
        single_shot: bool,
    ) -> Result<Self, EngineError> {
        let channel_pattern = target
            .channel_regex()
            .map_err(|e| EngineError::InvalidConfig(format!("target {name:?}: {e}")))?;
        let days = |d: i64| {
            chrono::Duration::try_days(d)
                .ok_or_else(|| EngineError::InvalidConfig(format!("target {name:?}: window of {d} days")))
        };
        Ok(Self {
            name: name.to_string(),
            gap_type: target.gap_type.clone(),
            channel_pattern,
            window: days(target.window_days.unwrap_or(engine.queue_window_days))?,
            throttle_ceiling: target.throttle_ceiling.unwrap_or(engine.throttle_ceiling),
            local_link: target.local_link,
            authoritative: target.authoritative,
            latency: engine.latency_settings(),
            live_window: days(engine.live_window_days)?,
            redundant_tolerance: engine.redundant_tolerance,
            dry_run: engine.dry_run,
            retry: RetryPolicy::default(),
            single_shot,
        })
    }
}

/// Shared collaborators a worker is built from.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<dyn WorkQueue>,
    pub holdings: Arc<dyn HoldingsOracle>,
    pub telemetry: Arc<dyn Telemetry>,
    pub route: Route,
    pub admission: AdmissionGate,
    pub live_sink: Option<Arc<dyn SinkConnector>>,
    pub archive_sink: Option<Arc<dyn SinkConnector>>,
}

/// How one row ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// Fetched and fully covered.
    Filled,
    /// Fetched, remainder left OPEN.
    Partial,
    /// Source said no data can exist.
    NoData,
    /// Source returned nothing yet.
    Empty,
    /// Holdings already covered the interval; no fetch.
    AlreadyHeld,
    /// Transient source failure.
    Failed,
    /// Shutdown arrived before the fetch started.
    Cancelled,
}

/// Counters over the worker's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: u64,
    pub fetches: u64,
    pub filled: u64,
    pub partial: u64,
    pub nodata: u64,
    pub empty: u64,
    pub already_held: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub faults: u64,
    pub blocks_delivered: u64,
    pub blocks_dropped: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Filled => self.filled += 1,
            RowOutcome::Partial => self.partial += 1,
            RowOutcome::NoData => self.nodata += 1,
            RowOutcome::Empty => self.empty += 1,
            RowOutcome::AlreadyHeld => self.already_held += 1,
            RowOutcome::Failed => self.failed += 1,
            RowOutcome::Cancelled => {}
        }
    }
}

/// What a single poll found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Nothing eligible.
    Idle,
    /// This many rows were attempted.
    Worked(usize),
}

/// Drives one target.
pub struct Worker {
    settings: WorkerSettings,
    deps: WorkerDeps,
    throttle: Throttle,
    admission: AdmissionHandle,
    sink: SinkWriter,
    backoff: EmptyPollBackoff,
    stall: StallDetector,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(settings: WorkerSettings, deps: WorkerDeps) -> Self {
        let throttle = Throttle::new(
            settings.throttle_ceiling,
            settings.latency.significant_secs,
            settings.local_link,
        );
        let admission = deps.admission.handle();
        let sink = SinkWriter::new(
            deps.live_sink.clone(),
            deps.archive_sink.clone(),
            settings.live_window,
            settings.dry_run,
        );
        Self {
            settings,
            deps,
            throttle,
            admission,
            sink,
            backoff: EmptyPollBackoff::default(),
            stall: StallDetector::default(),
            stats: WorkerStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Poll until cancelled, or until idle in single-shot mode.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerStats {
        let span = tracing::info_span!("worker", name = %self.settings.name);
        async move {
            tracing::info!(gap_type = %self.settings.gap_type, "worker started");
            while !cancel.is_cancelled() {
                let delay = match self.poll_once(&cancel).await {
                    Ok(Poll::Worked(_)) => {
                        self.backoff.reset();
                        continue;
                    }
                    Ok(Poll::Idle) if self.settings.single_shot => break,
                    Ok(Poll::Idle) => self.backoff.next_delay(),
                    Err(e) => {
                        tracing::warn!(error = %format!("{e:#}"), "poll failed");
                        self.backoff.next_delay()
                    }
                };
                tracing::debug!(delay_secs = delay.as_secs(), "queue idle; backing off");
                if !sleep_or_cancel(delay, &cancel).await {
                    break;
                }
            }
            self.admission.release_forced();
            self.sink.close().await;
            tracing::info!(stats = ?self.stats, "worker stopped");
            self.stats
        }
        .instrument(span)
        .await
    }

    fn filter(&self) -> QueueFilter {
        QueueFilter {
            gap_type: self.settings.gap_type.clone(),
            channel_pattern: self.settings.channel_pattern.clone(),
            window_start: Utc::now()
                .checked_sub_signed(self.settings.window)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            window_end: None,
        }
    }

    /// One pass over the queue.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> anyhow::Result<Poll> {
        self.stats.polls += 1;
        let rows = self.deps.queue.select_open(&self.filter()).await?;

        let (rows, dupes) = split_duplicates(rows);
        for dupe in dupes {
            self.stats.duplicates += 1;
            tracing::debug!(id = dupe.id, channel = %dupe.channel, "duplicate request discarded");
            self.deps
                .queue
                .mark_status(dupe.id, RequestStatus::NoData)
                .await?;
        }

        let now = Utc::now();
        let eligible: Vec<FetchRequest> = rows
            .into_iter()
            .filter(|r| self.settings.retry.is_eligible(r, now))
            .collect();

        if eligible.is_empty() {
            self.admission.release_forced();
            self.stall.observe(0);
            return Ok(Poll::Idle);
        }

        if self.stall.observe(eligible.len()) {
            tracing::info!(
                eligible = eligible.len(),
                "no progress since last poll; pausing"
            );
            if !sleep_or_cancel(STALL_PAUSE, cancel).await {
                return Ok(Poll::Worked(0));
            }
        }

        let mut attempted = 0;
        for req in eligible {
            if cancel.is_cancelled() {
                break;
            }
            attempted += 1;
            let id = req.id;
            let result = AssertUnwindSafe(self.process_row(&req, cancel))
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(outcome)) => {
                    tracing::debug!(id, ?outcome, "row done");
                    self.stats.record(outcome);
                }
                Ok(Err(e)) => {
                    self.stats.faults += 1;
                    tracing::warn!(id, error = %format!("{e:#}"), "row failed");
                    touch_quietly(self.deps.queue.as_ref(), id).await;
                }
                Err(_) => {
                    self.stats.faults += 1;
                    tracing::error!(id, "row processing panicked");
                    touch_quietly(self.deps.queue.as_ref(), id).await;
                }
            }
            self.admission.release_forced();
        }
        Ok(Poll::Worked(attempted))
    }

    async fn process_row(
        &mut self,
        req: &FetchRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RowOutcome> {
        if self.admission.acquire_if_impaired(cancel).await == Admission::Cancelled {
            return Ok(RowOutcome::Cancelled);
        }

        if self
            .deps
            .holdings
            .is_fully_covered(&req.channel, req.start, req.end())
            .await?
        {
            self.deps.queue.mark_status(req.id, RequestStatus::Filled).await?;
            return Ok(RowOutcome::AlreadyHeld);
        }

        let source = Arc::clone(&self.deps.route.source);
        self.stats.fetches += 1;
        let fetched = {
            let mut link = WorkerLink::new(
                req.channel.clone(),
                self.deps.telemetry.as_ref(),
                &mut self.throttle,
                &mut self.admission,
                self.settings.latency,
                cancel.clone(),
            );
            source.fetch(req, &mut link).await
        };

        match fetched {
            Err(e) => {
                tracing::warn!(
                    id = req.id,
                    channel = %req.channel,
                    source = source.name(),
                    error = %e,
                    "fetch failed; will retry"
                );
                self.deps.queue.touch_updated(req.id).await?;
                Ok(RowOutcome::Failed)
            }
            Ok(FetchOutcome::NoData) => {
                if self.deps.queue.mark_status(req.id, RequestStatus::NoData).await? {
                    alert::raise(
                        AlertKind::PermanentNoData,
                        format_args!("{} {} +{}s has no data", req.channel, req.start, req.duration.num_seconds()),
                    );
                }
                Ok(RowOutcome::NoData)
            }
            Ok(FetchOutcome::Empty) => {
                self.deps.queue.touch_updated(req.id).await?;
                Ok(RowOutcome::Empty)
            }
            Ok(FetchOutcome::Blocks(blocks)) => self.deliver(req, blocks).await,
        }
    }

    async fn deliver(&mut self, req: &FetchRequest, blocks: Vec<Block>) -> anyhow::Result<RowOutcome> {
        let coverage: Vec<TimeSpan> = blocks.iter().filter_map(Block::span).collect();

        let mode = DedupMode::for_fetch(
            self.deps.route.immediate,
            self.settings.authoritative,
            self.settings.redundant_tolerance,
        );
        let filtered = dedup::filter_redundant(self.deps.holdings.as_ref(), blocks, mode).await?;
        let report = self.sink.write_batch(&filtered.kept, Utc::now()).await;
        self.stats.blocks_delivered += report.delivered() as u64;
        self.stats.blocks_dropped += report.dropped as u64;
        tracing::debug!(
            id = req.id,
            kept = filtered.kept.len(),
            redundant = filtered.redundant + filtered.truncated,
            ?report,
            "blocks delivered"
        );

        let remainder = span::remainder(&req.span(), coverage);
        if remainder.is_empty() {
            self.deps.queue.mark_status(req.id, RequestStatus::Filled).await?;
            Ok(RowOutcome::Filled)
        } else {
            let ids = self.deps.queue.insert_gap_if_partial(req, &remainder).await?;
            tracing::debug!(id = req.id, remainder = remainder.len(), ?ids, "partial fill");
            Ok(RowOutcome::Partial)
        }
    }
}

async fn touch_quietly(queue: &dyn WorkQueue, id: i64) {
    if let Err(e) = queue.touch_updated(id).await {
        tracing::warn!(id, error = %format!("{e:#}"), "could not refresh request timestamp");
    }
}
