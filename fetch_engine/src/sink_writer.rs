//! Routes recovered blocks to the live or archive store.
//!
//! Each worker owns one writer. Connections are opened lazily, closed after
//! every batch, and a failed write gets exactly one reconnect-and-retry
//! before the block is dropped and an alert is raised.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use waveform_ingestor::{
    io::sink::{DataSink, SinkConnector, SinkError},
    models::block::Block,
};

use crate::alert::{self, AlertKind};

/// Which store a block is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Live,
    Archive,
}

/// Counts for one delivered batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub live: usize,
    pub archive: usize,
    /// Blocks given up on after the retry.
    pub dropped: usize,
    /// Blocks accounted for in no-output mode.
    pub suppressed: usize,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.live + self.archive
    }
}

struct Lane {
    name: &'static str,
    connector: Option<Arc<dyn SinkConnector>>,
    conn: Option<Box<dyn DataSink>>,
}

impl Lane {
    fn new(name: &'static str, connector: Option<Arc<dyn SinkConnector>>) -> Self {
        Self {
            name,
            connector,
            conn: None,
        }
    }

    async fn try_write(&mut self, connector: &dyn SinkConnector, block: &Block) -> Result<(), SinkError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => connector.open().await?,
        };
        self.conn.insert(conn).write(block).await
    }

    async fn deliver(&mut self, connector: &dyn SinkConnector, block: &Block) -> Result<(), SinkError> {
        match self.try_write(connector, block).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(
                    sink = self.name,
                    addr = %connector.describe(),
                    error = %first,
                    "sink write failed; reconnecting"
                );
                self.close().await;
                self.try_write(connector, block).await
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(sink = self.name, error = %e, "sink close failed");
            }
        }
    }
}

/// Per-worker delivery state.
pub struct SinkWriter {
    live: Lane,
    archive: Lane,
    live_window: Duration,
    dry_run: bool,
}

impl SinkWriter {
    /// At least one connector should be present unless `dry_run` is set; a
    /// block whose preferred store is missing goes to the other one.
    pub fn new(
        live: Option<Arc<dyn SinkConnector>>,
        archive: Option<Arc<dyn SinkConnector>>,
        live_window: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            live: Lane::new("live", live),
            archive: Lane::new("archive", archive),
            live_window,
            dry_run,
        }
    }

    /// Store chosen for `block` at `now`.
    pub fn route(&self, block: &Block, now: DateTime<Utc>) -> Route {
        let cutoff = now
            .checked_sub_signed(self.live_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let preferred = if block.start >= cutoff {
            Route::Live
        } else {
            Route::Archive
        };
        match preferred {
            Route::Live if self.live.connector.is_none() && self.archive.connector.is_some() => {
                Route::Archive
            }
            Route::Archive if self.archive.connector.is_none() && self.live.connector.is_some() => {
                Route::Live
            }
            r => r,
        }
    }

    /// Deliver a batch, then close every connection it opened.
    pub async fn write_batch(&mut self, blocks: &[Block], now: DateTime<Utc>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if self.dry_run {
            report.suppressed = blocks.len();
            tracing::debug!(blocks = blocks.len(), "no-output mode; blocks not sent");
            return report;
        }

        for block in blocks {
            let route = self.route(block, now);
            let lane = match route {
                Route::Live => &mut self.live,
                Route::Archive => &mut self.archive,
            };
            let Some(connector) = lane.connector.clone() else {
                report.dropped += 1;
                alert::raise(
                    AlertKind::DeliveryDropped,
                    format_args!("no sink configured for {} block at {}", block.channel, block.start),
                );
                continue;
            };
            match lane.deliver(connector.as_ref(), block).await {
                Ok(()) => match route {
                    Route::Live => report.live += 1,
                    Route::Archive => report.archive += 1,
                },
                Err(e) => {
                    report.dropped += 1;
                    lane.close().await;
                    alert::raise(
                        AlertKind::DeliveryDropped,
                        format_args!(
                            "dropped {} block at {} for {} sink: {e}",
                            block.channel, block.start, lane.name
                        ),
                    );
                }
            }
        }

        self.close().await;
        report
    }

    /// Close both connections.
    pub async fn close(&mut self) {
        self.live.close().await;
        self.archive.close().await;
    }
}
