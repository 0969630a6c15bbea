//! Coverage already present downstream, and the checks that keep the engine
//! from fetching or delivering it twice.
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use waveform_ingestor::models::channel::ChannelKey;

pub mod dedup;
pub mod repo;

pub use repo::SqliteHoldings;

/// Result type used by holdings queries.
pub type HoldingsResult<T> = anyhow::Result<T>;

/// Read-only view of downstream coverage.
#[async_trait]
pub trait HoldingsOracle: Send + Sync {
    /// True when `[start, end)` is contiguously held for `channel`.
    async fn is_fully_covered(
        &self,
        channel: &ChannelKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> HoldingsResult<bool>;

    /// True when a block starting at `block_start` lasting `block_duration`
    /// is already held.
    async fn is_block_redundant(
        &self,
        channel: &ChannelKey,
        block_start: DateTime<Utc>,
        block_duration: Duration,
    ) -> HoldingsResult<bool> {
        if block_duration <= Duration::zero() {
            return Ok(false);
        }
        self.is_fully_covered(channel, block_start, block_start + block_duration)
            .await
    }
}
