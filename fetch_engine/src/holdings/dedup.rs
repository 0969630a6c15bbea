//! Per-fetch redundant-block filter.
//!
//! Each recovered block is checked against holdings before delivery. Once more
//! than `tolerance` redundant blocks have been seen in one fetch, the rest of
//! the batch is assumed redundant and dropped without further queries.

use waveform_ingestor::models::block::Block;

use crate::holdings::{HoldingsOracle, HoldingsResult};

/// Whether blocks for a fetch should be checked at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Check each block against holdings.
    Check { tolerance: usize },
    /// Deliver everything: immediate-only gap types and authoritative sources.
    Skip,
}

impl DedupMode {
    pub fn for_fetch(immediate_only: bool, authoritative: bool, tolerance: usize) -> Self {
        if immediate_only || authoritative {
            DedupMode::Skip
        } else {
            DedupMode::Check { tolerance }
        }
    }
}

/// Blocks surviving the filter and how many were discarded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Filtered {
    pub kept: Vec<Block>,
    /// Blocks confirmed redundant by a holdings query.
    pub redundant: usize,
    /// Blocks dropped unchecked after the tolerance ran out.
    pub truncated: usize,
}

/// Drop blocks already held downstream.
pub async fn filter_redundant(
    oracle: &dyn HoldingsOracle,
    blocks: Vec<Block>,
    mode: DedupMode,
) -> HoldingsResult<Filtered> {
    let tolerance = match mode {
        DedupMode::Skip => {
            return Ok(Filtered {
                kept: blocks,
                ..Filtered::default()
            });
        }
        DedupMode::Check { tolerance } => tolerance,
    };

    let mut out = Filtered {
        kept: Vec::with_capacity(blocks.len()),
        ..Filtered::default()
    };
    let mut blocks = blocks.into_iter();
    for block in blocks.by_ref() {
        if oracle
            .is_block_redundant(&block.channel, block.start, block.duration)
            .await?
        {
            out.redundant += 1;
            if out.redundant > tolerance {
                break;
            }
        } else {
            out.kept.push(block);
        }
    }
    out.truncated = blocks.count();
    if out.truncated > 0 {
        tracing::debug!(
            redundant = out.redundant,
            truncated = out.truncated,
            "redundant-block tolerance exceeded; dropping rest of fetch"
        );
    }
    Ok(out)
}
