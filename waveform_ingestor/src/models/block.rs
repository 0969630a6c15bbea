//! Canonical in-memory representation of a recovered data block.
//!
//! This struct is the standard output for all [`DataSource`](crate::sources::DataSource)
//! implementations. The payload is opaque: nothing in the pipeline decodes it.

use chrono::{DateTime, Duration, Utc};

use crate::models::{channel::ChannelKey, span::TimeSpan};

/// One contiguous block of recovered samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Channel the samples belong to.
    pub channel: ChannelKey,
    /// Time of the first sample (UTC).
    pub start: DateTime<Utc>,
    /// Time covered by the block.
    pub duration: Duration,
    /// Raw encoded payload (e.g. miniSEED records).
    pub payload: Vec<u8>,
}

impl Block {
    /// Exclusive end of the block.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }

    /// Covered span, or `None` for zero-length blocks.
    pub fn span(&self) -> Option<TimeSpan> {
        TimeSpan::from_duration(self.start, self.duration)
    }
}
