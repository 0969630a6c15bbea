//! Persisted work queue of [`FetchRequest`] rows.
//!
//! The queue is the only place request status lives. Workers read OPEN rows,
//! and move them forward with [`WorkQueue::mark_status`]; nothing in the
//! engine ever deletes a row or moves one backwards out of a terminal status.
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use waveform_ingestor::models::{
    channel::ChannelKey,
    request::{FetchRequest, RequestStatus},
    span::TimeSpan,
};

pub mod repo;
pub mod retry;

pub use repo::SqliteWorkQueue;

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while interacting with the work queue.
pub enum QueueError {
    /// Raised when a caller asks for a transition the status machine forbids.
    #[error("request {id}: cannot move to {to}")]
    InvalidTransition {
        /// Row identifier.
        id: i64,
        /// The rejected target status.
        to: RequestStatus,
    },
    /// Raised when an insert carries a non-positive duration.
    #[error("request duration must be positive, got {millis} ms")]
    NonPositiveDuration {
        /// The rejected duration in milliseconds.
        millis: i64,
    },
}

/// Result type used throughout the work queue for fallible operations.
pub type QueueResult<T> = anyhow::Result<T>;

/// Which OPEN rows a worker wants to see.
#[derive(Debug, Clone)]
pub struct QueueFilter {
    /// Gap classification code; matched exactly.
    pub gap_type: String,
    /// Matched against the fixed-width channel key. `None` matches all.
    pub channel_pattern: Option<Regex>,
    /// Inclusive lower bound on interval start.
    pub window_start: DateTime<Utc>,
    /// Exclusive upper bound on interval start, if any.
    pub window_end: Option<DateTime<Utc>>,
}

impl QueueFilter {
    /// True when `channel` passes the pattern.
    pub fn matches_channel(&self, channel: &ChannelKey) -> bool {
        self.channel_pattern
            .as_ref()
            .is_none_or(|re| re.is_match(channel.as_fixed()))
    }
}

/// A request to be created in OPEN state.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub channel: ChannelKey,
    pub start: DateTime<Utc>,
    pub duration: Duration,
    pub gap_type: String,
    /// Creation time; also used as the initial `updated` stamp.
    pub created: DateTime<Utc>,
}

impl NewRequest {
    /// A request created now.
    pub fn new(
        channel: ChannelKey,
        start: DateTime<Utc>,
        duration: Duration,
        gap_type: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            start,
            duration,
            gap_type: gap_type.into(),
            created: Utc::now(),
        }
    }

    /// Override the creation time.
    pub fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }
}

/// Portable surface, SQLite implementation lives in `repo.rs`.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// OPEN rows passing `filter`, interval start descending then channel
    /// ascending.
    async fn select_open(&self, filter: &QueueFilter) -> QueueResult<Vec<FetchRequest>>;

    /// Move an OPEN row to a terminal status. Returns `false` when the row
    /// was no longer OPEN, in which case nothing changed.
    async fn mark_status(&self, id: i64, status: RequestStatus) -> QueueResult<bool>;

    /// Refresh the row's `updated` stamp without touching its status.
    async fn touch_updated(&self, id: i64) -> QueueResult<()>;

    /// Leave the uncovered `remainder` of a partially filled request OPEN.
    ///
    /// The existing row is narrowed to the first remainder piece and touched;
    /// further pieces become new OPEN rows unless an identical OPEN row
    /// already exists. Returns the ids now standing for the remainder.
    async fn insert_gap_if_partial(
        &self,
        request: &FetchRequest,
        remainder: &[TimeSpan],
    ) -> QueueResult<Vec<i64>>;

    /// Create a new OPEN row.
    async fn insert_open(&self, request: &NewRequest) -> QueueResult<i64>;

    /// Look a row up by id.
    async fn get(&self, id: i64) -> QueueResult<Option<FetchRequest>>;
}
