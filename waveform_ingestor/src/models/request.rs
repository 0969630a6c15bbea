//! The unit of requested work handed to a [`DataSource`](crate::sources::DataSource).

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{channel::ChannelKey, span::TimeSpan};

/// Lifecycle state of a [`FetchRequest`].
///
/// Transitions are one-way: `Open` may become `NoData` or `Filled`, and
/// neither terminal state is ever left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Outstanding work.
    Open,
    /// No data can ever be produced for this interval.
    #[serde(rename = "NODATA")]
    NoData,
    /// The interval has been recovered (or was already held downstream).
    Filled,
}

impl RequestStatus {
    /// Database / wire code.
    pub const fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Open => "OPEN",
            RequestStatus::NoData => "NODATA",
            RequestStatus::Filled => "FILLED",
        }
    }

    /// True for `NoData` and `Filled`.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Open)
    }

    /// Whether moving from `self` to `next` respects the one-way lifecycle.
    pub const fn can_become(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Open, RequestStatus::NoData) | (RequestStatus::Open, RequestStatus::Filled)
        )
    }
}

/// Unknown status code.
#[derive(Debug, Error)]
#[error("unknown request status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for RequestStatus {
    type Err = UnknownStatus;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(RequestStatus::Open),
            "NODATA" => Ok(RequestStatus::NoData),
            "FILLED" => Ok(RequestStatus::Filled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to recover one channel over one interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Queue identifier.
    pub id: i64,
    /// Channel to recover.
    pub channel: ChannelKey,
    /// Interval start, millisecond resolution.
    pub start: DateTime<Utc>,
    /// Interval length; always positive.
    pub duration: Duration,
    /// Gap classification used to route the request to a source.
    pub gap_type: String,
    /// Current lifecycle state.
    pub status: RequestStatus,
    /// When the row was created.
    pub created: DateTime<Utc>,
    /// When the row was last touched by a worker.
    pub updated: DateTime<Utc>,
}

impl FetchRequest {
    /// Exclusive end of the requested interval.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }

    /// The requested interval as a [`TimeSpan`].
    ///
    /// Rows with a non-positive duration are rejected when loaded, so this is
    /// always well formed for queue-sourced requests.
    pub fn span(&self) -> TimeSpan {
        TimeSpan {
            start: self.start,
            end: self.end(),
        }
    }

    /// Two requests are duplicates when channel and interval match exactly.
    pub fn duplicate_key(&self) -> (ChannelKey, DateTime<Utc>, Duration) {
        (self.channel.clone(), self.start, self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_open_can_transition() {
        use RequestStatus::*;
        assert!(Open.can_become(Filled));
        assert!(Open.can_become(NoData));
        assert!(!Open.can_become(Open));
        for terminal in [NoData, Filled] {
            for next in [Open, NoData, Filled] {
                assert!(!terminal.can_become(next));
            }
        }
    }

    #[test]
    fn status_codes_round_trip() {
        for s in [RequestStatus::Open, RequestStatus::NoData, RequestStatus::Filled] {
            assert_eq!(s.as_str().parse::<RequestStatus>().unwrap(), s);
        }
        assert!("DONE".parse::<RequestStatus>().is_err());
    }
}
