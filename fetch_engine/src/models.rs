//! Diesel models mapping to the database schema.
//!
//! These types mirror the tables defined in the embedded migrations and in
//! [`crate::schema`]:
//! - [`crate::schema::fetch_request`]: the persisted work queue
//! - [`crate::schema::holding`]: intervals already present downstream
//! - [`crate::schema::channel_latency`]: latest link-latency sample per channel
//!
//! Timestamps are RFC3339 UTC text with millisecond precision (see [`crate::tz`]).

use anyhow::{Context, bail};
use chrono::Duration;
use diesel::prelude::*;
use waveform_ingestor::models::{
    channel::ChannelKey,
    request::{FetchRequest, RequestStatus},
};

use crate::{schema::*, tz};

/// A row in [`crate::schema::fetch_request`].
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = fetch_request, check_for_backend(diesel::sqlite::Sqlite))]
pub struct FetchRequestRow {
    /// Database primary key.
    pub id: i64,
    /// Fixed-width channel key.
    pub channel: String,
    /// Interval start in RFC3339 UTC.
    pub start_ts: String,
    /// Interval length in milliseconds; constrained > 0.
    pub duration_ms: i64,
    /// Gap classification code.
    pub gap_type: String,
    /// "OPEN" | "NODATA" | "FILLED".
    pub status: String,
    /// Row creation timestamp in RFC3339 UTC.
    pub created_at: String,
    /// Last worker touch in RFC3339 UTC.
    pub updated_at: String,
}

impl TryFrom<FetchRequestRow> for FetchRequest {
    type Error = anyhow::Error;

    fn try_from(row: FetchRequestRow) -> Result<Self, Self::Error> {
        if row.duration_ms <= 0 {
            bail!("fetch_request {} has non-positive duration", row.id);
        }
        Ok(FetchRequest {
            id: row.id,
            channel: ChannelKey::from_fixed(&row.channel)
                .with_context(|| format!("fetch_request {} channel", row.id))?,
            start: tz::parse_ts_to_utc(&row.start_ts)?,
            duration: Duration::milliseconds(row.duration_ms),
            gap_type: row.gap_type,
            status: row.status.parse::<RequestStatus>()?,
            created: tz::parse_ts_to_utc(&row.created_at)?,
            updated: tz::parse_ts_to_utc(&row.updated_at)?,
        })
    }
}

/// Insertable form of [`FetchRequestRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = fetch_request)]
pub struct NewFetchRequest<'a> {
    pub channel: &'a str,
    pub start_ts: &'a str,
    pub duration_ms: i64,
    pub gap_type: &'a str,
    pub status: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// A row in [`crate::schema::holding`].
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = holding, check_for_backend(diesel::sqlite::Sqlite))]
pub struct HoldingRow {
    pub id: i64,
    pub channel: String,
    pub start_ts: String,
    pub end_ts: String,
}

/// Insertable form of [`HoldingRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = holding)]
pub struct NewHolding<'a> {
    pub channel: &'a str,
    pub start_ts: &'a str,
    pub end_ts: &'a str,
}

/// A row in [`crate::schema::channel_latency`].
#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = channel_latency, check_for_backend(diesel::sqlite::Sqlite))]
pub struct LatencyRow {
    pub channel: String,
    pub latency_secs: f64,
    pub sampled_at: String,
}
