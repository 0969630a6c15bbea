//! Link-latency telemetry.
//!
//! Latency here is the time since the most recent real-time sample arrived
//! for a channel. A feeder process keeps `channel_latency` current; the
//! engine only reads it.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use waveform_ingestor::models::channel::ChannelKey;

use crate::{db::pool::DbPool, models::LatencyRow, schema::channel_latency, tz};

use crate::schema::channel_latency::dsl as cl;

/// One latency observation.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub channel: ChannelKey,
    /// Latency in seconds.
    pub latency_secs: f64,
    /// When the observation was produced.
    pub sampled_at: DateTime<Utc>,
    /// Time since the observation was produced.
    pub age: Duration,
}

impl LatencySample {
    /// Age below `bound`.
    pub fn is_fresh(&self, bound: Duration) -> bool {
        self.age < bound
    }
}

/// Source of [`LatencySample`]s.
#[async_trait]
pub trait Telemetry: Send + Sync {
    /// Latest sample for `channel`, or `None` when unknown.
    async fn latency_for(&self, channel: &ChannelKey) -> anyhow::Result<Option<LatencySample>>;

    /// Best (lowest) latency across the station `channel` belongs to.
    async fn station_latency(&self, channel: &ChannelKey) -> anyhow::Result<Option<LatencySample>>;
}

/// Telemetry read from the `channel_latency` table.
#[derive(Clone)]
pub struct SqliteTelemetry {
    pool: DbPool,
}

impl SqliteTelemetry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert the latest sample for a channel.
    pub async fn record(
        &self,
        channel: &ChannelKey,
        latency_secs: f64,
        sampled_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let row = LatencyRow {
            channel: channel.as_fixed().to_string(),
            latency_secs,
            sampled_at: tz::to_rfc3339_millis(sampled_at),
        };
        self.pool
            .run_write(move |conn| {
                diesel::insert_into(channel_latency::table)
                    .values(&row)
                    .on_conflict(cl::channel)
                    .do_update()
                    .set(&row)
                    .execute(conn)
                    .context("upsert channel latency")?;
                Ok(())
            })
            .await
    }

    fn to_sample(row: LatencyRow, now: DateTime<Utc>) -> anyhow::Result<LatencySample> {
        let sampled_at = tz::parse_ts_to_utc(&row.sampled_at)?;
        Ok(LatencySample {
            channel: ChannelKey::from_fixed(&row.channel)?,
            latency_secs: row.latency_secs,
            sampled_at,
            age: (now - sampled_at).to_std().unwrap_or(Duration::ZERO),
        })
    }
}

#[async_trait]
impl Telemetry for SqliteTelemetry {
    async fn latency_for(&self, channel: &ChannelKey) -> anyhow::Result<Option<LatencySample>> {
        let key = channel.as_fixed().to_string();
        let row: Option<LatencyRow> = self
            .pool
            .run(move |conn| {
                let row = cl::channel_latency
                    .find(key)
                    .select(LatencyRow::as_select())
                    .first(conn)
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(|r| Self::to_sample(r, Utc::now())).transpose()
    }

    async fn station_latency(&self, channel: &ChannelKey) -> anyhow::Result<Option<LatencySample>> {
        let prefix = format!("{}%", channel.station_prefix());
        let row: Option<LatencyRow> = self
            .pool
            .run(move |conn| {
                let row = cl::channel_latency
                    .filter(cl::channel.like(prefix))
                    .order(cl::latency_secs.asc())
                    .select(LatencyRow::as_select())
                    .first(conn)
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(|r| Self::to_sample(r, Utc::now())).transpose()
    }
}
