use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use waveform_ingestor::models::{
    channel::ChannelKey,
    span::{self, TimeSpan},
};

use crate::{
    db::pool::DbPool,
    holdings::{HoldingsOracle, HoldingsResult},
    models::{HoldingRow, NewHolding},
    schema::holding,
    tz,
};

use crate::schema::holding::dsl as h;

/// Holdings oracle backed by the `holding` table.
#[derive(Clone)]
pub struct SqliteHoldings {
    pool: DbPool,
}

impl SqliteHoldings {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a held interval. Used by ingest tooling that mirrors the
    /// downstream inventory into the engine's database.
    pub async fn record(&self, channel: &ChannelKey, span: TimeSpan) -> HoldingsResult<i64> {
        let channel = channel.as_fixed().to_string();
        let start = tz::to_rfc3339_millis(span.start);
        let end = tz::to_rfc3339_millis(span.end);
        self.pool
            .run_write(move |conn| {
                let id = diesel::insert_into(holding::table)
                    .values(&NewHolding {
                        channel: &channel,
                        start_ts: &start,
                        end_ts: &end,
                    })
                    .returning(h::id)
                    .get_result(conn)
                    .context("insert holding")?;
                Ok(id)
            })
            .await
    }

    /// Held spans for `channel` that overlap `[start, end)`.
    pub async fn overlapping(
        &self,
        channel: &ChannelKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> HoldingsResult<Vec<TimeSpan>> {
        let channel = channel.as_fixed().to_string();
        let lo = tz::to_rfc3339_millis(start);
        let hi = tz::to_rfc3339_millis(end);
        let rows: Vec<HoldingRow> = self
            .pool
            .run(move |conn| {
                let rows = h::holding
                    .filter(h::channel.eq(channel))
                    .filter(h::start_ts.lt(hi))
                    .filter(h::end_ts.gt(lo))
                    .order(h::start_ts.asc())
                    .select(HoldingRow::as_select())
                    .load(conn)
                    .context("select holdings")?;
                Ok(rows)
            })
            .await?;

        let mut spans = Vec::with_capacity(rows.len());
        for row in rows {
            let s = tz::parse_ts_to_utc(&row.start_ts)?;
            let e = tz::parse_ts_to_utc(&row.end_ts)?;
            if let Some(span) = TimeSpan::new(s, e) {
                spans.push(span);
            }
        }
        Ok(spans)
    }
}

#[async_trait]
impl HoldingsOracle for SqliteHoldings {
    async fn is_fully_covered(
        &self,
        channel: &ChannelKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> HoldingsResult<bool> {
        let Some(target) = TimeSpan::new(start, end) else {
            return Ok(false);
        };
        let held = self.overlapping(channel, start, end).await?;
        Ok(span::covers(held, &target))
    }
}
