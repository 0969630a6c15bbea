use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use waveform_ingestor::models::{
    request::{FetchRequest, RequestStatus},
    span::TimeSpan,
};

use crate::{
    db::pool::DbPool,
    models::{FetchRequestRow, NewFetchRequest},
    queue::{NewRequest, QueueError, QueueFilter, QueueResult, WorkQueue},
    schema::fetch_request,
    tz,
};

use crate::schema::fetch_request::dsl as fr;

const OPEN: &str = RequestStatus::Open.as_str();

/// Work queue backed by the `fetch_request` table.
#[derive(Clone)]
pub struct SqliteWorkQueue {
    pool: DbPool,
}

impl SqliteWorkQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn now_text() -> String {
    tz::to_rfc3339_millis(Utc::now())
}

/// Millisecond-aligned `(start, duration_ms)` for a span, or `None` if the
/// span collapses once sub-millisecond precision is dropped.
fn span_key(span: &TimeSpan) -> Option<(String, i64)> {
    let start = tz::truncate_millis(span.start);
    let millis = (tz::truncate_millis(span.end) - start).num_milliseconds();
    (millis > 0).then(|| (tz::to_rfc3339_millis(start), millis))
}

#[async_trait]
impl WorkQueue for SqliteWorkQueue {
    async fn select_open(&self, filter: &QueueFilter) -> QueueResult<Vec<FetchRequest>> {
        let gap = filter.gap_type.clone();
        let lo = tz::to_rfc3339_millis(filter.window_start);
        let hi = filter.window_end.map(tz::to_rfc3339_millis);

        let rows: Vec<FetchRequestRow> = self
            .pool
            .run(move |conn| {
                let mut q = fr::fetch_request
                    .filter(fr::status.eq(OPEN))
                    .filter(fr::gap_type.eq(gap))
                    .filter(fr::start_ts.ge(lo))
                    .into_boxed();
                if let Some(hi) = hi {
                    q = q.filter(fr::start_ts.lt(hi));
                }
                let rows = q
                    .order((fr::start_ts.desc(), fr::channel.asc(), fr::id.asc()))
                    .select(FetchRequestRow::as_select())
                    .load(conn)
                    .context("select open requests")?;
                Ok(rows)
            })
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match FetchRequest::try_from(row) {
                Ok(req) if filter.matches_channel(&req.channel) => out.push(req),
                Ok(_) => {}
                Err(e) => tracing::warn!(id, error = %e, "skipping unreadable fetch_request row"),
            }
        }
        Ok(out)
    }

    async fn mark_status(&self, id: i64, status: RequestStatus) -> QueueResult<bool> {
        if !RequestStatus::Open.can_become(status) {
            return Err(QueueError::InvalidTransition { id, to: status }.into());
        }
        let now = now_text();
        let changed = self
            .pool
            .run_write(move |conn| {
                let n = diesel::update(fr::fetch_request.find(id).filter(fr::status.eq(OPEN)))
                    .set((fr::status.eq(status.as_str()), fr::updated_at.eq(now)))
                    .execute(conn)
                    .with_context(|| format!("mark request {id} {status}"))?;
                Ok(n)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn touch_updated(&self, id: i64) -> QueueResult<()> {
        let now = now_text();
        self.pool
            .run_write(move |conn| {
                diesel::update(fr::fetch_request.find(id))
                    .set(fr::updated_at.eq(now))
                    .execute(conn)
                    .with_context(|| format!("touch request {id}"))?;
                Ok(())
            })
            .await
    }

    async fn insert_gap_if_partial(
        &self,
        request: &FetchRequest,
        remainder: &[TimeSpan],
    ) -> QueueResult<Vec<i64>> {
        let mut pieces = remainder.iter().filter_map(span_key);
        let Some((first_start, first_ms)) = pieces.next() else {
            self.touch_updated(request.id).await?;
            return Ok(vec![request.id]);
        };
        let rest: Vec<(String, i64)> = pieces.collect();

        let id = request.id;
        let channel = request.channel.as_fixed().to_string();
        let gap = request.gap_type.clone();
        let created = tz::to_rfc3339_millis(request.created);
        let now = now_text();

        self.pool
            .run_write(move |conn| {
                conn.transaction::<_, anyhow::Error, _>(|conn| {
                    let mut ids = Vec::with_capacity(rest.len() + 1);

                    let narrowed = diesel::update(fr::fetch_request.find(id).filter(fr::status.eq(OPEN)))
                        .set((
                            fr::start_ts.eq(&first_start),
                            fr::duration_ms.eq(first_ms),
                            fr::updated_at.eq(&now),
                        ))
                        .execute(conn)
                        .with_context(|| format!("narrow request {id}"))?;
                    if narrowed == 1 {
                        ids.push(id);
                    }

                    for (start, millis) in &rest {
                        let existing: Option<i64> = fr::fetch_request
                            .filter(fr::channel.eq(&channel))
                            .filter(fr::start_ts.eq(start))
                            .filter(fr::duration_ms.eq(*millis))
                            .filter(fr::status.eq(OPEN))
                            .select(fr::id)
                            .first(conn)
                            .optional()?;
                        let piece_id = match existing {
                            Some(e) => e,
                            None => diesel::insert_into(fetch_request::table)
                                .values(&NewFetchRequest {
                                    channel: &channel,
                                    start_ts: start,
                                    duration_ms: *millis,
                                    gap_type: &gap,
                                    status: OPEN,
                                    created_at: &created,
                                    updated_at: &now,
                                })
                                .returning(fr::id)
                                .get_result(conn)
                                .context("insert remainder request")?,
                        };
                        ids.push(piece_id);
                    }
                    Ok(ids)
                })
            })
            .await
    }

    async fn insert_open(&self, request: &NewRequest) -> QueueResult<i64> {
        let millis = request.duration.num_milliseconds();
        if millis <= 0 {
            return Err(QueueError::NonPositiveDuration { millis }.into());
        }
        let channel = request.channel.as_fixed().to_string();
        let start = tz::to_rfc3339_millis(request.start);
        let gap = request.gap_type.clone();
        let created = tz::to_rfc3339_millis(request.created);

        self.pool
            .run_write(move |conn| {
                let id = diesel::insert_into(fetch_request::table)
                    .values(&NewFetchRequest {
                        channel: &channel,
                        start_ts: &start,
                        duration_ms: millis,
                        gap_type: &gap,
                        status: OPEN,
                        created_at: &created,
                        updated_at: &created,
                    })
                    .returning(fr::id)
                    .get_result(conn)
                    .context("insert open request")?;
                Ok(id)
            })
            .await
    }

    async fn get(&self, id: i64) -> QueueResult<Option<FetchRequest>> {
        let row = self
            .pool
            .run(move |conn| {
                let row = fr::fetch_request
                    .find(id)
                    .select(FetchRequestRow::as_select())
                    .first(conn)
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(FetchRequest::try_from).transpose()
    }
}
