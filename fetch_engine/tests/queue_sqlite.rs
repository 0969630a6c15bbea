mod common;

use chrono::Duration;
use common::*;
use diesel::{connection::SimpleConnection, prelude::*};
use fetch_engine::{
    queue::{NewRequest, QueueError, QueueFilter, SqliteWorkQueue, WorkQueue},
    schema::fetch_request::dsl as fr,
};
use regex::Regex;
use waveform_ingestor::models::{channel::ChannelKey, request::RequestStatus, span::TimeSpan};

fn filter(gap: &str) -> QueueFilter {
    QueueFilter {
        gap_type: gap.into(),
        channel_pattern: None,
        window_start: now_ms() - Duration::days(30),
        window_end: None,
    }
}

#[tokio::test]
async fn select_open_sorts_recent_first_then_channel() {
    let db = setup_db();
    let q = SqliteWorkQueue::new(db.pool.clone());
    let a: ChannelKey = "XX.AAA..BHZ".parse().unwrap();
    let b: ChannelKey = "XX.BBB..BHZ".parse().unwrap();
    let t1 = now_ms() - Duration::days(2);
    let t2 = now_ms() - Duration::days(1);

    enqueue(&q, &b, t2, 60).await;
    enqueue(&q, &a, t1, 60).await;
    enqueue(&q, &a, t2, 60).await;

    let rows = q.select_open(&filter("FDSN")).await.unwrap();
    let got: Vec<_> = rows
        .iter()
        .map(|r| (r.channel.station().to_string(), r.start))
        .collect();
    assert_eq!(
        got,
        vec![
            ("AAA".to_string(), t2),
            ("BBB".to_string(), t2),
            ("AAA".to_string(), t1),
        ]
    );
}

#[tokio::test]
async fn select_open_applies_gap_type_window_and_pattern() {
    let db = setup_db();
    let q = SqliteWorkQueue::new(db.pool.clone());
    let bhz: ChannelKey = "XX.ABC..BHZ".parse().unwrap();
    let lhz: ChannelKey = "XX.ABC..LHZ".parse().unwrap();

    enqueue(&q, &bhz, now_ms() - Duration::days(1), 60).await;
    enqueue(&q, &lhz, now_ms() - Duration::days(1), 60).await;
    enqueue(&q, &bhz, now_ms() - Duration::days(90), 60).await;
    q.insert_open(&NewRequest::new(bhz.clone(), now_ms() - Duration::days(1), Duration::seconds(60), "OTHER"))
        .await
        .unwrap();

    assert_eq!(q.select_open(&filter("FDSN")).await.unwrap().len(), 2);

    let mut f = filter("FDSN");
    f.channel_pattern = Some(Regex::new("^XXABC  BH").unwrap());
    let rows = q.select_open(&f).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].channel, bhz);
}

#[tokio::test]
async fn mark_status_only_moves_open_rows_forward() {
    let db = setup_db();
    let q = SqliteWorkQueue::new(db.pool.clone());
    let id = enqueue(&q, &channel(), now_ms() - Duration::days(1), 60).await;

    let err = q.mark_status(id, RequestStatus::Open).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueueError>(),
        Some(QueueError::InvalidTransition { .. })
    ));

    assert!(q.mark_status(id, RequestStatus::Filled).await.unwrap());
    assert!(!q.mark_status(id, RequestStatus::NoData).await.unwrap());
    assert_eq!(q.get(id).await.unwrap().unwrap().status, RequestStatus::Filled);
}

#[tokio::test]
async fn database_refuses_to_reopen_terminal_rows() {
    let db = setup_db();
    let q = SqliteWorkQueue::new(db.pool.clone());
    let id = enqueue(&q, &channel(), now_ms() - Duration::days(1), 60).await;
    q.mark_status(id, RequestStatus::NoData).await.unwrap();

    let mut conn = raw_conn(&db);
    let res = diesel::update(fr::fetch_request.find(id))
        .set(fr::status.eq("OPEN"))
        .execute(&mut conn);
    assert!(res.is_err());
    assert!(conn
        .batch_execute(&format!("UPDATE fetch_request SET status = 'FILLED' WHERE id = {id}"))
        .is_err());
}

#[tokio::test]
async fn non_positive_durations_are_rejected() {
    let db = setup_db();
    let q = SqliteWorkQueue::new(db.pool.clone());
    let err = q
        .insert_open(&NewRequest::new(channel(), now_ms(), Duration::zero(), "FDSN"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueueError>(),
        Some(QueueError::NonPositiveDuration { .. })
    ));
}

#[tokio::test]
async fn partial_gap_narrows_row_and_adds_further_pieces_once() {
    let db = setup_db();
    let q = SqliteWorkQueue::new(db.pool.clone());
    let t = now_ms() - Duration::days(1);
    let id = enqueue(&q, &channel(), t, 300).await;
    let req = q.get(id).await.unwrap().unwrap();

    let pieces = [
        TimeSpan::from_duration(t + Duration::seconds(50), Duration::seconds(50)).unwrap(),
        TimeSpan::from_duration(t + Duration::seconds(200), Duration::seconds(100)).unwrap(),
    ];
    let ids = q.insert_gap_if_partial(&req, &pieces).await.unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], id);

    let narrowed = q.get(id).await.unwrap().unwrap();
    assert_eq!(narrowed.start, t + Duration::seconds(50));
    assert_eq!(narrowed.duration, Duration::seconds(50));
    assert!(narrowed.updated > req.updated);
    assert_eq!(narrowed.created, req.created);

    let extra = q.get(ids[1]).await.unwrap().unwrap();
    assert_eq!(extra.start, t + Duration::seconds(200));
    assert_eq!(extra.status, RequestStatus::Open);
    assert_eq!(extra.created, req.created);

    // reporting the same remainder again reuses the existing extra piece
    let again = q.insert_gap_if_partial(&narrowed, &pieces).await.unwrap();
    assert_eq!(again, ids);
    assert_eq!(q.select_open(&filter("FDSN")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn touch_refreshes_only_the_timestamp() {
    let db = setup_db();
    let q = SqliteWorkQueue::new(db.pool.clone());
    let id = enqueue(&q, &channel(), now_ms() - Duration::days(1), 60).await;
    let before = q.get(id).await.unwrap().unwrap();
    q.touch_updated(id).await.unwrap();
    let after = q.get(id).await.unwrap().unwrap();
    assert!(after.updated > before.updated);
    assert_eq!(after.status, RequestStatus::Open);
    assert_eq!(after.start, before.start);
}
