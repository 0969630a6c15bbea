mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::*;
use fetch_engine::{
    config::{SourceCfg, load_config_str},
    error::EngineError,
    orchestrator::{Orchestrator, RunOptions, Stores},
    queue::WorkQueue,
    sources::SourceRegistry,
};
use tokio_util::sync::CancellationToken;
use waveform_ingestor::{
    models::request::{FetchRequest, RequestStatus},
    sources::{DataSource, FetchOutcome, LinkControl, SourceError, SourceInitError},
};

const CONFIG: &str = r#"
[engine]
dry_run = true
shutdown_grace_secs = 1
reload_interval_secs = 3600

[sources.fdsn]
kind = "nodata"

[targets.retired]
gap_type = "fdsn"

[targets.disabled]
gap_type = "FDSN"
enabled = false
"#;

#[tokio::test]
async fn single_shot_drains_the_queue_and_reports_stats() {
    let db = setup_db();
    let stores = Stores::sqlite(db.pool.clone());
    let queue = fetch_engine::queue::SqliteWorkQueue::new(db.pool.clone());
    let start = now_ms() - chrono::Duration::days(2);
    let a = enqueue(&queue, &channel(), start, 300).await;
    let b = enqueue(&queue, &channel(), start + chrono::Duration::hours(1), 300).await;

    let cfg = load_config_str(CONFIG).unwrap();
    let orch = Orchestrator::new(
        cfg,
        None,
        SourceRegistry::default(),
        stores.clone(),
        RunOptions {
            target: None,
            single_shot: true,
        },
    )
    .unwrap();

    let stats = tokio::time::timeout(Duration::from_secs(30), orch.run(CancellationToken::new()))
        .await
        .expect("single shot finishes")
        .unwrap();

    assert_eq!(stats.len(), 1);
    assert_eq!(stats["retired"].nodata, 2);
    for id in [a, b] {
        let row = stores.queue.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, RequestStatus::NoData);
    }
}

#[tokio::test]
async fn unknown_target_is_refused() {
    let db = setup_db();
    let err = Orchestrator::new(
        load_config_str(CONFIG).unwrap(),
        None,
        SourceRegistry::default(),
        Stores::sqlite(db.pool.clone()),
        RunOptions {
            target: Some("nope".into()),
            single_shot: true,
        },
    )
    .err()
    .expect("rejected");
    assert!(matches!(err, EngineError::UnknownTarget(name) if name == "nope"));
}

#[tokio::test]
async fn unregistered_source_kind_is_refused() {
    let db = setup_db();
    let err = Orchestrator::new(
        load_config_str(CONFIG).unwrap(),
        None,
        SourceRegistry::empty(),
        Stores::sqlite(db.pool.clone()),
        RunOptions::default(),
    )
    .err()
    .expect("rejected");
    assert!(matches!(err, EngineError::UnknownSourceKind { .. }));
}

/// Never returns and ignores cancellation.
struct Stuck;

#[async_trait]
impl DataSource for Stuck {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn fetch(
        &self,
        _request: &FetchRequest,
        _link: &mut dyn LinkControl,
    ) -> Result<FetchOutcome, SourceError> {
        std::future::pending().await
    }
}

fn build_stuck(_cfg: &SourceCfg) -> Result<Arc<dyn DataSource>, SourceInitError> {
    Ok(Arc::new(Stuck))
}

#[tokio::test]
async fn workers_that_ignore_shutdown_are_aborted_after_grace() {
    let db = setup_db();
    let queue = fetch_engine::queue::SqliteWorkQueue::new(db.pool.clone());
    let id = enqueue(&queue, &channel(), now_ms() - chrono::Duration::days(1), 60).await;

    let mut registry = SourceRegistry::empty();
    registry.register("stuck", build_stuck);
    let cfg = load_config_str(
        r#"
[engine]
dry_run = true
shutdown_grace_secs = 1

[sources.FDSN]
kind = "stuck"

[targets.hung]
gap_type = "FDSN"
"#,
    )
    .unwrap();
    let orch = Orchestrator::new(cfg, None, registry, Stores::sqlite(db.pool.clone()), RunOptions::default()).unwrap();

    let cancel = CancellationToken::new();
    let run = tokio::spawn(orch.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("shutdown is bounded")
        .unwrap()
        .unwrap();
    assert!(!stats.contains_key("hung"));

    let row = queue.get(id).await.unwrap().unwrap();
    assert_eq!(row.status, RequestStatus::Open);
}

fn stuck_config(enabled: bool) -> String {
    format!(
        r#"
[engine]
dry_run = true
shutdown_grace_secs = 2
reload_interval_secs = 1

[sources.FDSN]
kind = "stuck"

[targets.first]
gap_type = "FDSN"
enabled = {enabled}

[targets.second]
gap_type = "FDSN"
enabled = {enabled}
"#
    )
}

#[tokio::test]
async fn reload_stops_removed_workers_within_one_grace_period() {
    let db = setup_db();
    let queue = fetch_engine::queue::SqliteWorkQueue::new(db.pool.clone());
    enqueue(&queue, &channel(), now_ms() - chrono::Duration::days(1), 60).await;

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, stuck_config(true)).unwrap();

    let mut registry = SourceRegistry::empty();
    registry.register("stuck", build_stuck);
    let cfg = load_config_str(&stuck_config(true)).unwrap();
    let orch = Orchestrator::new(
        cfg,
        Some(path.clone()),
        registry,
        Stores::sqlite(db.pool.clone()),
        RunOptions::default(),
    )
    .unwrap();

    let start = std::time::Instant::now();
    let cancel = CancellationToken::new();
    let run = tokio::spawn(orch.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::write(&path, stuck_config(false)).unwrap();
    // the reload at one second is now waiting on both stuck workers
    tokio::time::sleep(Duration::from_millis(1200)).await;
    cancel.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("shutdown is bounded")
        .unwrap()
        .unwrap();
    assert!(stats.is_empty());
    assert!(start.elapsed() < Duration::from_millis(4_500));
}
