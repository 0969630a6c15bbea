#![allow(dead_code)]

use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::{
    QueryableByName, RunQueryDsl, SqliteConnection, sql_query,
    sql_types::{Integer, Text},
};
use fetch_engine::{
    admission::AdmissionGate,
    db::{connection, migrate, pool::DbPool},
    holdings::{HoldingsOracle, SqliteHoldings},
    latency::LatencySettings,
    queue::{NewRequest, QueueFilter, QueueResult, SqliteWorkQueue, WorkQueue, retry::RetryPolicy},
    sources::Route,
    telemetry::{LatencySample, Telemetry},
    tz,
    worker::{WorkerDeps, WorkerSettings},
};
use snafu::ResultExt;
use tempfile::TempDir;
use waveform_ingestor::{
    io::sink::{DataSink, SinkConnector, SinkError},
    models::{
        block::Block,
        channel::ChannelKey,
        request::{FetchRequest, RequestStatus},
        span::TimeSpan,
    },
    sources::{DataSource, FetchOutcome, IoSnafu, LinkControl, SourceError},
};

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct ForeignKeys {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}

pub struct TestDb {
    _dir: TempDir,    // keep alive for the life of the test
    pub path: String, // <tmpdir>/test.db
    pub pool: DbPool,
}

pub fn setup_db() -> TestDb {
    let dir = TempDir::new().expect("tempdir");
    let mut p = PathBuf::from(dir.path());
    p.push("test.db");
    let path = p.to_string_lossy().to_string();

    migrate::run_all(&path).expect("migrations");
    let pool = DbPool::open(&path, 4).expect("pool");
    TestDb {
        _dir: dir,
        path,
        pool,
    }
}

pub fn raw_conn(db: &TestDb) -> SqliteConnection {
    connection::connect_sqlite(&db.path).expect("connect")
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection) {
    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal");

    let fk: ForeignKeys = sql_query("PRAGMA foreign_keys;").get_result(conn).unwrap();
    assert_eq!(fk.foreign_keys, 1);

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);
}

pub fn channel() -> ChannelKey {
    "XX.ABC..BHZ".parse().unwrap()
}

/// Millisecond-aligned "now" so stored and in-memory values compare equal.
pub fn now_ms() -> DateTime<Utc> {
    tz::truncate_millis(Utc::now())
}

/// Insert an OPEN request created three hours ago.
pub async fn enqueue(queue: &SqliteWorkQueue, channel: &ChannelKey, start: DateTime<Utc>, secs: i64) -> i64 {
    queue
        .insert_open(
            &NewRequest::new(channel.clone(), start, Duration::seconds(secs), "FDSN")
                .created_at(now_ms() - Duration::hours(3)),
        )
        .await
        .expect("insert")
}

/// `n` equal blocks tiling `[start, start + secs)`.
pub fn tiling_blocks(channel: &ChannelKey, start: DateTime<Utc>, secs: i64, n: i64) -> Vec<Block> {
    let step = secs / n;
    (0..n)
        .map(|i| Block {
            channel: channel.clone(),
            start: start + Duration::seconds(i * step),
            duration: Duration::seconds(step),
            payload: vec![i as u8; 64],
        })
        .collect()
}

/// What a [`ScriptedSource`] does for one call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return `n` blocks exactly tiling the request.
    Cover(i64),
    /// Return blocks tiling only the first half of the request.
    CoverFirstHalf,
    Empty,
    NoData,
    Fail,
    Panic,
}

/// Source that follows a script, then repeats `fallback`.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    seen: Mutex<Vec<FetchRequest>>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::new([], step)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<FetchRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        link: &mut dyn LinkControl,
    ) -> Result<FetchOutcome, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let secs = request.duration.num_seconds();
        match step {
            Step::Cover(n) => {
                link.on_bytes_transferred(64 * n as usize).await;
                Ok(FetchOutcome::from_blocks(tiling_blocks(&request.channel, request.start, secs, n)))
            }
            Step::CoverFirstHalf => Ok(FetchOutcome::from_blocks(tiling_blocks(
                &request.channel,
                request.start,
                secs / 2,
                1,
            ))),
            Step::Empty => Ok(FetchOutcome::Empty),
            Step::NoData => Ok(FetchOutcome::NoData),
            Step::Fail => Err(std::io::Error::other("connection reset")).context(IoSnafu),
            Step::Panic => panic!("decoder bug"),
        }
    }
}

/// Captures delivered blocks; optionally fails every write.
#[derive(Default)]
pub struct MemorySink {
    pub blocks: Mutex<Vec<Block>>,
    pub opens: AtomicUsize,
    pub fail_all: bool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_all: true,
            ..Self::default()
        })
    }

    pub fn count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }
}

struct MemoryConn(Arc<MemorySink>);

#[async_trait]
impl DataSink for MemoryConn {
    async fn write(&mut self, block: &Block) -> Result<(), SinkError> {
        if self.0.fail_all {
            return Err(SinkError::Write {
                source: std::io::Error::other("broken pipe"),
                backtrace: snafu::Backtrace::capture(),
            });
        }
        self.0.blocks.lock().unwrap().push(block.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

pub struct MemoryConnector(pub Arc<MemorySink>);

#[async_trait]
impl SinkConnector for MemoryConnector {
    async fn open(&self) -> Result<Box<dyn DataSink>, SinkError> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConn(Arc::clone(&self.0))))
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

/// Telemetry whose current sample is set by the test.
#[derive(Default)]
pub struct ManualTelemetry {
    current: Mutex<Option<(f64, DateTime<Utc>)>>,
    pub lookups: AtomicUsize,
}

impl ManualTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, latency_secs: f64, sampled_at: DateTime<Utc>) {
        *self.current.lock().unwrap() = Some((latency_secs, sampled_at));
    }

    fn sample(&self, channel: &ChannelKey) -> Option<LatencySample> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let (latency_secs, sampled_at) = (*self.current.lock().unwrap())?;
        Some(LatencySample {
            channel: channel.clone(),
            latency_secs,
            sampled_at,
            age: (Utc::now() - sampled_at).to_std().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Telemetry for ManualTelemetry {
    async fn latency_for(&self, channel: &ChannelKey) -> anyhow::Result<Option<LatencySample>> {
        Ok(self.sample(channel))
    }

    async fn station_latency(&self, channel: &ChannelKey) -> anyhow::Result<Option<LatencySample>> {
        Ok(self.sample(channel))
    }
}

pub fn settings(single_shot: bool) -> WorkerSettings {
    WorkerSettings {
        name: "test".into(),
        gap_type: "FDSN".into(),
        channel_pattern: None,
        window: Duration::days(30),
        throttle_ceiling: 1_000_000,
        local_link: false,
        authoritative: false,
        latency: LatencySettings::default(),
        live_window: Duration::days(10),
        redundant_tolerance: 10,
        dry_run: false,
        retry: RetryPolicy::default(),
        single_shot,
    }
}

pub struct Harness {
    pub db: TestDb,
    pub queue: Arc<SqliteWorkQueue>,
    pub holdings: Arc<SqliteHoldings>,
    pub live: Arc<MemorySink>,
    pub archive: Arc<MemorySink>,
}

impl Harness {
    pub fn new() -> Self {
        let db = setup_db();
        Self {
            queue: Arc::new(SqliteWorkQueue::new(db.pool.clone())),
            holdings: Arc::new(SqliteHoldings::new(db.pool.clone())),
            db,
            live: MemorySink::new(),
            archive: MemorySink::new(),
        }
    }

    pub fn deps(&self, source: Arc<dyn DataSource>) -> WorkerDeps {
        WorkerDeps {
            queue: self.queue.clone(),
            holdings: self.holdings.clone(),
            telemetry: ManualTelemetry::new(),
            route: Route {
                source,
                immediate: false,
            },
            admission: AdmissionGate::new(None),
            live_sink: Some(Arc::new(MemoryConnector(Arc::clone(&self.live)))),
            archive_sink: Some(Arc::new(MemoryConnector(Arc::clone(&self.archive)))),
        }
    }

    pub async fn get(&self, id: i64) -> FetchRequest {
        self.queue.get(id).await.expect("get").expect("row exists")
    }
}

/// Queue kept in memory, for tests that drive the worker on a paused clock.
#[derive(Default)]
pub struct MemoryQueue {
    rows: Mutex<Vec<FetchRequest>>,
}

impl MemoryQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert an OPEN request created three hours ago.
    pub async fn enqueue(&self, channel: &ChannelKey, start: DateTime<Utc>, secs: i64) -> i64 {
        self.insert_open(
            &NewRequest::new(channel.clone(), start, Duration::seconds(secs), "FDSN")
                .created_at(now_ms() - Duration::hours(3)),
        )
        .await
        .expect("insert")
    }

    pub fn status(&self, id: i64) -> Option<RequestStatus> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn select_open(&self, filter: &QueueFilter) -> QueueResult<Vec<FetchRequest>> {
        let mut rows: Vec<FetchRequest> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.status == RequestStatus::Open
                    && r.gap_type == filter.gap_type
                    && r.start >= filter.window_start
                    && filter.window_end.is_none_or(|end| r.start < end)
                    && filter.matches_channel(&r.channel)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.start
                .cmp(&a.start)
                .then_with(|| a.channel.cmp(&b.channel))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rows)
    }

    async fn mark_status(&self, id: i64, status: RequestStatus) -> QueueResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|r| r.id == id) {
            Some(r) if r.status.can_become(status) => {
                r.status = status;
                r.updated = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_updated(&self, id: i64) -> QueueResult<()> {
        if let Some(r) = self.rows.lock().unwrap().iter_mut().find(|r| r.id == id) {
            r.updated = Utc::now();
        }
        Ok(())
    }

    async fn insert_gap_if_partial(
        &self,
        request: &FetchRequest,
        remainder: &[TimeSpan],
    ) -> QueueResult<Vec<i64>> {
        let mut rows = self.rows.lock().unwrap();
        let mut ids = Vec::new();
        for (i, piece) in remainder.iter().enumerate() {
            if i == 0 {
                if let Some(r) = rows.iter_mut().find(|r| r.id == request.id) {
                    r.start = piece.start;
                    r.duration = piece.end - piece.start;
                    r.updated = Utc::now();
                }
                ids.push(request.id);
                continue;
            }
            let id = rows.iter().map(|r| r.id).max().unwrap_or(0) + 1;
            rows.push(FetchRequest {
                id,
                start: piece.start,
                duration: piece.end - piece.start,
                updated: Utc::now(),
                ..request.clone()
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn insert_open(&self, request: &NewRequest) -> QueueResult<i64> {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        rows.push(FetchRequest {
            id,
            channel: request.channel.clone(),
            start: request.start,
            duration: request.duration,
            gap_type: request.gap_type.clone(),
            status: RequestStatus::Open,
            created: request.created,
            updated: request.created,
        });
        Ok(id)
    }

    async fn get(&self, id: i64) -> QueueResult<Option<FetchRequest>> {
        Ok(self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }
}

/// Holdings that never cover anything.
pub struct NoHoldings;

#[async_trait]
impl HoldingsOracle for NoHoldings {
    async fn is_fully_covered(
        &self,
        _channel: &ChannelKey,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Worker collaborators backed by `queue`, with no holdings and no telemetry
/// unless given.
pub fn memory_deps(
    queue: Arc<MemoryQueue>,
    source: Arc<dyn DataSource>,
    telemetry: Arc<dyn Telemetry>,
    admission: AdmissionGate,
) -> WorkerDeps {
    WorkerDeps {
        queue,
        holdings: Arc::new(NoHoldings),
        telemetry,
        route: Route {
            source,
            immediate: false,
        },
        admission,
        live_sink: Some(Arc::new(MemoryConnector(MemorySink::new()))),
        archive_sink: None,
    }
}
