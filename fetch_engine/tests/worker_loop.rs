mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use common::*;
use fetch_engine::{
    admission::AdmissionGate,
    worker::{Poll, Worker},
};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use waveform_ingestor::{
    models::request::{FetchRequest, RequestStatus},
    sources::{DataSource, FetchOutcome, LinkControl, SourceError},
};

/// Pauses on station latency, notes how many tokens were left while it
/// worked, then returns data or panics.
struct LatencyBoundSource {
    gate: AdmissionGate,
    available_during_fetch: Mutex<Vec<Option<usize>>>,
    panic_after_wait: bool,
}

#[async_trait]
impl DataSource for LatencyBoundSource {
    fn name(&self) -> &str {
        "latency-bound"
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        link: &mut dyn LinkControl,
    ) -> Result<FetchOutcome, SourceError> {
        link.wait_for_latency().await;
        self.available_during_fetch
            .lock()
            .unwrap()
            .push(self.gate.available());
        if self.panic_after_wait {
            panic!("decoder bug");
        }
        let secs = request.duration.num_seconds();
        Ok(FetchOutcome::from_blocks(tiling_blocks(&request.channel, request.start, secs, 1)))
    }
}

/// One row whose fetch pauses on latency for a minute, then an idle poll.
async fn latency_pause_then_poll(
    panic_after_wait: bool,
) -> (Arc<LatencyBoundSource>, AdmissionGate, Arc<MemoryQueue>) {
    let queue = MemoryQueue::new();
    queue.enqueue(&channel(), now_ms() - chrono::Duration::days(1), 300).await;

    let tel = ManualTelemetry::new();
    tel.set(50.0, Utc::now());
    let recover = {
        let tel = tel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(45)).await;
            tel.set(1.0, Utc::now());
        })
    };

    let gate = AdmissionGate::new(Some(1));
    let source = Arc::new(LatencyBoundSource {
        gate: gate.clone(),
        available_during_fetch: Mutex::new(Vec::new()),
        panic_after_wait,
    });
    let mut worker = Worker::new(
        settings(false),
        memory_deps(queue.clone(), source.clone(), tel, gate.clone()),
    );
    let cancel = CancellationToken::new();

    assert_eq!(worker.poll_once(&cancel).await.unwrap(), Poll::Worked(1));
    recover.await.unwrap();
    assert_eq!(gate.available(), Some(1));

    assert_eq!(worker.poll_once(&cancel).await.unwrap(), Poll::Idle);
    assert_eq!(gate.available(), Some(1));
    (source, gate, queue)
}

#[tokio::test(start_paused = true)]
async fn token_taken_during_a_fetch_is_returned_after_the_row() {
    let (source, _gate, queue) = latency_pause_then_poll(false).await;
    assert_eq!(*source.available_during_fetch.lock().unwrap(), vec![Some(0)]);
    assert_eq!(queue.status(1), Some(RequestStatus::Filled));
}

#[tokio::test(start_paused = true)]
async fn token_is_returned_when_the_source_panics() {
    let (source, _gate, queue) = latency_pause_then_poll(true).await;
    assert_eq!(*source.available_during_fetch.lock().unwrap(), vec![Some(0)]);
    assert_eq!(queue.status(1), Some(RequestStatus::Open));
}

#[tokio::test(start_paused = true)]
async fn same_eligible_count_twice_pauses_a_minute() {
    let queue = MemoryQueue::new();
    let t = now_ms() - chrono::Duration::days(1);
    queue.enqueue(&channel(), t, 300).await;
    queue.enqueue(&channel(), t + chrono::Duration::seconds(300), 300).await;

    let mut s = settings(false);
    s.retry.base_interval = chrono::Duration::zero();
    let source = ScriptedSource::always(Step::Empty);
    let mut worker = Worker::new(
        s,
        memory_deps(queue, source.clone(), ManualTelemetry::new(), AdmissionGate::new(None)),
    );
    let cancel = CancellationToken::new();

    let start = Instant::now();
    assert_eq!(worker.poll_once(&cancel).await.unwrap(), Poll::Worked(2));
    assert_eq!(start.elapsed(), Duration::ZERO);

    let start = Instant::now();
    assert_eq!(worker.poll_once(&cancel).await.unwrap(), Poll::Worked(2));
    assert!(start.elapsed() >= Duration::from_secs(60));
    assert_eq!(source.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_the_idle_backoff() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(
        settings(false),
        memory_deps(
            queue,
            ScriptedSource::always(Step::Empty),
            ManualTelemetry::new(),
            AdmissionGate::new(None),
        ),
    );
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
    }

    let start = Instant::now();
    let stats = worker.run(cancel).await;
    assert!(start.elapsed() < Duration::from_secs(30));
    assert_eq!(stats.polls, 1);
}

#[tokio::test(start_paused = true)]
async fn work_found_resets_the_idle_backoff() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(
        settings(false),
        memory_deps(
            queue.clone(),
            ScriptedSource::always(Step::Empty),
            ManualTelemetry::new(),
            AdmissionGate::new(None),
        ),
    );
    let cancel = CancellationToken::new();
    {
        let queue = queue.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(40)).await;
            queue.enqueue(&channel(), now_ms() - chrono::Duration::days(1), 300).await;
        });
    }
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(130)).await;
            cancel.cancel();
        });
    }

    // idle at 0 and 30, work at 90, idle again at 90 and 120
    let stats = worker.run(cancel).await;
    assert_eq!(stats.polls, 5);
    assert_eq!(stats.empty, 1);
}

#[tokio::test]
async fn window_reaching_past_the_calendar_still_polls() {
    let queue = MemoryQueue::new();
    let id = queue.enqueue(&channel(), now_ms() - chrono::Duration::days(400), 300).await;

    let mut s = settings(true);
    s.window = chrono::Duration::MAX;
    s.live_window = chrono::Duration::MAX;
    let source = ScriptedSource::always(Step::Cover(2));
    let stats = Worker::new(
        s,
        memory_deps(queue.clone(), source, ManualTelemetry::new(), AdmissionGate::new(None)),
    )
    .run(CancellationToken::new())
    .await;

    assert_eq!(stats.filled, 1);
    assert_eq!(queue.status(id), Some(RequestStatus::Filled));
}
