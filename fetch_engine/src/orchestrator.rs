//! Top-level supervisor: one worker task per enabled target, periodic config
//! reload, and bounded-grace shutdown.

use std::{path::PathBuf, sync::Arc, time::Duration};

use indexmap::IndexMap;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use waveform_ingestor::io::sink::SinkConnector;

use crate::{
    admission::AdmissionGate,
    alert::{self, AlertKind},
    config::{ConfigHandle, EngineConfig, EngineSection, SinksSection, SourceCfg, TargetCfg, load_config_path},
    db::pool::DbPool,
    error::EngineError,
    holdings::{HoldingsOracle, SqliteHoldings},
    queue::{SqliteWorkQueue, WorkQueue},
    shutdown::sleep_or_cancel,
    sources::SourceRegistry,
    telemetry::{SqliteTelemetry, Telemetry},
    worker::{Worker, WorkerDeps, WorkerSettings, WorkerStats},
};

/// Persistence collaborators shared by every worker.
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn WorkQueue>,
    pub holdings: Arc<dyn HoldingsOracle>,
    pub telemetry: Arc<dyn Telemetry>,
}

impl Stores {
    /// All three surfaces over one SQLite pool.
    pub fn sqlite(pool: DbPool) -> Self {
        Self {
            queue: Arc::new(SqliteWorkQueue::new(pool.clone())),
            holdings: Arc::new(SqliteHoldings::new(pool.clone())),
            telemetry: Arc::new(SqliteTelemetry::new(pool)),
        }
    }
}

/// Process-surface choices.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run only this target.
    pub target: Option<String>,
    /// Stop each worker once it finds nothing eligible.
    pub single_shot: bool,
}

/// Everything that, if changed, requires restarting a worker.
#[derive(Debug, Clone, PartialEq)]
struct RestartKey {
    target: TargetCfg,
    source: SourceCfg,
    engine: EngineSection,
    sinks: SinksSection,
}

struct RunningWorker {
    key: RestartKey,
    cancel: CancellationToken,
    handle: JoinHandle<WorkerStats>,
}

struct Planned {
    key: RestartKey,
    settings: WorkerSettings,
    deps: WorkerDeps,
}

/// Supervises worker tasks.
pub struct Orchestrator {
    config: ConfigHandle,
    config_path: Option<PathBuf>,
    registry: SourceRegistry,
    stores: Stores,
    options: RunOptions,
    admission: AdmissionGate,
    workers: IndexMap<String, RunningWorker>,
    finished: IndexMap<String, WorkerStats>,
}

impl Orchestrator {
    /// `config_path`, when given, is re-read every reload interval.
    pub fn new(
        config: EngineConfig,
        config_path: Option<PathBuf>,
        registry: SourceRegistry,
        stores: Stores,
        options: RunOptions,
    ) -> Result<Self, EngineError> {
        if let Some(t) = &options.target {
            if !config.targets.contains_key(t) {
                return Err(EngineError::UnknownTarget(t.clone()));
            }
        }
        // resolve once up front so bad kinds fail before any task starts
        registry.resolve(&config)?;
        let admission = AdmissionGate::new(config.engine.admission_capacity);
        Ok(Self {
            config: ConfigHandle::new(config),
            config_path,
            registry,
            stores,
            options,
            admission,
            workers: IndexMap::new(),
            finished: IndexMap::new(),
        })
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    fn plan(&self, cfg: &EngineConfig) -> Result<IndexMap<String, Planned>, EngineError> {
        let sources = self.registry.resolve(cfg)?;
        let (live, archive) = cfg.sinks.addresses()?;
        let live: Option<Arc<dyn SinkConnector>> = live.map(|a| a.connector());
        let archive: Option<Arc<dyn SinkConnector>> = archive.map(|a| a.connector());

        let mut out = IndexMap::new();
        for (name, target) in &cfg.targets {
            if !target.enabled {
                continue;
            }
            if self.options.target.as_ref().is_some_and(|only| only != name) {
                continue;
            }
            let (Some(route), Some(source_cfg)) =
                (sources.get(&target.gap_type), cfg.sources.get(&target.gap_type))
            else {
                return Err(EngineError::UnroutedGapType {
                    target: name.clone(),
                    gap_type: target.gap_type.clone(),
                });
            };
            let settings = WorkerSettings::from_config(name, target, &cfg.engine, self.options.single_shot)?;
            let deps = WorkerDeps {
                queue: Arc::clone(&self.stores.queue),
                holdings: Arc::clone(&self.stores.holdings),
                telemetry: Arc::clone(&self.stores.telemetry),
                route: route.clone(),
                admission: self.admission.clone(),
                live_sink: live.clone(),
                archive_sink: archive.clone(),
            };
            let key = RestartKey {
                target: target.clone(),
                source: source_cfg.clone(),
                engine: cfg.engine.clone(),
                sinks: cfg.sinks.clone(),
            };
            out.insert(name.clone(), Planned { key, settings, deps });
        }
        Ok(out)
    }

    /// Start, stop or restart workers so the running set matches `cfg`.
    async fn reconcile(&mut self, cfg: &EngineConfig, cancel: &CancellationToken) -> Result<(), EngineError> {
        if self.admission.capacity() != cfg.engine.admission_capacity {
            self.admission = AdmissionGate::new(cfg.engine.admission_capacity);
        }
        let plan = self.plan(cfg)?;

        let stale: Vec<String> = self
            .workers
            .iter()
            .filter(|(name, w)| {
                plan.get(*name).is_none_or(|p| p.key != w.key) || w.handle.is_finished()
            })
            .map(|(name, _)| name.clone())
            .collect();
        let stale: Vec<(String, RunningWorker)> = stale
            .into_iter()
            .filter_map(|name| self.workers.shift_remove(&name).map(|w| (name, w)))
            .collect();
        if !stale.is_empty() {
            tracing::info!(workers = stale.len(), "stopping workers");
            self.stop_all(stale, Instant::now() + cfg.engine.shutdown_grace()).await;
        }

        for (name, planned) in plan {
            if self.workers.contains_key(&name) {
                continue;
            }
            tracing::info!(target_name = %name, "starting worker");
            let child = cancel.child_token();
            let worker = Worker::new(planned.settings, planned.deps);
            let handle = tokio::spawn(worker.run(child.clone()));
            self.workers.insert(
                name,
                RunningWorker {
                    key: planned.key,
                    cancel: child,
                    handle,
                },
            );
        }
        Ok(())
    }

    /// Cancel every worker first, then wait for all of them against the one
    /// `deadline`.
    async fn stop_all(&mut self, workers: impl IntoIterator<Item = (String, RunningWorker)>, deadline: Instant) {
        let workers: Vec<_> = workers.into_iter().collect();
        for (_, w) in &workers {
            w.cancel.cancel();
        }
        for (name, w) in workers {
            self.stop(name, w, deadline).await;
        }
    }

    async fn stop(&mut self, name: String, mut w: RunningWorker, deadline: Instant) {
        tracing::debug!(target_name = %name, "stopping worker");
        w.cancel.cancel();
        match tokio::time::timeout_at(deadline, &mut w.handle).await {
            Ok(Ok(stats)) => {
                self.finished.insert(name, stats);
            }
            Ok(Err(e)) => {
                alert::raise(AlertKind::WorkerFault, format_args!("worker {name} died: {e}"));
            }
            Err(_) => {
                tracing::warn!(target_name = %name, "worker ignored shutdown; aborting");
                w.handle.abort();
            }
        }
    }

    async fn reload(&mut self, cancel: &CancellationToken) {
        let Some(path) = self.config_path.clone() else {
            let cfg = self.config.snapshot();
            if let Err(e) = self.reconcile(&cfg, cancel).await {
                tracing::warn!(error = %e, "reconcile failed");
            }
            return;
        };
        let loaded = load_config_path(&path).and_then(|cfg| {
            self.registry.resolve(&cfg)?;
            Ok(cfg)
        });
        match loaded {
            Ok(cfg) => {
                let current = self.config.snapshot();
                if current.engine.database_url != cfg.engine.database_url
                    || current.engine.pool_size != cfg.engine.pool_size
                {
                    tracing::warn!("database settings changed; restart the process to apply");
                }
                if let Err(e) = self.reconcile(&cfg, cancel).await {
                    tracing::warn!(error = %e, "reconcile failed; keeping previous workers");
                    return;
                }
                self.config.store(cfg);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "config reload failed; keeping previous configuration");
            }
        }
    }

    async fn all_finished(&self) {
        while !self.workers.values().all(|w| w.handle.is_finished()) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Run until `cancel` fires (or, in single-shot mode, until every worker
    /// is idle). Returns final per-target counters.
    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<IndexMap<String, WorkerStats>> {
        let cfg = self.config.snapshot();
        self.reconcile(&cfg, &cancel).await?;
        tracing::info!(workers = self.workers.len(), "orchestrator running");

        if self.options.single_shot {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.all_finished() => {}
            }
        } else {
            loop {
                let interval = self.config.snapshot().engine.reload_interval();
                if !sleep_or_cancel(interval, &cancel).await {
                    break;
                }
                self.reload(&cancel).await;
            }
        }

        Ok(self.shutdown().await)
    }

    async fn shutdown(mut self) -> IndexMap<String, WorkerStats> {
        let deadline = Instant::now() + self.config.snapshot().engine.shutdown_grace();
        let workers = std::mem::take(&mut self.workers);
        self.stop_all(workers, deadline).await;
        tracing::info!("orchestrator stopped");
        self.finished
    }
}
