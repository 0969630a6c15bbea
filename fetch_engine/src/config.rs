//! Engine configuration: parsing, normalization, environment overrides and
//! the live snapshot shared with workers.
//!
//! The TOML file has four sections:
//! - `[engine]`: database, pacing and scheduling knobs
//! - `[sinks]`: `live` / `archive` addresses
//! - `[sources.<gap_type>]`: which source kind serves a gap type
//! - `[targets.<name>]`: one worker each (channel pattern + gap type)
//!
//! Normalization trims every code, upper-cases gap types and lower-cases
//! source kinds. Two keys that normalize to the same gap type are an error.
//!
//! Entrypoints:
//! - Parse + normalize from a TOML string: [`load_config_str`]
//! - Parse + normalize from a file path: [`load_config_path`]
//! - Environment overrides: [`apply_env_overrides`]

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use arc_swap::ArcSwap;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use shared_utils::config::parse_env_opt;
use waveform_ingestor::io::sink::SinkAddress;

use crate::{error::EngineError, latency::LatencySettings, throttle::MIN_RATE};

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub sinks: SinksSection,
    /// Gap type -> source configuration.
    #[serde(default)]
    pub sources: IndexMap<String, SourceCfg>,
    /// Target name -> worker configuration, in file order.
    #[serde(default)]
    pub targets: IndexMap<String, TargetCfg>,
}

/// Process-wide knobs.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineSection {
    pub database_url: String,
    /// Connections in the shared pool.
    pub pool_size: u32,
    /// Per-worker maximum transfer rate in bytes/s.
    pub throttle_ceiling: u64,
    /// Impaired workers allowed at once. Absent means unbounded, 0 disables.
    pub admission_capacity: Option<usize>,
    pub significant_latency_secs: f64,
    pub latency_freshness_secs: u64,
    /// Blocks newer than this go to the live sink.
    pub live_window_days: i64,
    pub reload_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    /// Only requests starting within this many days are polled.
    pub queue_window_days: i64,
    /// Redundant blocks checked per fetch before the rest are dropped.
    pub redundant_tolerance: usize,
    /// Account for blocks without sending them.
    pub dry_run: bool,
    pub log_level: Option<String>,
    pub log_format: LogFormat,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            database_url: "sqlite://fetch_engine.db".into(),
            pool_size: 4,
            throttle_ceiling: 20_000,
            admission_capacity: None,
            significant_latency_secs: 60.0,
            latency_freshness_secs: 600,
            live_window_days: 10,
            reload_interval_secs: 300,
            shutdown_grace_secs: 30,
            queue_window_days: 30,
            redundant_tolerance: 10,
            dry_run: false,
            log_level: None,
            log_format: LogFormat::Text,
        }
    }
}

impl EngineSection {
    pub fn latency_settings(&self) -> LatencySettings {
        LatencySettings {
            significant_secs: self.significant_latency_secs,
            freshness: Duration::from_secs(self.latency_freshness_secs),
            ..LatencySettings::default()
        }
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Downstream store addresses (`tcp://host:port` or a directory).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SinksSection {
    pub live: Option<String>,
    pub archive: Option<String>,
}

impl SinksSection {
    /// Parsed `(live, archive)` addresses.
    pub fn addresses(&self) -> Result<(Option<SinkAddress>, Option<SinkAddress>), EngineError> {
        let parse = |s: &Option<String>| s.as_deref().map(str::parse::<SinkAddress>).transpose();
        Ok((parse(&self.live)?, parse(&self.archive)?))
    }
}

/// How one gap type is served.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SourceCfg {
    /// Registered source kind, e.g. "fdsn" or "nodata".
    pub kind: String,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub latency_aware: bool,
    /// Environment variable holding an access token.
    pub token_env: Option<String>,
    /// Immediate-only gap type: delivered blocks skip the holdings check.
    #[serde(default)]
    pub immediate: bool,
}

/// One acquisition target.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TargetCfg {
    /// Regex over the fixed-width channel key. Absent matches all channels.
    pub channel_pattern: Option<String>,
    pub gap_type: String,
    /// Private link: no latency-driven re-tuning.
    #[serde(default)]
    pub local_link: bool,
    /// Source output is trusted; skip the redundant-block check.
    #[serde(default)]
    pub authoritative: bool,
    /// Per-target ceiling override in bytes/s.
    pub throttle_ceiling: Option<u64>,
    /// Per-target queue window override in days.
    pub window_days: Option<i64>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl TargetCfg {
    /// Compiled channel pattern.
    pub fn channel_regex(&self) -> Result<Option<Regex>, regex::Error> {
        self.channel_pattern.as_deref().map(Regex::new).transpose()
    }
}

/// Normalize gap-type keys and codes in place.
pub fn normalize_config(cfg: &mut EngineConfig) -> Result<(), EngineError> {
    let mut sources = IndexMap::with_capacity(cfg.sources.len());
    for (gap, mut src) in std::mem::take(&mut cfg.sources) {
        let key = gap.trim().to_uppercase();
        src.kind = src.kind.trim().to_lowercase();
        if sources.insert(key.clone(), src).is_some() {
            return Err(EngineError::InvalidConfig(format!(
                "gap type {key:?} is configured more than once"
            )));
        }
    }
    cfg.sources = sources;

    for target in cfg.targets.values_mut() {
        target.gap_type = target.gap_type.trim().to_uppercase();
        if let Some(p) = &target.channel_pattern {
            target.channel_pattern = Some(p.trim().to_string());
        }
    }
    Ok(())
}

/// Largest accepted window, in days.
pub const MAX_WINDOW_DAYS: i64 = 36_500;

/// Check the normalized configuration for values the engine cannot run with.
pub fn validate_config(cfg: &EngineConfig) -> Result<(), EngineError> {
    let e = &cfg.engine;
    let bad = |m: String| Err(EngineError::InvalidConfig(m));
    if e.throttle_ceiling < MIN_RATE {
        return bad(format!("throttle_ceiling must be at least {MIN_RATE} B/s"));
    }
    if e.pool_size == 0 {
        return bad("pool_size must be positive".into());
    }
    if !(e.significant_latency_secs.is_finite() && e.significant_latency_secs > 0.0) {
        return bad("significant_latency_secs must be positive".into());
    }
    if !(1..=MAX_WINDOW_DAYS).contains(&e.live_window_days)
        || !(1..=MAX_WINDOW_DAYS).contains(&e.queue_window_days)
    {
        return bad(format!(
            "live_window_days and queue_window_days must be between 1 and {MAX_WINDOW_DAYS}"
        ));
    }
    if e.reload_interval_secs == 0 {
        return bad("reload_interval_secs must be positive".into());
    }
    if !e.dry_run && cfg.sinks.live.is_none() && cfg.sinks.archive.is_none() {
        return bad("at least one sink is required unless dry_run is set".into());
    }
    cfg.sinks.addresses()?;

    for (name, t) in &cfg.targets {
        if !cfg.sources.contains_key(&t.gap_type) {
            return Err(EngineError::UnroutedGapType {
                target: name.clone(),
                gap_type: t.gap_type.clone(),
            });
        }
        if let Err(err) = t.channel_regex() {
            return bad(format!("target {name:?}: bad channel_pattern: {err}"));
        }
        if t.throttle_ceiling.is_some_and(|c| c < MIN_RATE) {
            return bad(format!("target {name:?}: throttle_ceiling below {MIN_RATE} B/s"));
        }
        if t.window_days.is_some_and(|d| !(1..=MAX_WINDOW_DAYS).contains(&d)) {
            return bad(format!("target {name:?}: window_days must be between 1 and {MAX_WINDOW_DAYS}"));
        }
    }
    Ok(())
}

/// Override file values from `FETCH_*` environment variables.
pub fn apply_env_overrides(cfg: &mut EngineConfig) -> Result<(), EngineError> {
    if let Some(v) = parse_env_opt::<String>("FETCH_DATABASE_URL")? {
        cfg.engine.database_url = v;
    }
    if let Some(v) = parse_env_opt::<u64>("FETCH_THROTTLE_CEILING")? {
        cfg.engine.throttle_ceiling = v;
    }
    if let Some(v) = parse_env_opt::<usize>("FETCH_ADMISSION_CAPACITY")? {
        cfg.engine.admission_capacity = Some(v);
    }
    if let Some(v) = parse_env_opt::<f64>("FETCH_SIGNIFICANT_LATENCY_SECS")? {
        cfg.engine.significant_latency_secs = v;
    }
    if let Some(v) = parse_env_opt::<String>("FETCH_LIVE_SINK")? {
        cfg.sinks.live = Some(v);
    }
    if let Some(v) = parse_env_opt::<String>("FETCH_ARCHIVE_SINK")? {
        cfg.sinks.archive = Some(v);
    }
    Ok(())
}

/// Parse and normalize a TOML string. Does not consult the environment.
pub fn load_config_str(s: &str) -> anyhow::Result<EngineConfig> {
    let mut cfg: EngineConfig = toml::from_str(s).context("parse engine config")?;
    normalize_config(&mut cfg)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Read a file, apply environment overrides, normalize and validate.
pub fn load_config_path(path: impl AsRef<Path>) -> anyhow::Result<EngineConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let mut cfg: EngineConfig =
        toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))?;
    apply_env_overrides(&mut cfg)?;
    normalize_config(&mut cfg)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Lock-free handle to the current configuration.
///
/// Readers get a consistent `Arc` snapshot; the orchestrator swaps in a new
/// one after each successful reload.
#[derive(Debug, Clone)]
pub struct ConfigHandle(Arc<ArcSwap<EngineConfig>>);

impl ConfigHandle {
    pub fn new(cfg: EngineConfig) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(cfg)))
    }

    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.0.load_full()
    }

    pub fn store(&self, cfg: EngineConfig) {
        self.0.store(Arc::new(cfg));
    }
}
