//! Fetch orchestration engine for seismic waveform backfill.
//!
//! Workers poll a persisted queue of fetch requests, skip intervals already
//! held downstream, pull the rest through pluggable sources while pacing the
//! link, and deliver recovered blocks to a live or archive store.

pub mod admission;
pub mod alert;
pub mod config;
pub mod db;
pub mod error;
pub mod holdings;
pub mod latency;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod schema;
pub mod shutdown;
pub mod sink_writer;
pub mod sources;
pub mod telemetry;
pub mod throttle;
pub mod tz;
pub mod worker;
