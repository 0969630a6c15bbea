//! Tracing subscriber setup for the binary.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the config
//! file's `log_level`, otherwise `info`. Operator alerts are ordinary events
//! on the `alert` target, so `RUST_LOG=warn,alert=warn` keeps only those plus
//! warnings.

use anyhow::Context;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info";

/// Filter directive used when `RUST_LOG` is unset.
pub fn filter_for(level: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = level.map(str::trim).filter(|l| !l.is_empty()).unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directive).with_context(|| format!("invalid log filter {directive:?}"))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(level: Option<&str>, format: LogFormat) -> anyhow::Result<()> {
    let filter = filter_for(level)?;
    let layer = match format {
        LogFormat::Text => fmt::layer().with_target(true).with_filter(filter).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
    };
    if let Err(e) = tracing_subscriber::registry().with(layer).try_init() {
        tracing::debug!(error = %e, "tracing already initialised");
    }
    Ok(())
}
