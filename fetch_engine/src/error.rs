//! Engine-level errors raised while assembling the runtime.

use shared_utils::config::ConfigError;
use waveform_ingestor::{io::sink::SinkError, sources::SourceInitError};

#[derive(thiserror::Error, Debug)]
/// Startup and reload failures.
pub enum EngineError {
    /// An environment override could not be read.
    #[error(transparent)]
    Env(#[from] ConfigError),

    /// The configuration file is structurally valid TOML but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A target routes to a gap type without a `[sources.<gap_type>]` entry.
    #[error("target {target:?}: no source configured for gap type {gap_type:?}")]
    UnroutedGapType {
        /// Target name.
        target: String,
        /// Gap type it asked for.
        gap_type: String,
    },

    /// A source names a kind the registry does not know.
    #[error("gap type {gap_type:?}: unknown source kind {kind:?}")]
    UnknownSourceKind {
        /// Gap type being configured.
        gap_type: String,
        /// Requested kind.
        kind: String,
    },

    /// The factory for a source failed.
    #[error("gap type {gap_type:?}: {source}")]
    SourceInit {
        /// Gap type being configured.
        gap_type: String,
        /// Underlying factory error.
        #[source]
        source: SourceInitError,
    },

    /// A sink address did not parse.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// `--target` named something the configuration does not define.
    #[error("unknown target {0:?}")]
    UnknownTarget(String),
}
