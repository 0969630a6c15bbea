//! Source abstraction for remote waveform archives and field recorders.
//!
//! This module defines the [`DataSource`] trait, a uniform contract over every
//! remote protocol the engine can pull from. Each concrete client (FDSN web
//! services, proprietary recorder protocols, archive crawlers) implements
//! [`DataSource`] and reports one of three outcomes per request, or fails:
//!
//! - [`FetchOutcome::Blocks`]: recovered data, in time order, never empty.
//! - [`FetchOutcome::Empty`]: the query worked but returned nothing yet. This is
//!   *not* a permanent absence; the caller retries later.
//! - [`FetchOutcome::NoData`]: the interval can never produce data.
//! - `Err(SourceError)`: a transient failure (network reset, timeout, bad
//!   partial response). The caller retries later.
//!
//! Sources pace themselves through the [`LinkControl`] they are handed, which
//! is how the engine's throttle and latency barriers reach into protocol code.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use waveform_ingestor::models::request::FetchRequest;
//! use waveform_ingestor::sources::{DataSource, FetchOutcome, LinkControl, SourceError};
//!
//! struct Silent;
//!
//! #[async_trait]
//! impl DataSource for Silent {
//!     fn name(&self) -> &str {
//!         "silent"
//!     }
//!
//!     async fn fetch(
//!         &self,
//!         _request: &FetchRequest,
//!         _link: &mut dyn LinkControl,
//!     ) -> Result<FetchOutcome, SourceError> {
//!         Ok(FetchOutcome::Empty)
//!     }
//! }
//! ```

pub mod fdsn;
pub mod link;
pub mod nodata;

use async_trait::async_trait;
use shared_utils::env::MissingEnvVarError;
use snafu::{Backtrace, Snafu};

use crate::models::{block::Block, request::FetchRequest};

pub use link::{LinkControl, Unpaced};

/// Result of a successful round trip to a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Recovered blocks in time order. Never empty.
    Blocks(Vec<Block>),
    /// Queried successfully, nothing (yet). Retry later.
    Empty,
    /// The interval can never produce data.
    NoData,
}

impl FetchOutcome {
    /// Wrap a block list, mapping an empty list to [`FetchOutcome::Empty`].
    pub fn from_blocks(mut blocks: Vec<Block>) -> Self {
        if blocks.is_empty() {
            FetchOutcome::Empty
        } else {
            blocks.sort_by_key(|b| b.start);
            FetchOutcome::Blocks(blocks)
        }
    }
}

/// Uniform contract over remote waveform protocols.
///
/// Implementations own their network timeouts; the caller adds none.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Recover the interval described by `request`.
    async fn fetch(
        &self,
        request: &FetchRequest,
        link: &mut dyn LinkControl,
    ) -> Result<FetchOutcome, SourceError>;
}

/// Errors that can occur during the creation of a source instance.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceInitError {
    /// missed environment variable.
    #[snafu(display("Missing environment variable: {source}"))]
    MissingEnvVar {
        source: MissingEnvVarError,
        backtrace: Backtrace,
    },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// Access token contains invalid characters.
    #[snafu(display("Invalid access token format: {source}"))]
    InvalidToken {
        source: reqwest::header::InvalidHeaderValue,
        backtrace: Backtrace,
    },

    /// The source configuration is unusable.
    #[snafu(display("Invalid source configuration: {message}"))]
    InvalidConfig {
        message: String,
        backtrace: Backtrace,
    },
}

/// Errors raised while fetching. All of them are transient from the engine's
/// point of view: the request stays open and is retried later.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// An error during the HTTP exchange (e.g., connection reset, timeout).
    #[snafu(display("request failed: {source}"))]
    Request {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The remote answered with an unexpected status.
    #[snafu(display("remote returned {status}: {message}"))]
    Api {
        status: u16,
        message: String,
        backtrace: Backtrace,
    },

    /// Socket or file I/O failed.
    #[snafu(display("I/O error: {source}"))]
    Io {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// The response could not be interpreted.
    #[snafu(display("malformed response: {message}"))]
    Malformed {
        message: String,
        backtrace: Backtrace,
    },

    /// Shutdown was requested mid-transfer.
    #[snafu(display("fetch cancelled by shutdown"))]
    Cancelled { backtrace: Backtrace },
}
