//! Callbacks a source uses to pace itself against a constrained link.

use async_trait::async_trait;

/// Pacing hooks handed to [`DataSource::fetch`](super::DataSource::fetch).
///
/// The engine's implementation is owned by a single worker and combines the
/// throttle controller with the wait-for-latency barriers.
#[async_trait]
pub trait LinkControl: Send {
    /// Report `n` bytes just received; may sleep to respect the allowed rate.
    async fn on_bytes_transferred(&mut self, n: usize);

    /// Block while station latency is high and fresh. Returns the last
    /// observed latency in seconds, if any was known.
    async fn wait_for_latency(&mut self) -> Option<f64>;

    /// Block until a *new*, acceptable latency measurement arrives, or until
    /// the grace period runs out.
    async fn wait_for_changing_latency(&mut self);

    /// True once shutdown has been requested; long transfers should stop.
    fn is_cancelled(&self) -> bool;
}

/// A link with no pacing at all. Useful for tooling and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unpaced;

#[async_trait]
impl LinkControl for Unpaced {
    async fn on_bytes_transferred(&mut self, _n: usize) {}

    async fn wait_for_latency(&mut self) -> Option<f64> {
        None
    }

    async fn wait_for_changing_latency(&mut self) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}
