//! Process-wide limit on how many workers may run while latency-impaired.
//!
//! A worker is impaired for one hour after it last had to pause for link
//! latency. While impaired it must hold a token from the shared pool; the
//! pool is a [`Semaphore`] so the bound holds without any shared counters.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

/// How long a latency pause keeps a worker impaired.
pub const IMPAIRMENT_WINDOW: Duration = Duration::from_secs(3600);

/// Outcome of [`AdmissionHandle::acquire_if_impaired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Not impaired, or gating is off.
    NotNeeded,
    /// A token is now held.
    Held,
    /// Shutdown arrived while waiting.
    Cancelled,
}

/// Shared token pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    pool: Option<Arc<Semaphore>>,
    capacity: Option<usize>,
}

impl AdmissionGate {
    /// `None` is unbounded; `Some(0)` disables gating.
    pub fn new(capacity: Option<usize>) -> Self {
        let pool = capacity
            .filter(|&n| n > 0)
            .map(|n| Arc::new(Semaphore::new(n.min(Semaphore::MAX_PERMITS))));
        Self { pool, capacity }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Tokens not currently held, when gating is active.
    pub fn available(&self) -> Option<usize> {
        self.pool.as_ref().map(|p| p.available_permits())
    }

    /// Per-worker handle onto this pool.
    pub fn handle(&self) -> AdmissionHandle {
        AdmissionHandle {
            pool: self.pool.clone(),
            permit: None,
            last_pause: None,
        }
    }
}

/// One worker's view of the gate: its token, if any, and its impairment clock.
#[derive(Debug)]
pub struct AdmissionHandle {
    pool: Option<Arc<Semaphore>>,
    permit: Option<OwnedSemaphorePermit>,
    last_pause: Option<Instant>,
}

impl AdmissionHandle {
    /// Record a latency pause now.
    pub fn mark_impaired(&mut self) {
        self.last_pause = Some(Instant::now());
    }

    /// True when the last latency pause is within [`IMPAIRMENT_WINDOW`].
    pub fn is_impaired(&self) -> bool {
        self.last_pause
            .is_some_and(|t| t.elapsed() <= IMPAIRMENT_WINDOW)
    }

    pub fn holds_token(&self) -> bool {
        self.permit.is_some()
    }

    /// Block for a token if impaired; return immediately otherwise.
    pub async fn acquire_if_impaired(&mut self, cancel: &CancellationToken) -> Admission {
        if self.permit.is_some() {
            return Admission::Held;
        }
        let Some(pool) = self.pool.clone() else {
            return Admission::NotNeeded;
        };
        if !self.is_impaired() {
            return Admission::NotNeeded;
        }

        let permit = match pool.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(TryAcquireError::Closed) => return Admission::NotNeeded,
            Err(TryAcquireError::NoPermits) => {
                tracing::warn!(target: "alert", "admission pool exhausted; impaired worker waiting for a token");
                tokio::select! {
                    res = pool.acquire_owned() => match res {
                        Ok(p) => p,
                        Err(_) => return Admission::NotNeeded,
                    },
                    _ = cancel.cancelled() => return Admission::Cancelled,
                }
            }
        };
        self.permit = Some(permit);
        Admission::Held
    }

    /// Give the token back once the impairment window has passed.
    pub fn release(&mut self) {
        if self.permit.is_some() && !self.is_impaired() {
            self.permit = None;
        }
    }

    /// Give the token back unconditionally.
    pub fn release_forced(&mut self) {
        self.permit = None;
    }
}
