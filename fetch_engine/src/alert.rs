//! Operator-visible events.
//!
//! Alerts are ordinary `tracing` events on the `alert` target, so the
//! subscriber can route them to a separate sink (see [`crate::logging`]).

use std::fmt;

/// What the operator is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// A block could not be delivered after a reconnect and was dropped.
    DeliveryDropped,
    /// A request was closed as permanently without data.
    PermanentNoData,
    /// A worker failed outside a single row and is restarting.
    WorkerFault,
}

impl AlertKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            AlertKind::DeliveryDropped => "delivery_dropped",
            AlertKind::PermanentNoData => "permanent_nodata",
            AlertKind::WorkerFault => "worker_fault",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emit an alert.
pub fn raise(kind: AlertKind, detail: impl fmt::Display) {
    match kind {
        AlertKind::PermanentNoData => {
            tracing::warn!(target: "alert", kind = kind.as_str(), "{detail}")
        }
        _ => tracing::error!(target: "alert", kind = kind.as_str(), "{detail}"),
    }
}
