//! Vendor-agnostic waveform models plus the contracts (and a few concrete
//! implementations) for pulling data from remote sources and pushing it into
//! downstream stores.

pub mod io;
pub mod models;
pub mod sources;
