//! Downstream delivery: the [`sink::DataSink`] contract and its transports.

pub mod directory;
pub mod sink;
pub mod tcp;
