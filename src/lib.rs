//! Capture and decode ARM Cortex-M SWO/ITM trace streams over an
//! ST-Link V2 (or any `probe-rs`-supported) debug probe.
//!
//! The crate configures the target's ITM/DWT/TPIU debug block for
//! asynchronous SWO, pumps raw bytes off the probe on a worker thread,
//! decodes the TPIU framing into typed software and hardware trace
//! events, and renders them through a pluggable [`dispatcher::RenderSink`].
//! See [`session::Session`] for the entry point.

pub mod config;
pub mod configurator;
pub mod diag;
pub mod dispatcher;
pub mod error;
pub mod log;
pub mod parser;
pub mod probe;
pub mod pump;
pub mod session;
pub mod symbols;
pub mod timestamp;
pub mod watchpoint;

pub use config::{DwtEntry, TraceConfig};
pub use error::TraceError;
pub use session::Session;
