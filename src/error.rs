//! Crate-wide error type. Mirrors the per-module `thiserror` enums the
//! teacher composes (`sources::SourceError`, `sinks::SinkError`) into one
//! flat enum, since this crate has a single collaborator graph rather than
//! pluggable sources/sinks.
use crate::diag::DiagnosableError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    /// No ST-Link (or compatible) probe could be found when opening a
    /// session. Terminal: the caller must retry after plugging in a probe.
    #[error("No debug probe found")]
    ProbeUnavailable,

    /// A probe read/write failed mid-session. The pump stops cleanly on
    /// this; it is not raised for power loss (see `PowerLoss` handling in
    /// `pump`, which is recovered internally and never surfaces as an
    /// error).
    #[error("Probe transport failed: {0}")]
    Transport(#[source] anyhow::Error),

    /// A `TraceConfig`/`DwtEntry` value violates an invariant (baud over
    /// 2 MHz, watch size not a power of two). Rejected at the call site,
    /// never silently clamped.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl DiagnosableError for TraceError {
    fn diagnose(&self) -> Vec<String> {
        match self {
            TraceError::ProbeUnavailable => vec![
                "Check that the ST-Link is plugged in and that udev rules grant access".into(),
            ],
            TraceError::ConfigInvalid(_) => {
                vec!["SWO baud rate must not exceed 2,000,000 Hz".into()]
            }
            _ => vec![],
        }
    }
}
