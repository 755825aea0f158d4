//! Session-lifetime configuration (spec §3 "Trace Configuration" /
//! "DWT Entry"). Grounded on the teacher's `manifest.rs::ManifestProperties`
//! shape: a plain `serde`-derived struct with a validating constructor, so
//! a periphery can load/store these as JSON without this crate caring
//! about the file format (spec §1 Non-goals: "config loading").
use serde::{Deserialize, Serialize};

use crate::error::TraceError;

const MAX_BAUD_HZ: u32 = 2_000_000;

/// Immutable per-session trace configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraceConfig {
    pub xtal_mhz: u32,
    pub baud_hz: u32,
    pub exception_tracing: bool,
    pub profiling: bool,
    /// PC-sample reload value, 0..=15 (only meaningful if `profiling`).
    pub sample_reload: u8,
}

impl TraceConfig {
    pub fn new(xtal_mhz: u32, baud_hz: u32) -> Result<Self, TraceError> {
        let cfg = Self {
            xtal_mhz,
            baud_hz,
            exception_tracing: false,
            profiling: false,
            sample_reload: 15,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), TraceError> {
        if self.baud_hz > MAX_BAUD_HZ {
            return Err(TraceError::ConfigInvalid(format!(
                "baud rate {} exceeds maximum of {}",
                self.baud_hz, MAX_BAUD_HZ
            )));
        }
        if self.baud_hz == 0 {
            return Err(TraceError::ConfigInvalid("baud rate must be > 0".into()));
        }
        if self.sample_reload > 0xF {
            return Err(TraceError::ConfigInvalid(
                "sample_reload must fit in 4 bits".into(),
            ));
        }
        Ok(())
    }

    /// `floor(xtal_Hz / baud - 0.5)`, programmed into `TPIU_ACPR` (§6).
    pub fn acpr_divisor(&self) -> u32 {
        let xtal_hz = self.xtal_mhz as f64 * 1_000_000.0;
        let div = xtal_hz / self.baud_hz as f64 - 0.5;
        div.floor() as u32
    }
}

/// Per-comparator (DWT0..DWT3) desired watchpoint state (spec §3 "DWT
/// Entry"). `function == 0` means disabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct DwtEntry {
    pub addr: u32,
    pub size: u32,
    pub get_pc: bool,
    pub get_data: bool,
    pub get_offset: bool,
}

impl DwtEntry {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.get_pc || self.get_data || self.get_offset
    }
}
