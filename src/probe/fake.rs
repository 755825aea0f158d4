//! In-memory stand-in for a real probe. Grounded on the teacher's
//! `sources::bogus` fake-source idea (a fully in-process double that
//! drives the rest of the pipeline without real hardware), adapted here
//! to a scriptable register file + voltage/buffer state so it can stand
//! in for the Configurator, Watchpoint Manager and Pump in tests, not
//! just produce canned trace packets.
use std::collections::{HashMap, VecDeque};

use crate::error::TraceError;
use crate::probe::Probe;

#[derive(Debug, Clone)]
pub struct FakeProbe {
    regs: HashMap<u32, u32>,
    voltage: f32,
    core_id: u32,
    running: bool,
    trace_queue: VecDeque<u8>,
    /// Number of times `start_trace_rx`/`stop_trace_rx` have run; tests
    /// use this to assert the pump actually kicked/recovered.
    pub trace_restarts: u32,
    pub swd_reentries: u32,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProbe {
    pub fn new() -> Self {
        Self {
            regs: HashMap::new(),
            voltage: 3.3,
            core_id: 0x2BA0_1477,
            running: false,
            trace_queue: VecDeque::new(),
            trace_restarts: 0,
            swd_reentries: 0,
        }
    }

    pub fn reg(&self, addr: u32) -> u32 {
        *self.regs.get(&addr).unwrap_or(&0)
    }

    pub fn set_voltage(&mut self, v: f32) {
        self.voltage = v;
    }

    /// Queues bytes that a subsequent `trace_buffered_count`/
    /// `read_trace_bytes` pair will report and return.
    pub fn push_trace_bytes(&mut self, bytes: &[u8]) {
        self.trace_queue.extend(bytes);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Probe for FakeProbe {
    fn write_mem32(&mut self, addr: u32, value: u32) -> Result<(), TraceError> {
        self.regs.insert(addr, value);
        Ok(())
    }

    fn read_mem32(&mut self, addr: u32) -> Result<u32, TraceError> {
        Ok(self.reg(addr))
    }

    fn target_voltage(&mut self) -> Result<f32, TraceError> {
        Ok(self.voltage)
    }

    fn core_id(&mut self) -> Result<u32, TraceError> {
        Ok(self.core_id)
    }

    fn leave_state(&mut self) -> Result<(), TraceError> {
        Ok(())
    }

    fn enter_debug_swd(&mut self) -> Result<(), TraceError> {
        self.swd_reentries += 1;
        Ok(())
    }

    fn start_trace_rx(&mut self) -> Result<(), TraceError> {
        self.running = true;
        self.trace_restarts += 1;
        Ok(())
    }

    fn stop_trace_rx(&mut self) -> Result<(), TraceError> {
        self.running = false;
        Ok(())
    }

    fn trace_buffered_count(&mut self) -> Result<usize, TraceError> {
        Ok(self.trace_queue.len())
    }

    fn read_trace_bytes(&mut self) -> Result<Vec<u8>, TraceError> {
        Ok(self.trace_queue.drain(..).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_writes_are_shadowed_verbatim() {
        let mut p = FakeProbe::new();
        p.write_mem32(0xE000_1000, 0x0000_0021).unwrap();
        assert_eq!(p.read_mem32(0xE000_1000).unwrap(), 0x0000_0021);
    }

    #[test]
    fn trace_bytes_round_trip() {
        let mut p = FakeProbe::new();
        p.push_trace_bytes(&[1, 2, 3]);
        assert_eq!(p.trace_buffered_count().unwrap(), 3);
        assert_eq!(p.read_trace_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(p.trace_buffered_count().unwrap(), 0);
    }
}
