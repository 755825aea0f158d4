//! SWO Pump (spec §4.4): a worker, logically parallel to the parser,
//! that drains raw SWO bytes from the probe under backpressure and
//! power-cycle conditions. Grounded on the teacher's producer/consumer
//! shape in `sources::probe` — a dedicated thread pushing blocks onto a
//! bounded `crossbeam_channel`, the caller draining with a timeout.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::configurator::TraceConfigurator;
use crate::error::TraceError;
use crate::probe::Probe;
use crate::watchpoint::WatchpointManager;

/// Recommended queue depth (spec §9: "≈1 s of traffic at 2 Mbaud").
pub const QUEUE_CAPACITY: usize = 256;

const STALL_KICK_THRESHOLD: u32 = 100;
const LOW_VOLTAGE_THRESHOLD: f32 = 1.0;
const RECOVERED_VOLTAGE_THRESHOLD: f32 = 3.0;
const RECOVERY_SETTLE: Duration = Duration::from_millis(100);
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Idle,
    Running,
    Stopping,
}

/// Parameters the pump replays against the probe when it recovers from
/// a power cycle: it must redo everything the caller did before
/// `start()`, since the target forgot all of it.
#[derive(Clone)]
pub struct RecoveryContext {
    pub configurator: TraceConfigurator,
    pub watchpoints: WatchpointManager,
    pub xtal_mhz: u32,
    pub baud_hz: u32,
}

/// Drives one probe's trace FIFO from a dedicated thread, pushing byte
/// blocks onto a bounded channel the parser drains on the caller's
/// thread (spec §5: two cooperating units, one shared FIFO).
pub struct SwoPump {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    receiver: Receiver<Vec<u8>>,
}

impl SwoPump {
    /// Spawns the worker thread. `probe` must already be configured and
    /// have SWO reception started by the caller before this is called
    /// (spec §5 probe exclusivity: only `stop`/`read_trace` after this
    /// point).
    pub fn start<P>(mut probe: P, recovery: RecoveryContext) -> Self
    where
        P: Probe + Send + 'static,
    {
        let (tx, rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) =
            crossbeam_channel::bounded(QUEUE_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = shutdown.clone();

        let handle = std::thread::spawn(move || {
            run_pump_loop(&mut probe, recovery, &tx, &worker_shutdown);
        });

        Self {
            shutdown,
            handle: Some(handle),
            receiver: rx,
        }
    }

    /// Signals the worker to stop after its current iteration and
    /// blocks until it has (spec §5: observe the flag, don't kill the
    /// thread mid-write).
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Dequeues the next block, waiting up to `DEQUEUE_TIMEOUT` (spec
    /// §5). Returns `None` on timeout, meaning the caller should yield.
    pub fn read_block(&self) -> Option<Vec<u8>> {
        self.receiver.recv_timeout(DEQUEUE_TIMEOUT).ok()
    }
}

impl Drop for SwoPump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_pump_loop<P: Probe>(
    probe: &mut P,
    mut recovery: RecoveryContext,
    tx: &Sender<Vec<u8>>,
    shutdown: &AtomicBool,
) {
    let mut stall_count: u32 = 0;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match probe.target_voltage() {
            Ok(voltage) if voltage < LOW_VOLTAGE_THRESHOLD => {
                if recover_from_power_loss(probe, &mut recovery).is_err() {
                    break;
                }
                stall_count = 0;
                continue;
            }
            Err(_) => break,
            _ => {}
        }

        let count = match probe.trace_buffered_count() {
            Ok(c) => c,
            Err(_) => break,
        };

        if count == 0 {
            stall_count += 1;
            if stall_count > STALL_KICK_THRESHOLD {
                if kick(probe).is_err() {
                    break;
                }
                stall_count = 0;
            }
            continue;
        }

        stall_count = 0;
        let block = match probe.read_trace_bytes() {
            Ok(b) => b,
            Err(_) => break,
        };
        if tx.send(block).is_err() {
            break;
        }
    }

    let _ = probe.stop_trace_rx();
}

fn recover_from_power_loss<P: Probe>(
    probe: &mut P,
    recovery: &mut RecoveryContext,
) -> Result<(), TraceError> {
    crate::log::warn("target power loss detected, waiting for recovery".into());
    loop {
        match probe.target_voltage() {
            Ok(v) if v >= RECOVERED_VOLTAGE_THRESHOLD => break,
            Ok(_) => continue,
            Err(e) => return Err(e),
        }
    }
    std::thread::sleep(RECOVERY_SETTLE);

    probe.leave_state()?;
    probe.enter_debug_swd()?;

    let cfg = crate::config::TraceConfig::new(recovery.xtal_mhz, recovery.baud_hz)?;
    recovery.configurator.setup(probe, &cfg)?;
    recovery.watchpoints.reapply_all(probe)?;
    probe.start_trace_rx()?;

    crate::log::status("Recovered", "target power restored, trace reception resumed".into());
    Ok(())
}

fn kick<P: Probe>(probe: &mut P) -> Result<(), TraceError> {
    crate::log::warn("SWO FIFO stalled, kicking trace reception".into());
    probe.stop_trace_rx()?;
    probe.start_trace_rx()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::FakeProbe;

    fn recovery_context() -> RecoveryContext {
        RecoveryContext {
            configurator: TraceConfigurator::new(),
            watchpoints: WatchpointManager::new(),
            xtal_mhz: 72,
            baud_hz: 2_000_000,
        }
    }

    #[test]
    fn stall_kick_fires_after_101_empty_reads() {
        let mut probe = FakeProbe::new();
        probe.set_voltage(3.3);

        let mut stall_count: u32 = 0;
        for _ in 0..101 {
            let count = probe.trace_buffered_count().unwrap();
            assert_eq!(count, 0);
            stall_count += 1;
            if stall_count > STALL_KICK_THRESHOLD {
                kick(&mut probe).unwrap();
                stall_count = 0;
            }
        }
        assert_eq!(probe.trace_restarts, 1);
    }

    #[test]
    fn power_loss_recovery_replays_setup_and_watchpoints() {
        let mut probe = FakeProbe::new();
        let mut recovery = recovery_context();
        // Voltage already back above threshold so the spin loop in
        // recover_from_power_loss exits on its first check.
        probe.set_voltage(3.3);
        recover_from_power_loss(&mut probe, &mut recovery).unwrap();
        assert_eq!(probe.swd_reentries, 1);
        assert!(probe.is_running());
    }
}
