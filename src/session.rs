//! Public session API (spec §6). Wires Configurator, Watchpoint
//! Manager, Pump, Parser and Dispatcher together behind the surface a
//! periphery (CLI/TUI) is expected to drive.
use crate::config::{DwtEntry, TraceConfig};
use crate::configurator::TraceConfigurator;
use crate::dispatcher::{EventDispatcher, RenderSink};
use crate::error::TraceError;
use crate::parser::{TpiuParser, TraceEvent};
use crate::probe::Probe;
use crate::pump::{RecoveryContext, SwoPump};
use crate::symbols::SymbolResolver;
use crate::watchpoint::{self, WatchpointManager};

/// Top-level handle a periphery opens once per debug session.
///
/// `Session` owns the probe until `start()` hands it to the `SwoPump`
/// worker thread; from then on only `stop()` and `read_block()` may
/// touch it (spec §5 probe exclusivity).
pub struct Session<P: Probe + Send + 'static> {
    probe: Option<P>,
    configurator: TraceConfigurator,
    watchpoints: WatchpointManager,
    resolver: SymbolResolver,
    parser: TpiuParser,
    dispatcher: EventDispatcher,
    cfg: TraceConfig,
    pump: Option<SwoPump>,
}

impl<P: Probe + Send + 'static> Session<P> {
    /// Opens a session against `probe`, programming the target debug
    /// block for the given crystal/baud pair (spec §4.2 `setup`).
    pub fn open(mut probe: P, xtal_mhz: u32, baud_hz: u32) -> Result<Self, TraceError> {
        let cfg = TraceConfig::new(xtal_mhz, baud_hz)?;
        let mut configurator = TraceConfigurator::new();
        configurator.setup(&mut probe, &cfg)?;

        Ok(Self {
            probe: Some(probe),
            configurator,
            watchpoints: WatchpointManager::new(),
            resolver: SymbolResolver::new(),
            parser: TpiuParser::new(),
            dispatcher: EventDispatcher::new(),
            cfg,
            pump: None,
        })
    }

    pub fn load_image(&mut self, path: &std::path::Path) {
        self.resolver.load_image(path);
    }

    /// Programs comparator `idx` (0..=3) per spec §4.3's `setup_watch`
    /// helper: explicit `addr`/`size` override symbol-table lookup.
    pub fn set_watch(
        &mut self,
        idx: usize,
        symbol: Option<&str>,
        addr: Option<u32>,
        size: Option<u32>,
        flags: &str,
    ) -> Result<(), TraceError> {
        let (resolved_addr, resolved_size) =
            crate::symbols::resolve_watch_target(&self.resolver, symbol, addr, size);
        let entry = watchpoint::parse_flags(resolved_addr, resolved_size, flags);
        let probe = self.probe.as_mut().ok_or(TraceError::ProbeUnavailable)?;
        self.watchpoints.set_watch(probe, idx, entry)?;

        let info = crate::dispatcher::WatchRenderInfo {
            dest_symbol: symbol.map(String::from).or_else(|| {
                addr.and_then(|a| self.resolver.addr_to_name(a).map(String::from))
            }),
            flags: crate::dispatcher::ChannelDisplayFlags {
                display_read: flags.contains('r'),
                display_write: flags.contains('w'),
                unique: flags.contains('u'),
            },
            ..Default::default()
        };
        self.dispatcher.set_watch_render_info(idx, info);
        Ok(())
    }

    pub fn dwt_entry(&self, idx: usize) -> DwtEntry {
        self.watchpoints.entry(idx)
    }

    pub fn set_exception_tracing(&mut self, on: bool) -> Result<(), TraceError> {
        let probe = self.probe.as_mut().ok_or(TraceError::ProbeUnavailable)?;
        self.configurator.set_exception_tracing(probe, on)
    }

    pub fn set_profiling(&mut self, on: bool, reload: u8) -> Result<(), TraceError> {
        let probe = self.probe.as_mut().ok_or(TraceError::ProbeUnavailable)?;
        self.configurator.set_profiling(probe, on, reload)
    }

    /// Starts SWO reception and hands the probe to the pump worker
    /// thread. After this call the probe may only be reached through
    /// `stop()`/`read_block()`.
    pub fn start(&mut self) -> Result<(), TraceError> {
        let mut probe = self.probe.take().ok_or(TraceError::ProbeUnavailable)?;
        probe.start_trace_rx()?;

        let recovery = RecoveryContext {
            configurator: self.configurator,
            watchpoints: self.watchpoints,
            xtal_mhz: self.cfg.xtal_mhz,
            baud_hz: self.cfg.baud_hz,
        };
        self.pump = Some(SwoPump::start(probe, recovery));
        Ok(())
    }

    /// Blocks (up to the pump's dequeue timeout) for the next block of
    /// raw SWO bytes, parsing and dispatching every completed frame.
    pub fn read_block(&mut self, sink: &mut dyn RenderSink) -> Option<Vec<TraceEvent>> {
        let pump = self.pump.as_ref()?;
        let block = pump.read_block()?;
        let mut events = Vec::new();
        for byte in block {
            if let Some(event) = self.parser.feed(byte) {
                self.dispatcher.dispatch(&event, &mut self.resolver, sink);
                events.push(event);
            }
        }
        Some(events)
    }

    /// Stops the pump and releases the probe back to this `Session`.
    pub fn stop(&mut self) {
        if let Some(mut pump) = self.pump.take() {
            pump.stop();
        }
    }

    pub fn core_id(&mut self) -> Result<u32, TraceError> {
        self.probe
            .as_mut()
            .ok_or(TraceError::ProbeUnavailable)?
            .core_id()
    }

    pub fn target_voltage(&mut self) -> Result<f32, TraceError> {
        self.probe
            .as_mut()
            .ok_or(TraceError::ProbeUnavailable)?
            .target_voltage()
    }
}
