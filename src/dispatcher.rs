//! Event Dispatcher (spec §4.7): maps parsed trace events to rendered
//! output. Grounded on the teacher's `sinks::Sink` abstraction — a
//! narrow trait the dispatcher writes formatted lines through, so a
//! periphery can swap a terminal sink for a file or test-capture sink
//! without this module caring.
use std::collections::HashMap;

use crate::parser::{HspKind, TraceEvent};
use crate::symbols::SymbolResolver;
use crate::timestamp::TimestampState;

const CHAN_TIMESTAMP: u8 = 8;
const CHAN_QF_SIG_DISPATCH: u8 = 9;
const CHAN_QF_STATE_ENTRY: u8 = 11;
const OVERFLOW_WARN_EVERY: u32 = 50;

/// Destination for rendered lines. Implemented by the teacher's sink
/// idea, adapted to a single `emit` call rather than a full I/O trait —
/// the dispatcher only ever produces text.
pub trait RenderSink {
    fn emit(&mut self, line: &str);
}

/// A `RenderSink` that simply collects lines, for tests and for any
/// periphery that wants to inspect output before printing it.
#[derive(Debug, Default)]
pub struct CapturingSink {
    pub lines: Vec<String>,
}

impl RenderSink for CapturingSink {
    fn emit(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelDisplayFlags {
    pub display_read: bool,
    pub display_write: bool,
    pub unique: bool,
}

/// Per-DWT-index watch metadata the dispatcher needs for rendering
/// (spec §4.7): the symbol name the watchpoint targets, and the
/// rendering flags from `setup_watch`'s flag string.
#[derive(Debug, Clone, Default)]
pub struct WatchRenderInfo {
    pub dest_symbol: Option<String>,
    pub flags: ChannelDisplayFlags,
    last_printed: Option<u32>,
}

#[derive(Debug, Default)]
struct TextAccumulator {
    line: String,
}

impl TextAccumulator {
    fn push_byte(&mut self, byte: u8) -> Option<String> {
        if byte == b'\n' {
            let flushed = std::mem::take(&mut self.line);
            Some(flushed)
        } else {
            self.line.push(byte as char);
            None
        }
    }
}

/// Consumes `TraceEvent`s and renders them to a `RenderSink`, enriching
/// with the timestamp, gprof histogram and symbol resolver state it
/// owns across the whole session.
pub struct EventDispatcher {
    timestamp: TimestampState,
    text_channels: [TextAccumulator; 8],
    watch_info: [WatchRenderInfo; 4],
    gprof: HashMap<String, u64>,
    overflow_count: u32,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            timestamp: TimestampState::new(),
            text_channels: Default::default(),
            watch_info: Default::default(),
            gprof: HashMap::new(),
            overflow_count: 0,
        }
    }

    pub fn timestamp(&self) -> &TimestampState {
        &self.timestamp
    }

    pub fn gprof_histogram(&self) -> &HashMap<String, u64> {
        &self.gprof
    }

    /// Resets the gprof histogram at the start of a new display epoch
    /// (spec §3 "reset on each display epoch, ≈0.7 s").
    pub fn reset_gprof_epoch(&mut self) {
        self.gprof.clear();
    }

    pub fn set_watch_render_info(&mut self, dwt_index: usize, info: WatchRenderInfo) {
        self.watch_info[dwt_index] = info;
    }

    pub fn dispatch(
        &mut self,
        event: &TraceEvent,
        resolver: &mut SymbolResolver,
        sink: &mut dyn RenderSink,
    ) {
        match event {
            TraceEvent::Overflow => self.dispatch_overflow(sink),
            TraceEvent::Sync => {}
            TraceEvent::DuffByte(_) => {}
            TraceEvent::Sit(sit) => self.dispatch_sit(sit, resolver, sink),
            TraceEvent::Hsp(hsp) => self.dispatch_hsp(hsp, resolver, sink),
        }
    }

    fn dispatch_overflow(&mut self, sink: &mut dyn RenderSink) {
        self.overflow_count += 1;
        if self.overflow_count == OVERFLOW_WARN_EVERY {
            sink.emit(&format!(
                "WARNING: {} trace overflows observed",
                OVERFLOW_WARN_EVERY
            ));
            self.overflow_count = 0;
        }
    }

    fn dispatch_sit(
        &mut self,
        sit: &crate::parser::SitData,
        resolver: &mut SymbolResolver,
        sink: &mut dyn RenderSink,
    ) {
        match sit.chan {
            0..=7 => self.dispatch_text_channel(sit, sink),
            CHAN_TIMESTAMP => self.dispatch_timestamp_channel(sit, sink),
            CHAN_QF_SIG_DISPATCH => self.dispatch_qf_signal(sit, sink),
            CHAN_QF_STATE_ENTRY => self.dispatch_qf_state_entry(sit, resolver, sink),
            _ => {}
        }
    }

    fn dispatch_text_channel(&mut self, sit: &crate::parser::SitData, sink: &mut dyn RenderSink) {
        let acc = &mut self.text_channels[sit.chan as usize];
        match sit.data.len() {
            1 => {
                if let Some(line) = acc.push_byte(sit.data[0]) {
                    sink.emit(&line);
                }
            }
            2 | 4 => {
                acc.line
                    .push_str(&format!("{}(0x{:x})", sit.sum, sit.sum));
            }
            _ => {}
        }
    }

    fn dispatch_timestamp_channel(
        &mut self,
        sit: &crate::parser::SitData,
        sink: &mut dyn RenderSink,
    ) {
        if sit.data.len() == 2 {
            let sample = u16::from_le_bytes([sit.data[0], sit.data[1]]);
            self.timestamp.update16(sample);
            sink.emit(&format!("{}  timer update", self.timestamp.fmt_abs()));
        }
    }

    fn dispatch_qf_signal(&mut self, sit: &crate::parser::SitData, sink: &mut dyn RenderSink) {
        match sit.data.len() {
            1 => {
                self.timestamp.update8(sit.data[0]);
            }
            4 => {
                let ao = sit.data[3];
                let sig = u32::from(sit.data[0])
                    | (u32::from(sit.data[1]) << 8)
                    | (u32::from(sit.data[2]) << 16);
                sink.emit(&format!(
                    "{}  ao sig;  {:02X} -> {:04X}",
                    self.timestamp.fmt_abs(),
                    ao,
                    sig
                ));
            }
            _ => {}
        }
    }

    fn dispatch_qf_state_entry(
        &mut self,
        sit: &crate::parser::SitData,
        resolver: &mut SymbolResolver,
        sink: &mut dyn RenderSink,
    ) {
        if sit.data.len() == 4 {
            let addr = u32::from_le_bytes([sit.data[0], sit.data[1], sit.data[2], sit.data[3]]);
            match resolver.addr_to_name(addr) {
                Some(name) => sink.emit(&format!("QTRAN addr 0x{:08x} {}", addr, name)),
                None => sink.emit(&format!("QTRAN addr 0x{:08x}", addr)),
            }
        }
    }

    fn dispatch_hsp(
        &mut self,
        hsp: &crate::parser::HspData,
        resolver: &mut SymbolResolver,
        sink: &mut dyn RenderSink,
    ) {
        match hsp.kind {
            HspKind::PCSample | HspKind::DataTracePC => {
                let func = resolver.addr_to_function(hsp.value);
                *self.gprof.entry(func.clone()).or_insert(0) += 1;
                sink.emit(&format!("PC: 0x{:08x} # {}", hsp.value, func));
            }
            HspKind::DataTraceData { is_write } => {
                self.dispatch_data_trace(hsp, is_write, resolver, sink);
            }
            HspKind::ExceptionTrace => self.dispatch_exception_trace(hsp, sink),
            _ => {}
        }
    }

    fn dispatch_data_trace(
        &mut self,
        hsp: &crate::parser::HspData,
        is_write: bool,
        resolver: &mut SymbolResolver,
        sink: &mut dyn RenderSink,
    ) {
        let Some(index) = hsp.dwt_index else { return };
        let info = &mut self.watch_info[index as usize];
        if is_write && !info.flags.display_write {
            return;
        }
        if !is_write && !info.flags.display_read {
            return;
        }
        if info.flags.unique && info.last_printed == Some(hsp.value) {
            return;
        }
        info.last_printed = Some(hsp.value);

        let dest = info
            .dest_symbol
            .clone()
            .unwrap_or_else(|| format!("DWT{}", index));
        let arrow = if is_write { "<-" } else { "->" };
        match resolver.addr_to_name(hsp.value) {
            Some(name) => sink.emit(&format!(
                "DWT{}: {} {} 0x{:x} {}",
                index, dest, arrow, hsp.value, name
            )),
            None => sink.emit(&format!("DWT{}: {} {} 0x{:x}", index, dest, arrow, hsp.value)),
        }
    }

    fn dispatch_exception_trace(
        &mut self,
        hsp: &crate::parser::HspData,
        sink: &mut dyn RenderSink,
    ) {
        let bytes = hsp.value.to_le_bytes();
        let byte0 = bytes[0];
        let byte1 = bytes[1];
        let exc_num = u16::from(byte0) | (u16::from(byte1 & 0x1) << 8);
        let func_code = (byte1 >> 4) & 0x3;
        let func_name = match func_code {
            0 => "RESERVED",
            1 => "ENTER",
            2 => "EXIT",
            3 => "RE-ENTER",
            _ => unreachable!(),
        };
        sink.emit(&format!("EXC: {}: {}", exc_num as i32 - 16, func_name));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::{feed_all, TpiuParser};

    #[test]
    fn text_channel_flushes_on_newline() {
        let mut parser = TpiuParser::new();
        let events = feed_all(&mut parser, &[0x01, b'H', 0x01, b'i', 0x01, b'\n']).unwrap();
        let mut dispatcher = EventDispatcher::new();
        let mut resolver = SymbolResolver::new();
        let mut sink = CapturingSink::default();
        for ev in &events {
            dispatcher.dispatch(ev, &mut resolver, &mut sink);
        }
        assert_eq!(sink.lines, vec!["Hi".to_string()]);
    }

    #[test]
    fn two_byte_sit_appends_decimal_and_hex() {
        let mut parser = TpiuParser::new();
        let events = feed_all(&mut parser, &[0x12, 0x2A, 0x01]).unwrap();
        let mut dispatcher = EventDispatcher::new();
        let mut resolver = SymbolResolver::new();
        let mut sink = CapturingSink::default();
        for ev in &events {
            dispatcher.dispatch(ev, &mut resolver, &mut sink);
        }
        assert_eq!(dispatcher.text_channels[2].line, "298(0x12a)");
    }

    #[test]
    fn overflow_warns_on_the_fiftieth_and_resets() {
        let mut dispatcher = EventDispatcher::new();
        let mut resolver = SymbolResolver::new();
        let mut sink = CapturingSink::default();
        for _ in 0..51 {
            dispatcher.dispatch(&TraceEvent::Overflow, &mut resolver, &mut sink);
        }
        assert_eq!(sink.lines.len(), 1);
        assert!(sink.lines[0].contains("50"));
    }

    #[test]
    fn data_trace_unique_flag_suppresses_repeat() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.set_watch_render_info(
            1,
            WatchRenderInfo {
                dest_symbol: Some("counter".into()),
                flags: ChannelDisplayFlags {
                    display_read: true,
                    display_write: true,
                    unique: true,
                },
                last_printed: None,
            },
        );
        let mut resolver = SymbolResolver::new();
        let mut sink = CapturingSink::default();
        let hsp = crate::parser::HspData {
            kind: HspKind::DataTraceData { is_write: true },
            dwt_index: Some(1),
            value: 0x1234,
        };
        dispatcher.dispatch(&TraceEvent::Hsp(hsp), &mut resolver, &mut sink);
        dispatcher.dispatch(&TraceEvent::Hsp(hsp), &mut resolver, &mut sink);
        assert_eq!(sink.lines.len(), 1);
        assert!(sink.lines[0].contains("counter"));
    }

    #[test]
    fn qf_state_entry_appends_resolved_symbol() {
        let mut dispatcher = EventDispatcher::new();
        let mut resolver = SymbolResolver::new();
        resolver.insert_for_test(0x0800_1000, "s_running");
        let mut sink = CapturingSink::default();
        let sit = crate::parser::SitData {
            chan: 11,
            expected_len: 4,
            data: 0x0800_1000u32.to_le_bytes().to_vec(),
            sum: 0x0800_1000,
        };
        dispatcher.dispatch(&TraceEvent::Sit(sit), &mut resolver, &mut sink);
        assert_eq!(sink.lines[0], "QTRAN addr 0x08001000 s_running");
    }

    #[test]
    fn qf_state_entry_omits_symbol_when_unresolved() {
        let mut dispatcher = EventDispatcher::new();
        let mut resolver = SymbolResolver::new();
        let mut sink = CapturingSink::default();
        let sit = crate::parser::SitData {
            chan: 11,
            expected_len: 4,
            data: 0x0800_1000u32.to_le_bytes().to_vec(),
            sum: 0x0800_1000,
        };
        dispatcher.dispatch(&TraceEvent::Sit(sit), &mut resolver, &mut sink);
        assert_eq!(sink.lines[0], "QTRAN addr 0x08001000");
    }

    #[test]
    fn data_trace_appends_resolved_symbol_for_value() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.set_watch_render_info(
            0,
            WatchRenderInfo {
                dest_symbol: Some("counter".into()),
                flags: ChannelDisplayFlags {
                    display_read: true,
                    display_write: false,
                    unique: false,
                },
                last_printed: None,
            },
        );
        let mut resolver = SymbolResolver::new();
        resolver.insert_for_test(0x0800_2010, "isr_handler");
        let mut sink = CapturingSink::default();
        let hsp = crate::parser::HspData {
            kind: HspKind::DataTraceData { is_write: false },
            dwt_index: Some(0),
            value: 0x0800_2010,
        };
        dispatcher.dispatch(&TraceEvent::Hsp(hsp), &mut resolver, &mut sink);
        assert_eq!(sink.lines[0], "DWT0: counter -> 0x8002010 isr_handler");
    }

    #[test]
    fn exception_trace_decodes_function_code() {
        let mut dispatcher = EventDispatcher::new();
        let mut resolver = SymbolResolver::new();
        let mut sink = CapturingSink::default();
        // byte1 bits [5:4] = 1 (ENTER), exc_num low byte = 15
        let hsp = crate::parser::HspData {
            kind: HspKind::ExceptionTrace,
            dwt_index: None,
            value: u32::from_le_bytes([15, 0b0001_0000, 0, 0]),
        };
        dispatcher.dispatch(&TraceEvent::Hsp(hsp), &mut resolver, &mut sink);
        assert_eq!(sink.lines[0], "EXC: -1: ENTER");
    }
}
