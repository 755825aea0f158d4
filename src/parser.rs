//! TPIU/ITM byte-stream parser (spec §4.5). The original tool modeled
//! this as three polymorphic state objects with virtual dispatch; here
//! it's a single tagged enum discriminant (spec §9 Design Note) so
//! advancing the machine is one allocation-free match per byte.
use crate::error::TraceError;

/// Accumulates a Software Instrumentation Trace payload as it streams in.
#[derive(Debug, Clone, Default)]
pub struct SitData {
    pub chan: u8,
    pub expected_len: usize,
    pub data: Vec<u8>,
    pub sum: u32,
}

impl SitData {
    fn new(chan: u8, expected_len: usize) -> Self {
        Self {
            chan,
            expected_len,
            data: Vec::with_capacity(expected_len),
            sum: 0,
        }
    }

    fn add_byte(&mut self, byte: u8) {
        self.sum += (byte as u32) << (8 * self.data.len());
        self.data.push(byte);
    }
}

/// Subtype of a completed Hardware Source Packet (spec §3/§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HspKind {
    EventCount,
    ExceptionTrace,
    PCSample,
    DataTracePC,
    DataTraceOffset,
    DataTraceData { is_write: bool },
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct HspData {
    pub kind: HspKind,
    pub dwt_index: Option<u8>,
    pub value: u32,
}

/// One decoded wire event. `DuffByte` covers both the spec's
/// protocol-reserved header bytes and any other unclassifiable byte.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    Overflow,
    Sync,
    DuffByte(u8),
    Sit(SitData),
    Hsp(HspData),
}

/// The parser's internal state, held as data rather than as a trait
/// object (spec §9).
#[derive(Debug, Clone)]
enum ParserState {
    WaitingForHeader,
    SoftwareBody { sit: SitData, remaining: usize },
    HardwareBody { disc: u8, len: usize, acc: Vec<u8> },
}

/// Byte-fed TPIU state machine. One instance processes one byte stream;
/// it is not `Sync` and carries no I/O of its own.
pub struct TpiuParser {
    state: ParserState,
    sync_hardening: bool,
    zero_run: u8,
}

impl Default for TpiuParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TpiuParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::WaitingForHeader,
            sync_hardening: false,
            zero_run: 0,
        }
    }

    /// Enables the resync hardening described in spec §9's open
    /// question: five consecutive zero bytes followed by `0x80` always
    /// emit a `Sync` event and force the machine to `WaitingForHeader`,
    /// regardless of where per-byte header classification would
    /// otherwise have left it. Off by default, matching the original
    /// tool's behavior of only ever resyncing from the header state.
    pub fn with_sync_hardening(mut self) -> Self {
        self.sync_hardening = true;
        self
    }

    /// Feeds one byte, returning a completed event if the byte finished
    /// a frame, or `None` if more bytes are needed.
    pub fn feed(&mut self, byte: u8) -> Option<TraceEvent> {
        if self.sync_hardening {
            if byte == 0x00 {
                self.zero_run += 1;
            } else {
                if self.zero_run >= 5 && byte == 0x80 {
                    self.state = ParserState::WaitingForHeader;
                    self.zero_run = 0;
                    return Some(TraceEvent::Sync);
                }
                self.zero_run = 0;
            }
        }
        match std::mem::replace(&mut self.state, ParserState::WaitingForHeader) {
            ParserState::WaitingForHeader => self.on_header_byte(byte),
            ParserState::SoftwareBody { mut sit, remaining } => {
                sit.add_byte(byte);
                let remaining = remaining - 1;
                if remaining == 0 {
                    self.state = ParserState::WaitingForHeader;
                    Some(TraceEvent::Sit(sit))
                } else {
                    self.state = ParserState::SoftwareBody { sit, remaining };
                    None
                }
            }
            ParserState::HardwareBody { disc, len, mut acc } => {
                acc.push(byte);
                if acc.len() == len {
                    self.state = ParserState::WaitingForHeader;
                    Some(TraceEvent::Hsp(classify_hsp(disc, &acc)))
                } else {
                    self.state = ParserState::HardwareBody { disc, len, acc };
                    None
                }
            }
        }
    }

    fn on_header_byte(&mut self, byte: u8) -> Option<TraceEvent> {
        if byte == 0x70 {
            self.state = ParserState::WaitingForHeader;
            return Some(TraceEvent::Overflow);
        }
        if byte & 0x7f == 0x00 {
            self.state = ParserState::WaitingForHeader;
            return Some(TraceEvent::Sync);
        }
        if byte & 0x03 != 0x00 {
            let size = (1usize << (2 + (byte & 0x03))) >> 3;
            if byte & 0x04 == 0x04 {
                let disc = (byte >> 3) & 0x1f;
                self.state = ParserState::HardwareBody {
                    disc,
                    len: size,
                    acc: Vec::with_capacity(size),
                };
            } else {
                let chan = (byte >> 3) & 0x1f;
                self.state = ParserState::SoftwareBody {
                    sit: SitData::new(chan, size),
                    remaining: size,
                };
            }
            return None;
        }
        // (byte & 0x03) == 0 && (byte & 0x04) == 0: protocol-reserved.
        self.state = ParserState::WaitingForHeader;
        Some(TraceEvent::DuffByte(byte))
    }

    /// `true` exactly when a frame just completed and no partial state
    /// is being held (spec §8 invariant).
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ParserState::WaitingForHeader)
    }
}

fn little_endian_value(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)))
}

fn classify_hsp(disc: u8, bytes: &[u8]) -> HspData {
    let value = little_endian_value(bytes);
    match disc {
        0 => HspData {
            kind: HspKind::EventCount,
            dwt_index: None,
            value,
        },
        1 => HspData {
            kind: HspKind::ExceptionTrace,
            dwt_index: None,
            value,
        },
        2 => HspData {
            kind: HspKind::PCSample,
            dwt_index: None,
            value,
        },
        8..=23 => {
            let packet_type = (disc >> 3) & 0x3;
            let dwt_index = (disc >> 1) & 0x3;
            let subtype = disc & 0x1;
            let kind = match packet_type {
                1 => {
                    if subtype == 1 {
                        HspKind::DataTraceOffset
                    } else {
                        HspKind::DataTracePC
                    }
                }
                2 => HspKind::DataTraceData {
                    is_write: subtype == 1,
                },
                _ => HspKind::Unknown,
            };
            HspData {
                kind,
                dwt_index: Some(dwt_index),
                value,
            }
        }
        _ => HspData {
            kind: HspKind::Unknown,
            dwt_index: None,
            value,
        },
    }
}

/// Runs every byte of `bytes` through `parser`, returning completed
/// events in wire order. Never fails (spec §7: the parser never fails).
pub fn feed_all(parser: &mut TpiuParser, bytes: &[u8]) -> Result<Vec<TraceEvent>, TraceError> {
    Ok(bytes.iter().filter_map(|&b| parser.feed(b)).collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn text_output_on_channel_zero() {
        let mut p = TpiuParser::new();
        let events = feed_all(&mut p, &[0x01, b'H', 0x01, b'i', 0x01, b'\n']).unwrap();
        assert_eq!(events.len(), 3);
        for ev in &events {
            match ev {
                TraceEvent::Sit(sit) => assert_eq!(sit.chan, 0),
                _ => panic!("expected SIT events"),
            }
        }
        assert!(p.is_idle());
    }

    #[test]
    fn two_byte_sit_on_channel_two() {
        let mut p = TpiuParser::new();
        let events = feed_all(&mut p, &[0x12, 0x2A, 0x01]).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            TraceEvent::Sit(sit) => {
                assert_eq!(sit.chan, 2);
                assert_eq!(sit.sum, 0x012A);
                assert_eq!(sit.data, vec![0x2A, 0x01]);
            }
            _ => panic!("expected SIT"),
        }
    }

    #[test]
    fn pc_sample_hsp() {
        let mut p = TpiuParser::new();
        let events = feed_all(&mut p, &[0x17, 0x10, 0x20, 0x00, 0x08]).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            TraceEvent::Hsp(hsp) => {
                assert_eq!(hsp.kind, HspKind::PCSample);
                assert_eq!(hsp.value, 0x0800_2010);
            }
            _ => panic!("expected HSP"),
        }
    }

    #[test]
    fn data_trace_write_on_dwt1() {
        // disc = packetType(2)<<3 | dwt_index(1)<<1 | subtype(write=1) = 0x13
        let header = 0x04 | 0x03 | (0x13 << 3); // size nibble=3(4 bytes), hw bit set
        let mut p = TpiuParser::new();
        let events = feed_all(&mut p, &[header, 0x34, 0x12, 0x00, 0x00]).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            TraceEvent::Hsp(hsp) => {
                assert_eq!(hsp.kind, HspKind::DataTraceData { is_write: true });
                assert_eq!(hsp.dwt_index, Some(1));
                assert_eq!(hsp.value, 0x1234);
            }
            _ => panic!("expected HSP"),
        }
    }

    #[test]
    fn reserved_size_zero_header_emits_duff_byte() {
        let mut p = TpiuParser::new();
        let events = feed_all(&mut p, &[0x04]).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TraceEvent::DuffByte(0x04)));
        assert!(p.is_idle());
    }

    #[test]
    fn overflow_byte_is_recognised_every_time() {
        let mut p = TpiuParser::new();
        let events = feed_all(&mut p, &[0x70; 5]).unwrap();
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| matches!(e, TraceEvent::Overflow)));
    }

    #[test]
    fn sync_hardening_recognises_the_canonical_pattern() {
        let mut p = TpiuParser::new().with_sync_hardening();
        // header 0x0B opens a 4-byte software body; the zero run below
        // completes that frame (3 zero bytes) and continues into the
        // canonical five-zero-then-0x80 resync pattern.
        let events = feed_all(&mut p, &[0x0B, 0xAA, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80]).unwrap();
        assert!(events.iter().any(|e| matches!(e, TraceEvent::Sync)));
        assert!(p.is_idle());
    }

    #[test]
    fn sync_hardening_off_by_default_still_classifies_zero_bytes_as_sync() {
        let mut p = TpiuParser::new();
        let events = feed_all(&mut p, &[0x00, 0x00, 0x00, 0x00, 0x00, 0x80]).unwrap();
        // every byte here has (byte & 0x7f) == 0, so each is classified
        // as Sync one at a time by the base header path regardless of
        // hardening.
        assert_eq!(events.len(), 6);
        assert!(events.iter().all(|e| matches!(e, TraceEvent::Sync)));
    }

    #[test]
    fn parser_returns_to_waiting_after_every_complete_frame() {
        let mut p = TpiuParser::new();
        feed_all(&mut p, &[0x12, 0x2A, 0x01]).unwrap();
        assert!(p.is_idle());
    }
}
