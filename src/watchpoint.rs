//! Watchpoint Manager (spec §4.3): programs the four DWT comparators from
//! a requested `DwtEntry` set and knows how to reapply all four
//! (including disabled ones) after a power-loss recovery, since the
//! target's comparator state is lost along with everything else on
//! silicon.
use crate::config::DwtEntry;
use crate::error::TraceError;
use crate::probe::{regs, Probe};

/// Bit layout per spec §4.3: `bit(0)=get_pc | bit(1)=get_data | bit(5)=get_offset`.
/// No base "watchpoint active" bit — `function == 0` is fully disabled.
const DWT_FUNCTION_PC: u32 = 1 << 0;
const DWT_FUNCTION_DATA: u32 = 1 << 1;
const DWT_FUNCTION_OFFSET: u32 = 1 << 5;

/// Owns the four DWT comparator slots and reprograms them on request or
/// after recovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct WatchpointManager {
    entries: [DwtEntry; 4],
}

impl WatchpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, n: usize) -> DwtEntry {
        self.entries[n]
    }

    /// Sets comparator `n` (0..=3) to watch `entry` and programs it on
    /// the target immediately.
    pub fn set_watch(
        &mut self,
        probe: &mut dyn Probe,
        n: usize,
        entry: DwtEntry,
    ) -> Result<(), TraceError> {
        if n > 3 {
            return Err(TraceError::ConfigInvalid(format!(
                "comparator index {} out of range (0..=3)",
                n
            )));
        }
        self.entries[n] = entry;
        self.apply_one(probe, n)
    }

    pub fn disable_watch(&mut self, probe: &mut dyn Probe, n: usize) -> Result<(), TraceError> {
        self.set_watch(probe, n, DwtEntry::disabled())
    }

    /// Reprograms all four comparators, including disabled ones, from
    /// the currently held state. Used after power-loss recovery, where
    /// the target forgot everything.
    pub fn reapply_all(&self, probe: &mut dyn Probe) -> Result<(), TraceError> {
        for n in 0..4 {
            self.apply_one(probe, n)?;
        }
        Ok(())
    }

    fn apply_one(&self, probe: &mut dyn Probe, n: usize) -> Result<(), TraceError> {
        let entry = self.entries[n];
        let n32 = n as u32;

        if !entry.is_enabled() {
            probe.write_mem32(regs::dwt_function(n32), 0)?;
            return Ok(());
        }

        probe.write_mem32(regs::dwt_comp(n32), entry.addr)?;
        probe.write_mem32(regs::dwt_mask(n32), mask_for_size(entry.size))?;

        let mut func = 0u32;
        if entry.get_pc {
            func |= DWT_FUNCTION_PC;
        }
        if entry.get_data {
            func |= DWT_FUNCTION_DATA;
        }
        if entry.get_offset {
            func |= DWT_FUNCTION_OFFSET;
        }
        probe.write_mem32(regs::dwt_function(n32), func)?;
        Ok(())
    }
}

/// `DWT_MASKn` is programmed with `floor(log2(size))`, the number of
/// address bits ignored by the comparator. A size of 0 or 1 watches a
/// single address.
fn mask_for_size(size: u32) -> u32 {
    if size <= 1 {
        0
    } else {
        31 - size.leading_zeros()
    }
}

/// Parses the original tool's single-letter watchpoint flag string
/// (spec §4.3) into a `DwtEntry`'s hardware bits: `d` → `get_data`,
/// `p` → `get_pc`, `o` → `get_offset`. `r`/`w`/`u` are rendering-only
/// flags (§4.7) and carry no hardware meaning here.
pub fn parse_flags(addr: u32, size: u32, flags: &str) -> DwtEntry {
    let entry = DwtEntry {
        addr,
        size,
        get_pc: flags.contains('p'),
        get_offset: flags.contains('o'),
        get_data: flags.contains('d'),
    };
    if entry.is_enabled() {
        entry
    } else {
        DwtEntry::disabled()
    }
}
