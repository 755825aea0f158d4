//! Trace Configurator (spec §4.2): programs the target's ITM/TPIU/DWT
//! registers for asynchronous SWO and owns the DWT_CTRL shadow (spec §3,
//! §9 "shadow-register pattern" — the shadow is the only source of truth;
//! never add a read-back of DWT_CTRL, it would race the live trace
//! stream).
use crate::config::TraceConfig;
use crate::error::TraceError;
use crate::probe::{regs, Probe};

const ITM_UNLOCK_KEY: u32 = 0xC5AC_CE55;

const DWT_CTRL_EXCEPTION_TRACE_BIT: u32 = 1 << 16;
const DWT_CTRL_PCSAMPLE_BIT: u32 = 1 << 12;
const DWT_CTRL_CYCTAP_BIT: u32 = 1 << 9;
const DWT_CTRL_CYCCNTENA_BIT: u32 = 1;
const DWT_CTRL_POSTINIT_SHIFT: u32 = 1;
const DWT_CTRL_POSTINIT_MASK: u32 = 0xF << DWT_CTRL_POSTINIT_SHIFT;

/// Programs the target debug block and owns the `DWT_CTRL` shadow word.
#[derive(Clone, Copy)]
pub struct TraceConfigurator {
    dwt_ctrl_shadow: u32,
}

impl Default for TraceConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceConfigurator {
    pub fn new() -> Self {
        Self { dwt_ctrl_shadow: 0 }
    }

    pub fn dwt_ctrl_shadow(&self) -> u32 {
        self.dwt_ctrl_shadow
    }

    /// Programs the fixed register sequence from spec §6. Idempotent:
    /// calling it twice in a row reproduces the same register state.
    pub fn setup(&mut self, probe: &mut dyn Probe, cfg: &TraceConfig) -> Result<(), TraceError> {
        cfg.validate()?;

        probe.write_mem32(regs::DEMCR, 0x0100_0000)?;
        probe.write_mem32(regs::TPIU_SELECTOR, 0x0000_0001)?;
        probe.write_mem32(regs::TPIU_ACPR, cfg.acpr_divisor())?;
        probe.write_mem32(regs::TPIU_SPPR, 0x0000_0002)?;
        probe.write_mem32(regs::TPIU_FFCR, 0x0000_0100)?;
        probe.write_mem32(regs::DBGMCU, 0x0000_0327)?;

        probe.write_mem32(regs::ITM_LAR, ITM_UNLOCK_KEY)?;
        probe.write_mem32(regs::ITM_TCR, 0x0001_0009)?;

        // Enable all 32 stimulus ports.
        probe.write_mem32(regs::ITM_TER, 0xFFFF_FFFF)?;
        for port_word in 1..8 {
            probe.write_mem32(regs::ITM_TER + 4 * port_word, 0x0000_0000)?;
        }

        // Clear FPB comparators.
        for n in 0..8 {
            probe.write_mem32(regs::FPB_COMP0 + 4 * n, 0x0000_0000)?;
        }

        // Clear DWT function registers (all four comparators disabled).
        for n in 0..4 {
            probe.write_mem32(regs::dwt_function(n), 0x0000_0000)?;
        }

        probe.write_mem32(regs::DBGMCU, 0x0000_0327)?;

        self.dwt_ctrl_shadow = 0;
        self.apply_dwt_ctrl(probe)?;

        Ok(())
    }

    pub fn set_exception_tracing(
        &mut self,
        probe: &mut dyn Probe,
        on: bool,
    ) -> Result<(), TraceError> {
        if on {
            self.dwt_ctrl_shadow |= DWT_CTRL_EXCEPTION_TRACE_BIT;
        } else {
            self.dwt_ctrl_shadow &= !DWT_CTRL_EXCEPTION_TRACE_BIT;
        }
        self.apply_dwt_ctrl(probe)
    }

    pub fn set_profiling(
        &mut self,
        probe: &mut dyn Probe,
        on: bool,
        reload: u8,
    ) -> Result<(), TraceError> {
        if on {
            self.dwt_ctrl_shadow |= DWT_CTRL_PCSAMPLE_BIT;
            self.dwt_ctrl_shadow |= DWT_CTRL_CYCTAP_BIT;
            self.dwt_ctrl_shadow &= !DWT_CTRL_POSTINIT_MASK;
            self.dwt_ctrl_shadow |= (u32::from(reload) & 0xF) << DWT_CTRL_POSTINIT_SHIFT;
            self.dwt_ctrl_shadow |= DWT_CTRL_CYCCNTENA_BIT;
        } else {
            self.dwt_ctrl_shadow &= !DWT_CTRL_CYCCNTENA_BIT;
            self.dwt_ctrl_shadow &= !DWT_CTRL_PCSAMPLE_BIT;
        }
        self.apply_dwt_ctrl(probe)
    }

    /// Writes the full shadow word to `DWT_CTRL`. No read-modify-write:
    /// the shadow is authoritative (§9).
    pub fn apply_dwt_ctrl(&self, probe: &mut dyn Probe) -> Result<(), TraceError> {
        probe.write_mem32(regs::DWT_CTRL, self.dwt_ctrl_shadow)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::FakeProbe;

    #[test]
    fn setup_writes_acpr_from_config() {
        let mut probe = FakeProbe::new();
        let mut configurator = TraceConfigurator::new();
        let cfg = TraceConfig::new(72, 2_000_000).unwrap();
        configurator.setup(&mut probe, &cfg).unwrap();
        assert_eq!(probe.reg(regs::TPIU_ACPR), 35);
        assert_eq!(probe.reg(regs::ITM_LAR), ITM_UNLOCK_KEY);
        assert_eq!(probe.reg(regs::DEMCR), 0x0100_0000);
    }

    #[test]
    fn shadow_matches_register_after_every_call() {
        let mut probe = FakeProbe::new();
        let mut configurator = TraceConfigurator::new();
        configurator.set_exception_tracing(&mut probe, true).unwrap();
        assert_eq!(configurator.dwt_ctrl_shadow(), probe.reg(regs::DWT_CTRL));

        configurator.set_profiling(&mut probe, true, 15).unwrap();
        assert_eq!(configurator.dwt_ctrl_shadow(), probe.reg(regs::DWT_CTRL));
        assert_eq!(configurator.dwt_ctrl_shadow() & 0x1, 1);
        assert_eq!(configurator.dwt_ctrl_shadow() & (1 << 12), 1 << 12);

        configurator.set_profiling(&mut probe, false, 15).unwrap();
        assert_eq!(configurator.dwt_ctrl_shadow() & 0x1, 0);
        assert_eq!(configurator.dwt_ctrl_shadow() & (1 << 12), 0);
        // exception tracing bit untouched by the profiling off-path
        assert_eq!(
            configurator.dwt_ctrl_shadow() & DWT_CTRL_EXCEPTION_TRACE_BIT,
            DWT_CTRL_EXCEPTION_TRACE_BIT
        );
    }
}
