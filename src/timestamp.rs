//! Tracks the target's free-running 50us timer from ITM timestamp
//! packets (spec §4.6). Ported bit-for-bit from the original tool's
//! `TimeStamp.update8`/`update16` — including its known limitation that
//! an `update8` call can only ever recover one modulo-256 wrap per call,
//! so a timestamp gap of more than 256 ticks between two consecutive
//! 8-bit updates silently loses the missed multiples of 256. This is
//! preserved rather than fixed (see DESIGN.md's Open Questions).
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampState {
    /// Continuously incrementing count of 50us ticks.
    time_50us: u64,
    last_diff: u64,
}

impl TimestampState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_50us(&self) -> u64 {
        self.time_50us
    }

    pub fn last_diff(&self) -> u64 {
        self.last_diff
    }

    /// Advances the clock using an 8-bit (LSB-only) timer sample.
    pub fn update8(&mut self, sample: u8) {
        let current_lsb = self.time_50us & 0xff;
        let diff = (u64::from(sample).wrapping_sub(current_lsb)) % 0x100;
        self.last_diff = diff;
        self.time_50us += diff;
    }

    /// Advances the clock using a 16-bit timer sample.
    pub fn update16(&mut self, sample: u16) {
        let current_lsb = self.time_50us & 0xffff;
        let diff = (u64::from(sample).wrapping_sub(current_lsb)) % 0x10000;
        self.last_diff = diff;
        self.time_50us += diff;
        if self.time_50us == self.last_diff {
            // first update since reset: not a real elapsed interval.
            self.last_diff = 0;
        }
    }

    pub fn fmt_null() -> String {
        "[---.------]".to_string()
    }

    pub fn fmt_abs(&self) -> String {
        let time_us = self.time_50us * 50;
        format!("[{:03}.{:06}]", time_us / 1_000_000, time_us % 1_000_000)
    }

    pub fn fmt_diff(&self) -> String {
        format!("[   +{:06}]", self.last_diff * 50)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn update8_advances_by_modular_diff() {
        let mut ts = TimestampState::new();
        ts.update8(10);
        assert_eq!(ts.time_50us(), 10);
        assert_eq!(ts.last_diff(), 10);

        ts.update8(12);
        assert_eq!(ts.time_50us(), 12);
        assert_eq!(ts.last_diff(), 2);
    }

    #[test]
    fn update8_wraps_modulo_256() {
        let mut ts = TimestampState::new();
        ts.update8(250);
        ts.update8(4);
        // (4 - 250) % 256 = 10
        assert_eq!(ts.last_diff(), 10);
        assert_eq!(ts.time_50us(), 260);
    }

    #[test]
    fn update16_first_call_sets_diff_to_zero() {
        let mut ts = TimestampState::new();
        ts.update16(500);
        assert_eq!(ts.time_50us(), 500);
        assert_eq!(ts.last_diff(), 0);
    }

    #[test]
    fn update16_subsequent_calls_track_diff() {
        let mut ts = TimestampState::new();
        ts.update16(500);
        ts.update16(700);
        assert_eq!(ts.last_diff(), 200);
        assert_eq!(ts.time_50us(), 700);
    }

    #[test]
    fn fmt_abs_converts_ticks_to_seconds_and_micros() {
        let mut ts = TimestampState::new();
        ts.update16(20_000); // 20000 * 50us = 1_000_000us = 1s
        assert_eq!(ts.fmt_abs(), "[001.000000]");
    }
}
