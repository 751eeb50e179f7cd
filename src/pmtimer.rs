/*!
ACPI power-management timer (spec §4.4/§3): a free-running 24-bit counter
clocked at 3.579545 MHz, readable through the PIIX4's `PM_TMR` I/O port.
No IRQ of its own in this core; guests poll it for calibration.

Grounded on the same Bresenham [`RateConverter`](crate::scheduler::RateConverter)
pattern used throughout the core for cross-domain timing, since a PM timer
is exactly "count 3.579545 MHz ticks without drift against the CPU clock".
*/

use crate::scheduler::{Clock, Device, RateConverter};

/// Standard ACPI PM timer frequency (the old NTSC colorburst rate).
pub const PM_TIMER_HZ: u64 = 3_579_545;
const COUNTER_MASK: u32 = 0x00FF_FFFF;

pub struct PmTimer {
    counter: u32,
    converter: RateConverter,
}

impl PmTimer {
    pub fn new(cpu_clock_hz: u64) -> Self {
        Self {
            counter: 0,
            converter: RateConverter::new(PM_TIMER_HZ, cpu_clock_hz.max(1)),
        }
    }

    pub fn set_cpu_clock_hz(&mut self, cpu_clock_hz: u64) {
        self.converter = RateConverter::new(PM_TIMER_HZ, cpu_clock_hz.max(1));
    }

    /// Read the current 24-bit counter value without side effects.
    pub fn read(&self) -> u32 {
        self.counter & COUNTER_MASK
    }
}

impl Device for PmTimer {
    fn next_event_cc(&self, _clock: &Clock) -> u64 {
        // Purely a free-running counter; nothing observes its wrap, so the
        // scheduler need not wake specifically for it.
        self.converter.cc_until_next_tick()
    }

    fn end_iter(&mut self, clock: &Clock) {
        let ticks = self.converter.advance(clock.now);
        self.counter = self.counter.wrapping_add(ticks as u32) & COUNTER_MASK;
    }

    fn reset(&mut self) {
        self.counter = 0;
        self.converter.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_advances_at_the_documented_rate() {
        let mut timer = PmTimer::new(75_000_000);
        let clock = Clock::new(75_000_000);
        timer.end_iter(&Clock {
            now: 75_000_000, // one second of CPU cycles
            ..clock
        });
        let expected = PM_TIMER_HZ as u32;
        assert!((timer.read() as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn counter_wraps_at_24_bits() {
        let mut timer = PmTimer::new(75_000_000);
        timer.counter = COUNTER_MASK;
        let clock = Clock::new(75_000_000);
        timer.end_iter(&Clock {
            now: timer.converter.cc_until_next_tick(),
            ..clock
        });
        assert_eq!(timer.read(), 0);
    }
}
