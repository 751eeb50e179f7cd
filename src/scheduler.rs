/*!
Global cycle clock and event-horizon scheduler (spec §4.1).

The scheduler is a shared cycle counter, not a priority queue: every device
reports how many cycles must elapse before it next needs to run
([`Device::next_event_cc`]); the scheduler takes the minimum across all
devices (clipped to the caller's quantum) as `NextEventCC`, lets the CPU run
until `Clock` reaches it, then sweeps every device's [`Device::end_iter`].

This mirrors `bus/clock.rs`'s `tick()` orchestration function but generalizes
its fixed "3 PPU ticks + 1 DMA step + 1 APU tick per CPU cycle" loop into an
event-horizon model: devices are not stepped every cycle, only resynchronized
when the CPU actually reaches their next event.
*/

/// Cycles per second. Kept as a plain type alias (not a newtype) because
/// every device mixes it freely with cycle counts in Bresenham ratios.
pub type Hertz = u64;

/// The shared clock state every device reads and the scheduler writes.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    /// Cycles elapsed since the start of the current outer iteration.
    pub now: u64,
    /// CPU clock frequency in Hz (after the x2 scale factor, §2).
    pub freq_hz: Hertz,
    /// Cycle at which the CPU must stop to let devices resynchronize.
    pub next_event_cc: u64,
}

impl Clock {
    pub fn new(freq_hz: Hertz) -> Self {
        Self {
            now: 0,
            freq_hz,
            next_event_cc: u64::MAX,
        }
    }

    /// Cycles corresponding to `micros` microseconds at the current
    /// frequency, rounded down. Used throughout for latency constants
    /// expressed in real time (SRT, HLT, PIE periods, ...).
    pub fn cycles_from_micros(&self, micros: u64) -> u64 {
        (self.freq_hz * micros) / 1_000_000
    }

    /// Lower `next_event_cc` to at most `candidate`. Per §4.1, recomputing a
    /// device's event may only lower the horizon within the current
    /// iteration, never raise it; this helper enforces that by construction.
    pub fn request_event_no_later_than(&mut self, candidate: u64) {
        if candidate < self.next_event_cc {
            self.next_event_cc = candidate;
        }
    }
}

/// A `RateConverter` performs drift-free cycle-domain rate conversion using a
/// Bresenham accumulator: given a source rate `mul` and target rate `div`,
/// `advance(cc)` accumulates `cc * mul` and emits `accum / div` output
/// ticks, keeping `accum % div` as residue. Every timing conversion in the
/// core (SYSCLK, PMTimer, OPL3 sample rate, PIE periods, VCLK) should reuse
/// this rather than hand-rolling float or truncating-integer math (§9).
#[derive(Debug, Clone, Copy, Default)]
pub struct RateConverter {
    mul: u64,
    div: u64,
    accum: u64,
}

impl RateConverter {
    pub fn new(mul: u64, div: u64) -> Self {
        assert!(div > 0, "RateConverter divisor must be positive");
        Self { mul, div, accum: 0 }
    }

    /// Feed `cc` source-domain cycles in, returning how many whole
    /// target-domain ticks occurred.
    pub fn advance(&mut self, cc: u64) -> u64 {
        self.accum += cc * self.mul;
        let ticks = self.accum / self.div;
        self.accum %= self.div;
        ticks
    }

    /// Cycles (in the source domain) until the next target-domain tick,
    /// always strictly positive. Used to implement `next_event_cc` for
    /// devices whose only event is "the next rate-converted tick".
    pub fn cc_until_next_tick(&self) -> u64 {
        if self.mul == 0 {
            return u64::MAX;
        }
        let remaining = self.div - self.accum;
        remaining.div_ceil(self.mul).max(1)
    }

    pub fn reset(&mut self) {
        self.accum = 0;
    }
}

/// Per-device hook set. Every device in the machine implements this; the
/// scheduler only ever talks to devices through it (plus whatever narrow
/// capability interfaces that device separately exposes, e.g. `IrqLine`).
///
/// Port/memory callbacks are intentionally *not* part of this trait: they
/// have heterogeneous signatures per device and are dispatched directly by
/// [`crate::machine::Machine`]'s address decoders, which call
/// [`Device::resync`] first per the "synchronize then apply" ordering rule
/// in §5.
pub trait Device {
    /// Cycles until this device's next observable event. Must always be
    /// strictly positive (§4.1 failure semantics): a device reporting zero
    /// or negative is a programming error.
    fn next_event_cc(&self, clock: &Clock) -> u64;

    /// Advance internal state by the cycles elapsed since this device's
    /// `cc_used`, invoked once per scheduler sweep after the CPU stops at
    /// `NextEventCC`.
    fn end_iter(&mut self, clock: &Clock);

    /// Resynchronize to `clock.now` without waiting for the next scheduled
    /// sweep. Port/memory callbacks call this before applying a register
    /// change, per §5's "synchronize first, then apply" rule. Default is a
    /// no-op for devices with no time-dependent register reads (e.g. pure
    /// RAM-like stores).
    fn resync(&mut self, _clock: &Clock) {}

    /// Reset to power-on defaults, cancel pending transfers, deassert lines.
    fn reset(&mut self);
}

/// Computes `NextEventCC` for one outer iteration as the minimum of
/// `cc_remain` and every device's `next_event_cc()`. Devices are queried
/// through the small closures the caller supplies because `Machine` owns
/// heterogeneous device types directly as fields rather than behind a
/// `Vec<Box<dyn Device>>` (cheaper, no allocation per iteration); this
/// function is the shared reduction every `Machine::run_quantum` uses.
pub fn compute_next_event_cc(clock: &Clock, cc_remain: u64, per_device: &[u64]) -> u64 {
    let mut bound = clock.now.saturating_add(cc_remain);
    for &cc in per_device {
        debug_assert!(cc > 0, "device reported non-positive next_event_cc");
        let candidate = clock.now.saturating_add(cc);
        if candidate < bound {
            bound = candidate;
        }
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_converter_is_drift_free_over_long_runs() {
        // 33 MHz source -> 44100 Hz target, classic SB16 resample ratio.
        let mut rc = RateConverter::new(44_100, 33_000_000);
        let mut total_ticks = 0u64;
        let mut total_cc = 0u64;
        for _ in 0..10_000 {
            total_ticks += rc.advance(3_300);
            total_cc += 3_300;
        }
        let expected = (total_cc * 44_100) / 33_000_000;
        // Drift-free Bresenham accumulation must match the exact ratio
        // within rounding of a single tick.
        assert!((total_ticks as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn cc_until_next_tick_is_always_positive() {
        let mut rc = RateConverter::new(1, 7);
        for _ in 0..50 {
            assert!(rc.cc_until_next_tick() > 0);
            rc.advance(1);
        }
    }

    #[test]
    fn compute_next_event_cc_never_exceeds_quantum() {
        let clock = Clock::new(75_000_000);
        let bound = compute_next_event_cc(&clock, 1000, &[5000, 200, 900]);
        assert_eq!(bound, clock.now + 200);
    }

    #[test]
    fn request_event_only_lowers_horizon() {
        let mut clock = Clock::new(75_000_000);
        clock.next_event_cc = 500;
        clock.request_event_no_later_than(800);
        assert_eq!(clock.next_event_cc, 500);
        clock.request_event_no_later_than(100);
        assert_eq!(clock.next_event_cc, 100);
    }
}
