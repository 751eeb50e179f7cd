/*!
8254 PIT channel 2 and the PC speaker gate/mixer (spec §2 "PIT/PMTimer/
speaker" budget line). Channel 2 is the classic square-wave tone
generator; port `0x61` gates the counter's output into the speaker and
also lets software bit-bang the speaker directly by toggling bit 1 while
bit 0 (the gate) is low.

Grounded on `devices.rs`'s `Timer`/`ControlMode` shape (em68k) for the
"counter register + mode enum" construction, combined with a convolution
mixdown into the shared 44.1 kHz output stream per spec §4.7's mixer
description.
*/

use crate::scheduler::{Clock, Device, RateConverter};

/// Nominal 8254 input clock (same crystal as the legacy PIT/DRAM refresh).
pub const PIT_HZ: u64 = 1_193_182;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlMode {
    InterruptOnTerminalCount,
    SquareWave,
    RateGenerator,
}

pub struct Speaker {
    mode: ControlMode,
    reload: u16,
    counter: u16,
    output_high: bool,
    gate: bool,
    /// Direct software-driven speaker bit (port 0x61 bit 1 when the PIT is
    /// gated off), independent of the counter's own square wave.
    direct_bit: bool,
    latch: Option<u16>,
    write_lo_pending: bool,
    pit_clock: RateConverter,
    sample_clock: RateConverter,
}

impl Speaker {
    pub fn new(cpu_clock_hz: u64) -> Self {
        Self {
            mode: ControlMode::InterruptOnTerminalCount,
            reload: 0,
            counter: 0,
            output_high: false,
            gate: true,
            direct_bit: false,
            latch: None,
            write_lo_pending: true,
            pit_clock: RateConverter::new(PIT_HZ, cpu_clock_hz.max(1)),
            sample_clock: RateConverter::new(44_100, cpu_clock_hz.max(1)),
        }
    }

    pub fn set_cpu_clock_hz(&mut self, cpu_clock_hz: u64) {
        self.pit_clock = RateConverter::new(PIT_HZ, cpu_clock_hz.max(1));
        self.sample_clock = RateConverter::new(44_100, cpu_clock_hz.max(1));
    }

    /// Port `0x43`: mode/command register. Only counter 2 (bits 7:6 = 10)
    /// is modeled; counters 0/1 (system tick, DRAM refresh) are outside
    /// this core's observable surface and accepted as no-ops.
    pub fn write_mode_command(&mut self, val: u8) {
        if val >> 6 != 0b10 {
            return;
        }
        self.mode = match (val >> 1) & 0x07 {
            0b011 | 0b111 => ControlMode::SquareWave,
            0b010 | 0b110 => ControlMode::RateGenerator,
            _ => ControlMode::InterruptOnTerminalCount,
        };
        self.write_lo_pending = true;
    }

    /// Port `0x42`: channel-2 counter reload data, low byte then high byte.
    pub fn write_counter(&mut self, val: u8) {
        if self.write_lo_pending {
            self.reload = (self.reload & 0xFF00) | val as u16;
        } else {
            self.reload = (self.reload & 0x00FF) | ((val as u16) << 8);
            self.counter = self.reload;
        }
        self.write_lo_pending = !self.write_lo_pending;
    }

    /// Port `0x61` bits 0 (gate) and 1 (direct speaker data).
    pub fn write_control(&mut self, val: u8) {
        self.gate = val & 0x01 != 0;
        self.direct_bit = val & 0x02 != 0;
        if !self.gate {
            self.output_high = false;
        }
    }

    /// Port `0x61` readback: bit 4 mirrors the counter's current output
    /// (the "speaker data" feedback bit guest software polls).
    pub fn read_control(&self) -> u8 {
        let mut byte = (self.gate as u8) | ((self.direct_bit as u8) << 1);
        if self.output_high {
            byte |= 0x10;
        }
        byte
    }

    fn speaker_level(&self) -> bool {
        if self.gate {
            self.output_high
        } else {
            self.direct_bit
        }
    }

    /// One 44.1 kHz sample of the speaker's contribution to the mixdown,
    /// in the same [-32768, 32767] domain as the SB16 mixer.
    pub fn sample(&self) -> i16 {
        if self.speaker_level() {
            6000
        } else {
            0
        }
    }
}

impl Device for Speaker {
    fn next_event_cc(&self, _clock: &Clock) -> u64 {
        self.pit_clock
            .cc_until_next_tick()
            .min(self.sample_clock.cc_until_next_tick())
    }

    fn end_iter(&mut self, clock: &Clock) {
        let pit_ticks = self.pit_clock.advance(clock.now);
        for _ in 0..pit_ticks {
            if self.reload == 0 {
                continue;
            }
            self.counter = self.counter.wrapping_sub(1);
            if self.counter == 0 {
                self.counter = self.reload;
                if matches!(self.mode, ControlMode::SquareWave | ControlMode::RateGenerator) {
                    self.output_high = !self.output_high;
                }
            }
        }
        // Sample ticks are drained by `crate::machine::Machine`, which
        // calls `sample()` once per emitted 44.1 kHz frame and feeds it
        // into the shared mixdown alongside the SB16 voice and CD audio.
        let _ = self.sample_clock.advance(clock.now);
    }

    fn reset(&mut self) {
        self.mode = ControlMode::InterruptOnTerminalCount;
        self.reload = 0;
        self.counter = 0;
        self.output_high = false;
        self.gate = true;
        self.direct_bit = false;
        self.latch = None;
        self.write_lo_pending = true;
        self.pit_clock.reset();
        self.sample_clock.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_wave_toggles_output_at_half_the_reload_period() {
        let mut speaker = Speaker::new(1_193_182 * 2);
        speaker.write_mode_command(0b1011_0110); // counter 2, lo/hi, square wave
        speaker.write_counter(100); // lo
        speaker.write_counter(0); // hi -> reload=100
        speaker.write_control(0x01); // gate on

        let clock = Clock::new(1_193_182 * 2);
        for _ in 0..100 {
            speaker.end_iter(&Clock {
                now: 2,
                ..clock
            });
        }
        assert!(speaker.output_high, "should have toggled an odd number of half-periods by now");
    }

    #[test]
    fn gate_off_exposes_only_the_direct_bit() {
        let mut speaker = Speaker::new(1_193_182);
        speaker.write_control(0x02); // gate low, direct bit high
        assert!(speaker.speaker_level());
        speaker.write_control(0x00);
        assert!(!speaker.speaker_level());
    }
}
