/*!
Sound Blaster 16: OPL3 FM synthesis, DSP and mixer (spec §4.7), wired behind
the `0x220-0x22F` DSP/mixer/FM port block plus the `0x388/0x389` AdLib-
compatible FM alias.

Grounded on spec §4.7; the register-file/FIFO shape follows the same
`Default + new + reset` pattern used throughout `apu.rs` and `cpu/state.rs`.
*/

pub mod dsp;
pub mod mixer;
pub mod opl3;

use crate::dma::DmaControllerPair;
use crate::scheduler::{Clock, Device, RateConverter};
use dsp::Dsp;
use mixer::Mixer;
use opl3::Opl3;

const BASE_PORT: u16 = 0x220;

pub struct SoundBlaster {
    opl3: Opl3,
    dsp: Dsp,
    mixer: Mixer,
    native_sample_clock: RateConverter,
    dsp_reset_phase: u8,
    speaker_sample: i16,
    irq_pending: bool,
    /// Latched FM register index per bank, set by an address-port write and
    /// consumed by the following data-port write.
    fm_reg_index: [u8; 2],
}

impl SoundBlaster {
    pub fn new(cpu_clock_hz: u64) -> Self {
        Self {
            opl3: Opl3::new(cpu_clock_hz),
            dsp: Dsp::new(),
            mixer: Mixer::new(),
            native_sample_clock: RateConverter::new(opl3::NATIVE_SAMPLE_HZ, cpu_clock_hz.max(1)),
            dsp_reset_phase: 0,
            speaker_sample: 0,
            irq_pending: false,
            fm_reg_index: [0, 0],
        }
    }

    pub fn set_cpu_clock_hz(&mut self, cpu_clock_hz: u64) {
        self.opl3.set_cpu_clock_hz(cpu_clock_hz);
        self.native_sample_clock = RateConverter::new(opl3::NATIVE_SAMPLE_HZ, cpu_clock_hz.max(1));
    }

    pub fn dma8_channel(&self) -> u8 {
        dsp::DMA8_CHANNEL
    }

    pub fn dma16_channel(&self) -> u8 {
        dsp::DMA16_CHANNEL
    }

    pub fn irq_line(&self) -> u8 {
        dsp::IRQ_LINE
    }

    /// Feed the current PC-speaker level into the mixdown; called by
    /// `Machine` once per 44.1 kHz mixer tick alongside `Speaker::sample`.
    pub fn set_speaker_sample(&mut self, sample: i16) {
        self.speaker_sample = sample;
    }

    /// Pump one scheduler tick of DMA8/DMA16-driven playback. The caller
    /// supplies the byte/word already fetched from guest memory at the
    /// transfer's physical address, mirroring `FloppyController::pump_dma`.
    pub fn pump_dma(
        &mut self,
        dma: &mut DmaControllerPair,
        incoming_byte: Option<u8>,
        incoming_word: Option<i16>,
    ) {
        self.dsp.pump_dma8(dma, incoming_byte);
        self.dsp.pump_dma16(dma, incoming_word);
    }

    pub fn take_irq(&mut self) -> bool {
        std::mem::take(&mut self.irq_pending) || self.dsp.take_irq()
    }

    /// Pop one mixed stereo sample if the render ring has one ready. The
    /// FM and DSP voice contributions are averaged per spec §4.7's "voice
    /// (FM + DSP averaged)" mixdown description.
    pub fn pop_mixed_sample(&mut self) -> Option<(i16, i16)> {
        let (fm_l, fm_r) = self.opl3.generate_sample();
        let dsp_sample = self.dsp.pop_render_sample().unwrap_or((0, 0));
        let voice = (
            ((fm_l as i32 + dsp_sample.0 as i32) / 2) as i16,
            ((fm_r as i32 + dsp_sample.1 as i32) / 2) as i16,
        );
        Some(self.mixer.mix_sample(voice, self.speaker_sample))
    }

    pub fn io_read(&mut self, port: u16) -> u8 {
        match port {
            0x388 | BASE_PORT | 0x222 => self.opl3.status(),
            0x389 | 0x221 | 0x223 => 0xFF, // FM data ports are write-only
            0x224 => self.mixer.read_data(),
            0x225 => self.mixer.read_data(),
            0x22A => self.dsp.read_output().unwrap_or(0xFF),
            0x22C => {
                if self.dsp.has_output() {
                    0x80
                } else {
                    0x00
                }
            }
            0x22E => (self.dsp.ack_irq8() as u8) << 7,
            0x22F => (self.dsp.ack_irq16() as u8) << 7,
            _ => 0xFF,
        }
    }

    pub fn io_write(&mut self, port: u16, val: u8) {
        match port {
            0x388 | BASE_PORT => self.fm_reg_index[0] = val,
            0x389 | 0x221 => self.opl3.write_register(0, self.fm_reg_index[0], val),
            0x222 => self.fm_reg_index[1] = val,
            0x223 => self.opl3.write_register(1, self.fm_reg_index[1], val),
            0x224 => self.mixer.write_index(val),
            0x225 => self.mixer.write_data(val),
            0x226 => self.trigger_dsp_reset(val),
            0x22C => {
                self.dsp.write_command_data(val);
            }
            _ => {}
        }
    }

    fn trigger_dsp_reset(&mut self, val: u8) {
        if val & 0x01 != 0 {
            self.dsp_reset_phase = 1;
        } else if self.dsp_reset_phase == 1 {
            self.dsp.reset();
            self.dsp_reset_phase = 0;
        }
    }
}

impl Device for SoundBlaster {
    fn next_event_cc(&self, _clock: &Clock) -> u64 {
        self.native_sample_clock
            .cc_until_next_tick()
            .min(self.opl3.cc_until_next_timer_event())
    }

    fn end_iter(&mut self, clock: &Clock) {
        self.opl3.advance_timers(clock.now);
        let ticks = self.native_sample_clock.advance(clock.now);
        for _ in 0..ticks {
            self.opl3.generate_sample();
        }
        if self.dsp.take_irq() {
            self.irq_pending = true;
        }
    }

    fn reset(&mut self) {
        self.opl3.reset();
        self.dsp.reset();
        self.mixer.reset();
        self.native_sample_clock.reset();
        self.dsp_reset_phase = 0;
        self.speaker_sample = 0;
        self.irq_pending = false;
        self.fm_reg_index = [0, 0];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsp_reset_pulse_resets_command_state() {
        let mut sb = SoundBlaster::new(1_000_000);
        sb.io_write(0x22C, 0x40); // start a 1-arg command, leaving the FSM mid-command
        sb.io_write(0x226, 0x01);
        sb.io_write(0x226, 0x00);
        assert_eq!(sb.dsp.read_output(), None);
    }

    #[test]
    fn mixer_ports_round_trip() {
        let mut sb = SoundBlaster::new(1_000_000);
        sb.io_write(0x224, 0x30);
        sb.io_write(0x225, 0x88);
        sb.io_write(0x224, 0x30);
        assert_eq!(sb.io_read(0x225), 0x88);
    }

    #[test]
    fn mixed_sample_stays_in_range() {
        let mut sb = SoundBlaster::new(1_000_000);
        for _ in 0..16 {
            let (l, r) = sb.pop_mixed_sample().unwrap();
            let _ = (l, r);
        }
    }
}
