/*!
Sound Blaster 16 DSP: command FSM, 8/16-bit DMA output, Creative ADPCM-8-to-4
decode and the render ring that resamples to the shared 44.1 kHz mixdown
(spec §4.7).

Grounded on `bus/dma.rs`'s phase-enum + narrow-trait shape (the same "accept
bytes into a small state machine, then act" idea that `src/dma/mod.rs` and
`src/floppy/mod.rs` already generalize), specialized here to the DSP's
command-argument-execute cycle and dual DMA sub-states.
*/

use std::collections::VecDeque;

use crate::dma::{DmaControllerPair, TransferType};
use crate::error::{warn_recoverable, RecoverableKind};
use crate::scheduler::RateConverter;

/// Hardcoded per spec §4.7: attempts to reprogram these emit warnings.
pub const DMA8_CHANNEL: u8 = 1;
pub const DMA16_CHANNEL: u8 = 5;
pub const IRQ_LINE: u8 = 5;

const TARGET_SAMPLE_HZ: u64 = 44_100;
const AUDIO_BUFFER_SIZE: usize = 512;
const RING_CAPACITY: usize = 2 * AUDIO_BUFFER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    WaitCmd,
    WaitArg1Of1,
    WaitArg1Of2,
    WaitArg2Of2,
    WaitArg1Of3,
    WaitArg2Of3,
    WaitArg3Of3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmaSubState {
    None,
    Single,
    AutoInit,
    AutoInitFinish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleFormat {
    Unsigned8,
    Signed16,
    Adpcm4 { reference: bool },
}

struct DmaChannelState {
    sub_state: DmaSubState,
    count: u32,
    init_count: u32,
    paused: bool,
    pending_irq: bool,
    stereo_left_hold: Option<i16>,
    format: SampleFormat,
    stereo: bool,
}

impl Default for DmaChannelState {
    fn default() -> Self {
        Self {
            sub_state: DmaSubState::None,
            count: 0,
            init_count: 0,
            paused: false,
            pending_irq: false,
            stereo_left_hold: None,
            format: SampleFormat::Unsigned8,
            stereo: false,
        }
    }
}

pub struct Dsp {
    state: CommandState,
    pending_cmd: u8,
    args: [u8; 3],
    out_fifo: VecDeque<u8>,
    time_constant: u8,
    input_rate_hz: u64,
    output_rate_hz: u64,
    block_size: u16,
    dma8: DmaChannelState,
    dma16: DmaChannelState,
    adpcm_step: u8,
    adpcm_current: i16,
    adpcm_started: bool,
    speaker_enabled: bool,
    render_ring: VecDeque<(i16, i16)>,
    resample_acc: RateConverter,
    direct_dac_level: i16,
    request_8bit_irq: bool,
}

impl Dsp {
    pub fn new() -> Self {
        Self {
            state: CommandState::WaitCmd,
            pending_cmd: 0,
            args: [0; 3],
            out_fifo: VecDeque::new(),
            time_constant: 0,
            input_rate_hz: 22_050,
            output_rate_hz: 22_050,
            block_size: 0,
            dma8: DmaChannelState::default(),
            dma16: DmaChannelState::default(),
            adpcm_step: 0,
            adpcm_current: 0,
            adpcm_started: false,
            speaker_enabled: false,
            render_ring: VecDeque::new(),
            resample_acc: RateConverter::new(TARGET_SAMPLE_HZ, 22_050),
            direct_dac_level: 0,
            request_8bit_irq: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn argument_count(cmd: u8) -> usize {
        match cmd {
            0x10 | 0x40 | 0x48 | 0x74 | 0x75 => 1,
            0x41 | 0x42 => 2,
            0x14 | 0x1C => 0,
            0xB0..=0xBF | 0xC0..=0xCF => 3,
            _ => 0,
        }
    }

    /// Write to port `0x22C` (command/data write). Returns `true` when the
    /// byte completed a command (so the caller can log/trace it).
    pub fn write_command_data(&mut self, byte: u8) -> bool {
        match self.state {
            CommandState::WaitCmd => {
                self.pending_cmd = byte;
                let needed = Self::argument_count(byte);
                self.state = match needed {
                    0 => {
                        self.execute();
                        return true;
                    }
                    1 => CommandState::WaitArg1Of1,
                    2 => CommandState::WaitArg1Of2,
                    _ => CommandState::WaitArg1Of3,
                };
                false
            }
            CommandState::WaitArg1Of1 => {
                self.args[0] = byte;
                self.state = CommandState::WaitCmd;
                self.execute();
                true
            }
            CommandState::WaitArg1Of2 => {
                self.args[0] = byte;
                self.state = CommandState::WaitArg2Of2;
                false
            }
            CommandState::WaitArg2Of2 => {
                self.args[1] = byte;
                self.state = CommandState::WaitCmd;
                self.execute();
                true
            }
            CommandState::WaitArg1Of3 => {
                self.args[0] = byte;
                self.state = CommandState::WaitArg2Of3;
                false
            }
            CommandState::WaitArg2Of3 => {
                self.args[1] = byte;
                self.state = CommandState::WaitArg3Of3;
                false
            }
            CommandState::WaitArg3Of3 => {
                self.args[2] = byte;
                self.state = CommandState::WaitCmd;
                self.execute();
                true
            }
        }
    }

    fn push_output(&mut self, byte: u8) {
        if self.out_fifo.len() >= 4 {
            self.out_fifo.pop_front();
        }
        self.out_fifo.push_back(byte);
    }

    pub fn read_output(&mut self) -> Option<u8> {
        self.out_fifo.pop_front()
    }

    pub fn has_output(&self) -> bool {
        !self.out_fifo.is_empty()
    }

    fn update_resampler(&mut self) {
        self.resample_acc = RateConverter::new(TARGET_SAMPLE_HZ, self.input_rate_hz.max(1));
    }

    fn execute(&mut self) {
        match self.pending_cmd {
            0x10 => {
                self.direct_dac_level = ((self.args[0] as i16) - 128) * 256;
                self.push_render_sample(self.direct_dac_level, self.direct_dac_level);
            }
            0x14 => {
                self.start_dma8(DmaSubState::Single, SampleFormat::Unsigned8, false);
            }
            0x1C => {
                self.start_dma8(DmaSubState::AutoInit, SampleFormat::Unsigned8, false);
            }
            0x40 => {
                self.time_constant = self.args[0];
                self.input_rate_hz = 1_000_000 / (256 - self.time_constant as u32).max(1) as u64;
                self.output_rate_hz = self.input_rate_hz;
                self.update_resampler();
            }
            0x41 => {
                self.output_rate_hz = u16::from_be_bytes([self.args[0], self.args[1]]) as u64;
                self.input_rate_hz = self.output_rate_hz;
                self.update_resampler();
            }
            0x42 => {
                self.input_rate_hz = u16::from_be_bytes([self.args[0], self.args[1]]) as u64;
                self.update_resampler();
            }
            0x48 => {
                self.block_size = u16::from_le_bytes([self.args[0], 0]);
            }
            0x74 => {
                self.adpcm_started = false;
                self.start_dma8(DmaSubState::Single, SampleFormat::Adpcm4 { reference: false }, false);
            }
            0x75 => {
                self.adpcm_started = false;
                self.start_dma8(DmaSubState::Single, SampleFormat::Adpcm4 { reference: true }, false);
            }
            0xB0..=0xBF => {
                let stereo = self.args[0] & 0x20 != 0;
                let signed = self.args[0] & 0x10 != 0;
                let auto_init = self.pending_cmd & 0x04 != 0;
                let format = if signed {
                    SampleFormat::Signed16
                } else {
                    SampleFormat::Unsigned8
                };
                let sub = if auto_init {
                    DmaSubState::AutoInit
                } else {
                    DmaSubState::Single
                };
                self.start_dma16(sub, format, stereo);
            }
            0xC0..=0xCF => {
                let stereo = self.args[0] & 0x20 != 0;
                let auto_init = self.pending_cmd & 0x04 != 0;
                let sub = if auto_init {
                    DmaSubState::AutoInit
                } else {
                    DmaSubState::Single
                };
                self.start_dma8(sub, SampleFormat::Unsigned8, stereo);
            }
            0xD0 => self.dma8.paused = true,
            0xD4 => self.dma8.paused = false,
            0xD1 => self.speaker_enabled = true,
            0xD3 => self.speaker_enabled = false,
            0xD5 => self.dma16.paused = true,
            0xD6 => self.dma16.paused = false,
            0xD9 => self.dma16.sub_state = DmaSubState::AutoInitFinish,
            0xDA => self.dma8.sub_state = DmaSubState::AutoInitFinish,
            0xE0 => self.push_output(!self.args[0]),
            0xE1 => {
                self.push_output(0x04);
                self.push_output(0x04);
            }
            0xE8 => self.push_output(0xAA),
            0xF2 => self.request_8bit_irq = true,
            _ => log::warn!("sb16 dsp: unhandled command {:#04x}", self.pending_cmd),
        }
        if self.pending_cmd != 0x41 && self.pending_cmd != 0x42 {
            self.args = [0, 0, 0];
        }
    }

    fn start_dma8(&mut self, sub: DmaSubState, format: SampleFormat, stereo: bool) {
        self.dma8.sub_state = sub;
        self.dma8.format = format;
        self.dma8.stereo = stereo;
        self.dma8.count = self.block_size as u32 + 1;
        self.dma8.init_count = self.dma8.count;
        self.dma8.paused = false;
        self.adpcm_step = 0;
    }

    fn start_dma16(&mut self, sub: DmaSubState, format: SampleFormat, stereo: bool) {
        self.dma16.sub_state = sub;
        self.dma16.format = format;
        self.dma16.stereo = stereo;
        self.dma16.count = self.block_size as u32 + 1;
        self.dma16.init_count = self.dma16.count;
        self.dma16.paused = false;
    }

    fn decode_adpcm4(&mut self, nibble: u8) -> i16 {
        let sign = nibble & 0x08 != 0;
        let magnitude = (nibble & 0x07) as i16;
        let delta = magnitude << (7 + self.adpcm_step as i16).min(10);
        if sign {
            self.adpcm_current = self.adpcm_current.saturating_sub(delta);
        } else {
            self.adpcm_current = self.adpcm_current.saturating_add(delta);
        }
        if magnitude >= 5 {
            self.adpcm_step = (self.adpcm_step + 1).min(3);
        } else if magnitude == 0 {
            self.adpcm_step = self.adpcm_step.saturating_sub(1);
        }
        self.adpcm_current
    }

    fn push_render_sample(&mut self, l: i16, r: i16) {
        let ticks = self.resample_acc.advance(1).max(1);
        for _ in 0..ticks {
            if self.render_ring.len() >= RING_CAPACITY {
                self.render_ring.pop_front();
            }
            self.render_ring.push_back((l, r));
        }
    }

    /// Render backpressure: true once the ring has crossed the DREQ
    /// release threshold, signaling the caller to stop asserting DREQ.
    pub fn ring_over_threshold(&self) -> bool {
        self.render_ring.len() >= AUDIO_BUFFER_SIZE
    }

    pub fn pop_render_sample(&mut self) -> Option<(i16, i16)> {
        self.render_ring.pop_front()
    }

    /// Pump one byte/word of 8-bit DMA8 transfer through `dma`. Call once
    /// per scheduler tick while a DMA8 transfer is active.
    pub fn pump_dma8(&mut self, dma: &mut DmaControllerPair, incoming_byte: Option<u8>) -> bool {
        if self.dma8.sub_state == DmaSubState::None || self.dma8.paused {
            dma.dreq(DMA8_CHANNEL, false);
            return false;
        }
        if self.ring_over_threshold() {
            dma.dreq(DMA8_CHANNEL, false);
            return false;
        }
        dma.dreq(DMA8_CHANNEL, true);
        let Some(req) = dma.poll_transfer() else {
            return false;
        };
        if req.channel != DMA8_CHANNEL || req.transfer_type != TransferType::Read {
            return false;
        }
        let Some(byte) = incoming_byte else {
            return false;
        };
        let outcome = dma.complete_transfer(DMA8_CHANNEL);
        self.consume_dma8_byte(byte);
        if self.dma8.count > 0 {
            self.dma8.count -= 1;
        }
        if outcome.terminal_count {
            self.dma8.pending_irq = true;
            if self.dma8.sub_state == DmaSubState::AutoInit {
                self.dma8.count = self.dma8.init_count;
            } else {
                self.dma8.sub_state = DmaSubState::None;
                dma.dreq(DMA8_CHANNEL, false);
            }
        }
        true
    }

    fn consume_dma8_byte(&mut self, byte: u8) {
        match self.dma8.format {
            SampleFormat::Unsigned8 => {
                let sample = ((byte as i16) - 128) * 256;
                if self.dma8.stereo {
                    match self.dma8.stereo_left_hold.take() {
                        Some(left) => self.push_render_sample(left, sample),
                        None => self.dma8.stereo_left_hold = Some(sample),
                    }
                } else {
                    self.push_render_sample(sample, sample);
                }
            }
            SampleFormat::Adpcm4 { reference } => {
                if reference && !self.adpcm_started {
                    self.adpcm_current = ((byte as i16) - 128) * 256;
                    self.adpcm_started = true;
                    return;
                }
                self.adpcm_started = true;
                let hi = self.decode_adpcm4(byte >> 4);
                self.push_render_sample(hi, hi);
                let lo = self.decode_adpcm4(byte & 0x0F);
                self.push_render_sample(lo, lo);
            }
            SampleFormat::Signed16 => unreachable!("DMA8 never carries 16-bit samples"),
        }
    }

    /// Pump one word of 16-bit DMA16 transfer. `incoming_word` is the
    /// little-endian 16-bit sample already fetched from guest memory.
    pub fn pump_dma16(&mut self, dma: &mut DmaControllerPair, incoming_word: Option<i16>) -> bool {
        if self.dma16.sub_state == DmaSubState::None || self.dma16.paused {
            dma.dreq(DMA16_CHANNEL, false);
            return false;
        }
        if self.ring_over_threshold() {
            dma.dreq(DMA16_CHANNEL, false);
            return false;
        }
        dma.dreq(DMA16_CHANNEL, true);
        let Some(req) = dma.poll_transfer() else {
            return false;
        };
        if req.channel != DMA16_CHANNEL || req.transfer_type != TransferType::Read {
            return false;
        }
        let Some(sample) = incoming_word else {
            return false;
        };
        let outcome = dma.complete_transfer(DMA16_CHANNEL);
        if self.dma16.stereo {
            match self.dma16.stereo_left_hold.take() {
                Some(left) => self.push_render_sample(left, sample),
                None => self.dma16.stereo_left_hold = Some(sample),
            }
        } else {
            self.push_render_sample(sample, sample);
        }
        if self.dma16.count > 0 {
            self.dma16.count -= 1;
        }
        if outcome.terminal_count {
            self.dma16.pending_irq = true;
            if self.dma16.sub_state == DmaSubState::AutoInit {
                self.dma16.count = self.dma16.init_count;
            } else {
                self.dma16.sub_state = DmaSubState::None;
                dma.dreq(DMA16_CHANNEL, false);
            }
        }
        true
    }

    pub fn take_irq(&mut self) -> bool {
        let fire = self.dma8.pending_irq || self.dma16.pending_irq || self.request_8bit_irq;
        self.dma8.pending_irq = false;
        self.dma16.pending_irq = false;
        self.request_8bit_irq = false;
        fire
    }

    /// Port `0x22E` read: acknowledge the 8-bit/ADPCM/DAC IRQ source.
    pub fn ack_irq8(&mut self) -> bool {
        let fire = self.dma8.pending_irq || self.request_8bit_irq;
        self.dma8.pending_irq = false;
        self.request_8bit_irq = false;
        fire
    }

    /// Port `0x22F` read: acknowledge the 16-bit DMA IRQ source.
    pub fn ack_irq16(&mut self) -> bool {
        let fire = self.dma16.pending_irq;
        self.dma16.pending_irq = false;
        fire
    }

    pub fn speaker_enabled(&self) -> bool {
        self.speaker_enabled
    }
}

impl Default for Dsp {
    fn default() -> Self {
        Self::new()
    }
}

pub fn reject_mixer_change(what: &str) {
    warn_recoverable(RecoverableKind::UnsupportedMixerRegister { index: 0xFF });
    log::warn!("sb16 mixer: attempted to reprogram hardcoded {what}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_with_no_args_executes_immediately() {
        let mut dsp = Dsp::new();
        assert!(dsp.write_command_data(0x14));
        assert_eq!(dsp.dma8.sub_state, DmaSubState::Single);
    }

    #[test]
    fn two_byte_time_constant_updates_input_rate() {
        let mut dsp = Dsp::new();
        dsp.write_command_data(0x40);
        dsp.write_command_data(256 - (1_000_000 / 22_050) as u8);
        assert!((dsp.input_rate_hz as i64 - 22_050).abs() < 500);
    }

    #[test]
    fn direct_dac_write_pushes_a_render_sample() {
        let mut dsp = Dsp::new();
        dsp.write_command_data(0x10);
        dsp.write_command_data(200);
        assert!(dsp.pop_render_sample().is_some());
    }

    #[test]
    fn adpcm_reference_byte_seeds_current_without_decoding() {
        let mut dsp = Dsp::new();
        dsp.write_command_data(0x75);
        dsp.write_command_data(4); // block size arg
        dsp.start_dma8(DmaSubState::Single, SampleFormat::Adpcm4 { reference: true }, false);
        dsp.consume_dma8_byte(0x90);
        assert_eq!(dsp.adpcm_current, ((0x90i16) - 128) * 256);
        assert!(dsp.adpcm_started);
    }

    #[test]
    fn irq_request_command_sets_pending_irq() {
        let mut dsp = Dsp::new();
        dsp.write_command_data(0xF2);
        assert!(dsp.take_irq());
        assert!(!dsp.take_irq());
    }
}
