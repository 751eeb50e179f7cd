/*!
SB16 mixer register file and the per-sample mixdown (spec §4.7).

Grounded on the same `Default + new + reset` register-bank shape as
`src/pic/mod.rs`'s OCW/ICW register handling, specialized to the CT1745
mixer's index/data port pair and documented power-on defaults.
*/

use super::dsp::{reject_mixer_change, DMA16_CHANNEL, DMA8_CHANNEL, IRQ_LINE};

const NUM_REGISTERS: usize = 256;

/// Registers the real CT1745 resets to non-zero documented defaults;
/// everything else resets to 0.
const REG_MASTER_LEFT: u8 = 0x30;
const REG_MASTER_RIGHT: u8 = 0x31;
const REG_VOICE_LEFT: u8 = 0x32;
const REG_VOICE_RIGHT: u8 = 0x33;
const REG_OUTPUT_GAIN_LEFT: u8 = 0x41;
const REG_OUTPUT_GAIN_RIGHT: u8 = 0x42;
const REG_CD_LEFT: u8 = 0x36;
const REG_CD_RIGHT: u8 = 0x37;
const REG_IRQ_SETUP: u8 = 0x80;
const REG_DMA_SETUP: u8 = 0x81;
const REG_RESET: u8 = 0x00;

pub struct Mixer {
    registers: [u8; NUM_REGISTERS],
    index: u8,
    cd_left: i16,
    cd_right: i16,
}

impl Mixer {
    pub fn new() -> Self {
        let mut mixer = Self {
            registers: [0; NUM_REGISTERS],
            index: 0,
            cd_left: 0,
            cd_right: 0,
        };
        mixer.load_defaults();
        mixer
    }

    fn load_defaults(&mut self) {
        self.registers = [0; NUM_REGISTERS];
        self.registers[REG_MASTER_LEFT as usize] = 0xC0;
        self.registers[REG_MASTER_RIGHT as usize] = 0xC0;
        self.registers[REG_VOICE_LEFT as usize] = 0xC0;
        self.registers[REG_VOICE_RIGHT as usize] = 0xC0;
        self.registers[REG_OUTPUT_GAIN_LEFT as usize] = 0x00;
        self.registers[REG_OUTPUT_GAIN_RIGHT as usize] = 0x00;
        self.registers[REG_IRQ_SETUP as usize] = 1 << 1; // IRQ5 bit, per the hardcoded assignment
        self.registers[REG_DMA_SETUP as usize] = (1 << DMA8_CHANNEL) | (1 << DMA16_CHANNEL);
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.cd_left = 0;
        self.cd_right = 0;
        self.load_defaults();
    }

    pub fn write_index(&mut self, val: u8) {
        self.index = val;
    }

    pub fn read_data(&self) -> u8 {
        self.registers[self.index as usize]
    }

    pub fn write_data(&mut self, val: u8) {
        match self.index {
            REG_RESET => self.load_defaults(),
            REG_IRQ_SETUP => {
                if val != self.registers[REG_IRQ_SETUP as usize] {
                    reject_mixer_change("IRQ line (fixed at 5)");
                }
            }
            REG_DMA_SETUP => {
                if val != self.registers[REG_DMA_SETUP as usize] {
                    reject_mixer_change("DMA channel assignment (fixed at 8-bit=1, 16-bit=5)");
                }
            }
            _ => self.registers[self.index as usize] = val,
        }
    }

    pub fn push_cd_audio(&mut self, l: i16, r: i16) {
        self.cd_left = l;
        self.cd_right = r;
    }

    fn volume_scale(reg: u8) -> i32 {
        // Top 4 bits are the documented CT1745 volume field (0..=15).
        ((reg >> 4) as i32).min(15)
    }

    /// Combine one voice sample (already FM+DSP-averaged by the caller),
    /// one CD-audio sample (silenced unless `push_cd_audio` was ever
    /// called, per the out-of-scope IDE seam), and one speaker sample
    /// into the final 16-bit stereo output.
    pub fn mix_sample(&self, voice: (i16, i16), speaker: i16) -> (i16, i16) {
        let master_l = Self::volume_scale(self.registers[REG_MASTER_LEFT as usize]);
        let master_r = Self::volume_scale(self.registers[REG_MASTER_RIGHT as usize]);
        let voice_l = Self::volume_scale(self.registers[REG_VOICE_LEFT as usize]);
        let voice_r = Self::volume_scale(self.registers[REG_VOICE_RIGHT as usize]);
        let cd_l = Self::volume_scale(self.registers[REG_CD_LEFT as usize]);
        let cd_r = Self::volume_scale(self.registers[REG_CD_RIGHT as usize]);
        let gain_l = Self::volume_scale(self.registers[REG_OUTPUT_GAIN_LEFT as usize]).max(1);
        let gain_r = Self::volume_scale(self.registers[REG_OUTPUT_GAIN_RIGHT as usize]).max(1);

        let scale = |sample: i32, vol: i32| sample * vol / 15;
        let l = scale(voice.0 as i32, voice_l) + scale(self.cd_left as i32, cd_l) + speaker as i32;
        let r = scale(voice.1 as i32, voice_r) + scale(self.cd_right as i32, cd_r) + speaker as i32;
        let l = scale(l, master_l) * gain_l.max(1) / 15;
        let r = scale(r, master_r) * gain_r.max(1) / 15;
        (
            l.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            r.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        )
    }

    pub fn irq_line(&self) -> u8 {
        IRQ_LINE
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}
