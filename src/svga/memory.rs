/*!
Planar VRAM access: the four write modes, the two read modes and the latch
register, plus chain-4/odd-even/linear address decode (spec §4.8 "VRAM
pipeline").
*/

use super::Svga;

/// The classic 256 KiB VGA window, 64 KiB per plane, that GR6's
/// `memory_map` selects a sub-range of.
const PLANE_SIZE: usize = 0x1_0000;

impl Svga {
    fn rotate_count(&self) -> u32 {
        (self.gr[0x03] & 0x07) as u32
    }

    fn alu_function(&self) -> u8 {
        (self.gr[0x03] >> 3) & 0x03
    }

    fn set_reset(&self) -> u8 {
        self.gr[0x00] & 0x0F
    }

    fn enable_set_reset(&self) -> u8 {
        self.gr[0x01] & 0x0F
    }

    fn bit_mask(&self) -> u8 {
        self.gr[0x08]
    }

    fn read_map_select(&self) -> usize {
        (self.gr[0x04] & 0x03) as usize
    }

    fn write_mode(&self) -> u8 {
        self.gr[0x05] & 0x03
    }

    fn read_mode(&self) -> u8 {
        (self.gr[0x05] >> 3) & 0x01
    }

    fn color_compare(&self) -> u8 {
        self.gr[0x02] & 0x0F
    }

    fn color_dont_care(&self) -> u8 {
        self.gr[0x07] & 0x0F
    }

    fn plane_offset(&self, addr: u32) -> usize {
        (addr as usize) % PLANE_SIZE
    }

    fn apply_alu(&self, cpu_data: u8, latch: u8) -> u8 {
        match self.alu_function() {
            0 => cpu_data,
            1 => cpu_data & latch,
            2 => cpu_data | latch,
            _ => cpu_data ^ latch,
        }
    }

    /// Planar VRAM write, shared by the legacy 256 KiB window and (via the
    /// linear framebuffer decode) the chain-4/packed modes that bypass the
    /// plane pipeline entirely.
    pub(super) fn write_planar(&mut self, addr: u32, cpu_data: u8) {
        let offset = self.plane_offset(addr);
        let mask = self.bit_mask();
        let rotated = cpu_data.rotate_right(self.rotate_count());

        for plane in 0..4u8 {
            if self.sr[0x02] & (1 << plane) == 0 {
                continue;
            }
            if self.odd_even_enabled() && (plane & 1) != (addr & 1) as u8 {
                continue;
            }
            let latch = self.latches[plane as usize];
            let planebit = 1u8 << plane;
            let to_write = match self.write_mode() {
                1 => latch,
                2 => {
                    let bit_val = if cpu_data & planebit != 0 { 0xFF } else { 0x00 };
                    self.apply_alu(bit_val, latch) & mask | (latch & !mask)
                }
                3 => {
                    let sr = self.set_reset();
                    let bit_val = if sr & planebit != 0 { 0xFF } else { 0x00 };
                    let effective_mask = rotated & mask;
                    (bit_val & effective_mask) | (latch & !effective_mask)
                }
                _ => {
                    let source = if self.enable_set_reset() & planebit != 0 {
                        if self.set_reset() & planebit != 0 { 0xFF } else { 0x00 }
                    } else {
                        rotated
                    };
                    (self.apply_alu(source, latch) & mask) | (latch & !mask)
                }
            };
            self.vram[plane as usize * PLANE_SIZE + offset] = to_write;
        }
    }

    /// Latches all four planes at `addr`, as real hardware does on every
    /// VRAM read regardless of which plane `read_map_select` exposes.
    fn latch_planes(&mut self, addr: u32) {
        let offset = self.plane_offset(addr);
        for plane in 0..4usize {
            self.latches[plane] = self.vram[plane * PLANE_SIZE + offset];
        }
    }

    pub(super) fn read_planar(&mut self, addr: u32) -> u8 {
        self.latch_planes(addr);
        match self.read_mode() {
            1 => self.color_compare_byte(),
            _ => self.latches[self.read_map_select()],
        }
    }

    /// Read mode 1: each output bit is set when every plane not masked out
    /// by `color_dont_care` matches `color_compare` at that bit position.
    fn color_compare_byte(&self) -> u8 {
        let compare = self.color_compare();
        let care = self.color_dont_care();
        let mut result = 0u8;
        for bit in 0..8u8 {
            let mut matches = true;
            for plane in 0..4u8 {
                if care & (1 << plane) == 0 {
                    continue;
                }
                let plane_bit = (self.latches[plane as usize] >> bit) & 1;
                let want = (compare >> plane) & 1;
                if plane_bit != want {
                    matches = false;
                    break;
                }
            }
            if matches {
                result |= 1 << bit;
            }
        }
        result
    }

    /// Decode a CPU-visible address in the legacy `0xA0000-0xBFFFF` window
    /// (or the linear framebuffer aperture, which callers pre-translate to
    /// an absolute VRAM offset before calling this) and perform the read.
    pub fn mem_read(&mut self, addr: u32) -> u8 {
        if self.chain4_enabled() {
            let plane = (addr & 0x03) as usize;
            let offset = (addr >> 2) as usize % (self.vram.len() / 4);
            self.vram[plane * (self.vram.len() / 4) + offset]
        } else {
            self.read_planar(addr)
        }
    }

    pub fn mem_write(&mut self, addr: u32, val: u8) {
        if self.chain4_enabled() {
            let plane = (addr & 0x03) as usize;
            let offset = (addr >> 2) as usize % (self.vram.len() / 4);
            self.vram[plane * (self.vram.len() / 4) + offset] = val;
        } else {
            self.write_planar(addr, val);
        }
    }

    /// Raw byte read at an absolute VRAM offset, bypassing the plane
    /// pipeline entirely; used by the renderer for packed/truecolor modes
    /// and by the linear framebuffer aperture decode.
    pub fn vram_raw(&self, offset: usize) -> u8 {
        self.vram[offset % self.vram.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_mode_0_replace_touches_all_four_planes() {
        let mut svga = Svga::new(1_000_000);
        svga.gr[0x08] = 0xFF;
        svga.write_planar(0, 0xAA);
        for plane in 0..4 {
            assert_eq!(svga.vram[plane * PLANE_SIZE], 0xAA);
        }
    }

    #[test]
    fn bit_mask_preserves_unmasked_latch_bits() {
        let mut svga = Svga::new(1_000_000);
        svga.vram[0] = 0x0F;
        svga.gr[0x08] = 0xF0;
        svga.write_planar(0, 0xFF);
        assert_eq!(svga.vram[0], 0xFF & 0xF0 | (0x0F & 0x0F));
    }

    #[test]
    fn read_mode_0_returns_the_selected_planes_latch() {
        let mut svga = Svga::new(1_000_000);
        svga.vram[0 * PLANE_SIZE] = 0x11;
        svga.vram[1 * PLANE_SIZE] = 0x22;
        svga.gr[0x04] = 1;
        assert_eq!(svga.read_planar(0), 0x22);
    }

    #[test]
    fn map_mask_excludes_disabled_planes_from_writes() {
        let mut svga = Svga::new(1_000_000);
        svga.gr[0x08] = 0xFF;
        svga.sr[0x02] = 0b0101; // only planes 0 and 2 writable
        svga.write_planar(0, 0xAA);
        assert_eq!(svga.vram[0 * PLANE_SIZE], 0xAA);
        assert_eq!(svga.vram[1 * PLANE_SIZE], 0x00);
        assert_eq!(svga.vram[2 * PLANE_SIZE], 0xAA);
        assert_eq!(svga.vram[3 * PLANE_SIZE], 0x00);
    }

    #[test]
    fn set_reset_mode_writes_the_set_reset_register_value() {
        let mut svga = Svga::new(1_000_000);
        svga.gr[0x00] = 0b0011; // planes 0,1 set, planes 2,3 reset
        svga.gr[0x01] = 0x0F; // enable set/reset on all planes
        svga.gr[0x08] = 0xFF;
        svga.write_planar(0, 0x00);
        assert_eq!(svga.vram[0 * PLANE_SIZE], 0xFF);
        assert_eq!(svga.vram[2 * PLANE_SIZE], 0x00);
    }
}
