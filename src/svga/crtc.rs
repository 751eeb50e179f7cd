/*!
CRTC scanout: character-clock stepping, horizontal/vertical blanking and
retrace toggling, frame-push and wraparound (spec §4.8 "Register model" /
"Scanout").
*/

use super::Svga;

impl Svga {
    fn cr_word(&self, lo_reg: usize, overflow_bit_lo: u8, overflow_bit_hi: u8) -> u16 {
        let lo = self.cr[lo_reg] as u16;
        let overflow = self.cr[0x07];
        let mut hi = 0u16;
        if overflow & (1 << overflow_bit_lo) != 0 {
            hi |= 1 << 8;
        }
        if overflow_bit_hi < 8 && overflow & (1 << overflow_bit_hi) != 0 {
            hi |= 1 << 9;
        }
        lo | hi
    }

    fn horizontal_total(&self) -> u16 {
        self.cr[0x00] as u16 + 5
    }

    fn horizontal_display_end(&self) -> u16 {
        self.cr[0x01] as u16 + 1
    }

    fn horizontal_blank_start(&self) -> u16 {
        self.cr[0x02] as u16
    }

    fn horizontal_blank_end(&self) -> u16 {
        self.cr[0x03] & 0x1F
    }

    fn horizontal_retrace_start(&self) -> u16 {
        self.cr[0x04] as u16
    }

    fn horizontal_retrace_end(&self) -> u16 {
        (self.cr[0x05] & 0x1F) as u16
    }

    fn vertical_total(&self) -> u16 {
        self.cr_word(0x06, 0, 5) + 2
    }

    fn vertical_display_end(&self) -> u16 {
        self.cr_word(0x12, 1, 6) + 1
    }

    fn vertical_blank_start(&self) -> u16 {
        let lo = self.cr[0x15] as u16;
        let hi_overflow = if self.cr[0x07] & 0x08 != 0 { 1 << 8 } else { 0 };
        let hi_max_scan = if self.cr[0x09] & 0x20 != 0 { 1 << 9 } else { 0 };
        lo | hi_overflow | hi_max_scan
    }

    fn vertical_retrace_start(&self) -> u16 {
        self.cr_word(0x10, 2, 7)
    }

    /// `14.31818 MHz × (num & 0x7F) / den`, one of four synthesizer register
    /// pairs selected by the misc output register's 2-bit VCLK field
    /// (bits 2-3). Pairs live at `SR[0x14 + 2*select]` (numerator) and
    /// `SR[0x15 + 2*select]` (denominator).
    pub fn vclk_hz(&self) -> u64 {
        const REFERENCE_HZ: u64 = 14_318_180;
        let select = ((self.misc_output >> 2) & 0x03) as usize;
        let num = (self.sr[0x14 + select * 2] & 0x7F) as u64;
        let den = self.sr[0x15 + select * 2] as u64;
        let hz = if den == 0 { REFERENCE_HZ } else { REFERENCE_HZ * num.max(1) / den };
        if self.sr[0x01] & 0x08 != 0 {
            hz / 2
        } else {
            hz
        }
    }

    /// Advance one character clock. Called once per `dot_clock` tick from
    /// `Device::end_iter`.
    pub(super) fn step_character(&mut self) {
        self.h_blank = self.h_char >= self.horizontal_blank_start()
            && (self.h_char % self.horizontal_total()) < self.horizontal_blank_end().max(1);
        self.h_retrace = self.h_char >= self.horizontal_retrace_start()
            && self.h_char < self.horizontal_retrace_start() + self.horizontal_retrace_end().max(1);

        self.h_char += 1;
        if self.h_char >= self.horizontal_total() {
            self.h_char = 0;
            self.advance_scanline();
        }
    }

    fn advance_scanline(&mut self) {
        if self.v_line == self.vertical_display_end() {
            self.push_frame();
        }
        self.v_blank = self.v_line >= self.vertical_blank_start();
        self.v_retrace = self.v_line >= self.vertical_retrace_start();

        self.v_line += 1;
        if self.v_line >= self.vertical_total() {
            self.v_line = 0;
            self.v_blank = false;
            self.v_retrace = false;
            self.blink_counter = self.blink_counter.wrapping_add(1);
            self.screen_start = self.start_address();
        }
    }

    fn start_address(&self) -> u32 {
        let lo = self.cr[0x0D] as u32;
        let mid = self.cr[0x0C] as u32;
        let high = (self.cr[0x1B] & 0x01) as u32;
        (high << 16) | (mid << 8) | lo
    }

    fn push_frame(&mut self) {
        let width = self.visible_width();
        let height = self.vertical_display_end();
        if width == 0 || height == 0 {
            return;
        }
        if self.frame_width != width as u32 || self.frame_height != height as u32 {
            self.frame_width = width as u32;
            self.frame_height = height as u32;
            self.framebuffer = vec![0; (width as usize) * (height as usize)];
        }
        self.render_frame();
        self.frame_ready = true;
    }

    fn visible_width(&self) -> u16 {
        let chars = self.horizontal_display_end();
        if self.chain4_enabled() || self.pixel_format() != super::dac::PixelFormat::Indexed {
            chars.saturating_mul(if self.sr[0x01] & 0x01 != 0 { 8 } else { 9 })
        } else {
            chars.saturating_mul(8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode13h(svga: &mut Svga) {
        svga.pci.command = 0x03;
        svga.cr[0x00] = 99; // horizontal total
        svga.cr[0x01] = 79; // horizontal display end -> 80 chars * 8px low-res... used loosely
        svga.cr[0x06] = 0x0D;
        svga.cr[0x12] = 0xBF; // vertical display end 200-1
        svga.sr[0x04] = 0x08; // chain-4
    }

    #[test]
    fn vertical_display_end_triggers_a_frame_push() {
        let mut svga = Svga::new(1_000_000);
        mode13h(&mut svga);
        svga.v_line = svga.vertical_display_end();
        svga.h_char = svga.horizontal_total() - 1;
        svga.frame_ready = false;
        svga.step_character();
        assert!(svga.frame_ready);
    }

    #[test]
    fn vertical_total_wraps_and_advances_blink_counter() {
        let mut svga = Svga::new(1_000_000);
        mode13h(&mut svga);
        let before = svga.blink_counter;
        svga.v_line = svga.vertical_total() - 1;
        svga.h_char = svga.horizontal_total() - 1;
        svga.step_character();
        assert_eq!(svga.v_line, 0);
        assert_eq!(svga.blink_counter, before.wrapping_add(1));
    }

    #[test]
    fn vclk_hz_halves_when_dot_clock_divide_by_two_is_set() {
        let mut svga = Svga::new(1_000_000);
        let undivided = svga.vclk_hz();
        svga.sr[0x01] = 0x08;
        assert_eq!(svga.vclk_hz(), undivided / 2);
    }

    #[test]
    fn vclk_hz_follows_the_num_den_pair_selected_by_misc_output() {
        let mut svga = Svga::new(1_000_000);
        svga.sr[0x16] = 99; // clock slot 1 numerator
        svga.sr[0x17] = 50; // clock slot 1 denominator
        svga.misc_output = 0x04; // select clock slot 1

        assert_eq!(svga.vclk_hz(), 14_318_180 * 99 / 50);
    }
}
