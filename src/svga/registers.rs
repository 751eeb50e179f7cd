/*!
Indexed register-bank writes: sequencer (SR), graphics controller (GR),
CRTC (CR, write-protected via CR11), attribute controller (AR, single
toggle-addressed port) and the misc output / HDR "magic" pixel-mask port
(spec §4.8 "Register model").
*/

use super::Svga;

/// CR registers 0..=7 are write-protected once CR11 bit 7 is set, matching
/// real VGA's "lock the display-timing registers" convention.
const CR_WRITE_PROTECT_REG: u8 = 0x11;
const CR_WRITE_PROTECT_BIT: u8 = 0x80;

/// Extended sequencer register holding the hardware cursor enable bit.
const SR_CURSOR_CONTROL: u8 = 0x12;
const SR_CURSOR_ENABLE_BIT: u8 = 0x01;

/// Extended CRTC registers holding the hardware cursor's X/Y position, low
/// byte plus a high nibble each (spec §4.8 "Cursor overlay").
const CR_CURSOR_X_LO: u8 = 0x13;
const CR_CURSOR_X_HI: u8 = 0x14;
const CR_CURSOR_Y_LO: u8 = 0x16;
const CR_CURSOR_Y_HI: u8 = 0x17;

impl Svga {
    pub(super) fn write_sr(&mut self, val: u8) {
        let idx = self.sr_index & 0x1F;
        self.sr[idx as usize] = val;
        if idx == SR_CURSOR_CONTROL {
            self.cursor_enabled = val & SR_CURSOR_ENABLE_BIT != 0;
        }
    }

    pub(super) fn write_gr(&mut self, val: u8) {
        self.gr[(self.gr_index & 0x1F) as usize] = val;
    }

    pub(super) fn write_cr(&mut self, val: u8) {
        let idx = self.cr_index & 0x1F;
        if idx < 8 && self.cr[CR_WRITE_PROTECT_REG as usize] & CR_WRITE_PROTECT_BIT != 0 {
            log::warn!("svga: write to CR{idx:#04x} ignored, CR11 write-protect is set");
            return;
        }
        self.cr[idx as usize] = val;
        match idx {
            CR_CURSOR_X_LO | CR_CURSOR_X_HI => {
                self.cursor_x = self.cr[CR_CURSOR_X_LO as usize] as u16
                    | ((self.cr[CR_CURSOR_X_HI as usize] & 0x0F) as u16) << 8;
            }
            CR_CURSOR_Y_LO | CR_CURSOR_Y_HI => {
                self.cursor_y = self.cr[CR_CURSOR_Y_LO as usize] as u16
                    | ((self.cr[CR_CURSOR_Y_HI as usize] & 0x0F) as u16) << 8;
            }
            _ => {}
        }
    }

    /// Port `0x3C0`: address/data toggle on a single port. The first write
    /// after an attribute-port flip-flop reset latches the register index
    /// (and the palette-source bit); the next write supplies the data.
    pub(super) fn write_attribute_port(&mut self, val: u8) {
        if !self.ar_flipflop {
            self.ar_index = val & 0x1F;
            self.ar_flipflop = true;
        } else {
            self.ar[(self.ar_index & 0x1F) as usize] = val;
            self.ar_flipflop = false;
        }
    }

    /// Reading `0x3BA`/`0x3DA` (input status 1) resets the attribute-port
    /// flip-flop as a side effect, matching real hardware; callers do that
    /// reset themselves before calling this so the bits returned here are
    /// just the blank/retrace status.
    pub(super) fn input_status_1(&self) -> u8 {
        let mut byte = 0;
        if self.v_retrace {
            byte |= 0x08;
        }
        if self.h_blank || self.v_blank {
            byte |= 0x01;
        }
        byte
    }

    /// Port `0x3C6`: the pixel-mask register doubles as the HDR once four
    /// consecutive reads have occurred without an intervening write, per
    /// the CL-GD5446's documented "magic cookie" sequence.
    pub(super) fn write_pel_mask(&mut self, val: u8) {
        if self.pel_mask_read_streak >= 4 {
            self.hdr = val;
        } else {
            self.pel_mask = val;
        }
        self.pel_mask_read_streak = 0;
    }

    pub(super) fn read_pel_mask_or_hdr(&mut self) -> u8 {
        if self.pel_mask_read_streak >= 4 {
            self.hdr
        } else {
            self.pel_mask_read_streak += 1;
            self.pel_mask
        }
    }

    pub fn memory_map_select(&self) -> u8 {
        (self.gr[0x06] >> 2) & 0x03
    }

    pub fn chain4_enabled(&self) -> bool {
        self.sr[0x04] & 0x08 != 0
    }

    pub fn odd_even_enabled(&self) -> bool {
        self.sr[0x04] & 0x04 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cr_write_protect_blocks_registers_0_to_7() {
        let mut svga = Svga::new(1_000_000);
        svga.pci.command = 0x03;
        svga.io_write(0x3D4, CR_WRITE_PROTECT_REG);
        svga.io_write(0x3D5, CR_WRITE_PROTECT_BIT);
        svga.io_write(0x3D4, 0x00);
        svga.io_write(0x3D5, 0x55);
        svga.io_write(0x3D4, 0x00);
        assert_eq!(svga.io_read(0x3D5), 0x00, "CR0 must stay untouched while locked");
    }

    #[test]
    fn pel_mask_port_switches_to_hdr_after_four_reads() {
        let mut svga = Svga::new(1_000_000);
        svga.pci.command = 0x03;
        svga.io_write(0x3C6, 0xAA); // pel mask
        for _ in 0..4 {
            svga.io_read(0x3C6);
        }
        svga.io_write(0x3C6, 0x01); // now targets HDR
        assert_eq!(svga.hdr, 0x01);
        assert_eq!(svga.pel_mask, 0xAA);
    }

    #[test]
    fn cursor_enable_and_position_registers_update_cached_fields() {
        let mut svga = Svga::new(1_000_000);
        svga.pci.command = 0x03;

        svga.io_write(0x3C4, SR_CURSOR_CONTROL);
        svga.io_write(0x3C5, 0x01);
        assert!(svga.cursor_enabled);

        svga.io_write(0x3D4, CR_CURSOR_X_LO);
        svga.io_write(0x3D5, 0x34);
        svga.io_write(0x3D4, CR_CURSOR_X_HI);
        svga.io_write(0x3D5, 0x02);
        assert_eq!(svga.cursor_x, 0x234);

        svga.io_write(0x3D4, CR_CURSOR_Y_LO);
        svga.io_write(0x3D5, 0x78);
        svga.io_write(0x3D4, CR_CURSOR_Y_HI);
        svga.io_write(0x3D5, 0x01);
        assert_eq!(svga.cursor_y, 0x178);
    }

    #[test]
    fn attribute_port_toggles_index_then_data() {
        let mut svga = Svga::new(1_000_000);
        svga.pci.command = 0x03;
        svga.ar_flipflop = false;
        svga.io_write(0x3C0, 0x0D); // index
        svga.io_write(0x3C0, 0x3F); // data -> AR[0x0D]
        assert_eq!(svga.ar[0x0D], 0x3F);
    }
}
