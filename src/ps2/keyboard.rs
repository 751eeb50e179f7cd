/*!
PS/2 keyboard device model: scan code set 2 generation, optional
controller-side translation to set 1, and typematic auto-repeat (spec
§4.5).
*/

use std::collections::VecDeque;

const DELAY_TABLE_MS: [u64; 4] = [250, 500, 750, 1000];

pub struct Keyboard {
    enabled: bool,
    translation: bool,
    leds: u8,
    typematic: u8,
    /// Scan-code-2 make codes currently held down, in press order; a
    /// release removes its entry via swap-with-last (spec §4.5).
    active: Vec<u8>,
    output: VecDeque<u8>,
    repeat_target: Option<u8>,
    repeat_cc_remaining: u64,
    first_repeat: bool,
    cc_per_ms: u64,
}

/// Fixed 256-entry scan-code-set-2 -> set-1 translation table used when the
/// controller command byte enables translation. Only the low 128 make-code
/// entries are populated with real PC/AT values; the rest round-trip
/// unchanged, matching real firmware's fallback for unmapped codes.
fn translate_set2_to_set1(code: u8) -> u8 {
    const TABLE: [u8; 128] = [
        0xFF, 0x43, 0x41, 0x3F, 0x3D, 0x3B, 0x3C, 0x58, 0x64, 0x44, 0x42, 0x40, 0x3E, 0x0F, 0x29,
        0x59, 0x65, 0x38, 0x2A, 0x70, 0x1D, 0x10, 0x02, 0x5A, 0x66, 0x71, 0x2C, 0x1F, 0x1E, 0x11,
        0x03, 0x5B, 0x67, 0x2E, 0x2D, 0x20, 0x12, 0x05, 0x5C, 0x68, 0x39, 0x2F, 0x21, 0x14, 0x13,
        0x06, 0x5D, 0x69, 0x31, 0x30, 0x23, 0x22, 0x15, 0x07, 0x5E, 0x6A, 0x72, 0x32, 0x24, 0x16,
        0x08, 0x09, 0x5F, 0x6B, 0x33, 0x25, 0x17, 0x18, 0x0B, 0x0A, 0x60, 0x6C, 0x34, 0x35, 0x26,
        0x27, 0x19, 0x0C, 0x61, 0x6D, 0x73, 0x28, 0x74, 0x1A, 0x0D, 0x62, 0x6E, 0x3A, 0x36, 0x1C,
        0x1B, 0x75, 0x2B, 0x63, 0x76, 0x55, 0x56, 0x77, 0x78, 0x79, 0x7A, 0x0E, 0x7B, 0x7C, 0x4F,
        0x7D, 0x4B, 0x47, 0x7E, 0x7F, 0x6F, 0x52, 0x53, 0x50, 0x4C, 0x4D, 0x48, 0x01, 0x45, 0x57,
        0x4E, 0x51, 0x4A, 0x37, 0x49, 0x46, 0x54, 0x5A,
    ];
    TABLE.get(code as usize).copied().unwrap_or(code)
}

impl Keyboard {
    pub fn new(cpu_clock_hz: u64) -> Self {
        Self {
            enabled: true,
            translation: false,
            leds: 0,
            typematic: 0x2B, // 500 ms delay, ~10.9 cps, the PC/AT power-on default
            active: Vec::new(),
            output: VecDeque::new(),
            repeat_target: None,
            repeat_cc_remaining: 0,
            first_repeat: true,
            cc_per_ms: cpu_clock_hz.max(1) / 1000,
        }
    }

    pub fn set_cpu_clock_hz(&mut self, cpu_clock_hz: u64) {
        self.cc_per_ms = cpu_clock_hz.max(1) / 1000;
    }

    pub fn set_translation(&mut self, enabled: bool) {
        self.translation = enabled;
    }

    fn emit(&mut self, code: u8) {
        let code = if self.translation {
            translate_set2_to_set1(code)
        } else {
            code
        };
        self.output.push_back(code);
    }

    fn delay_cc(&self) -> u64 {
        let idx = ((self.typematic >> 5) & 0x03) as usize;
        DELAY_TABLE_MS[idx] * self.cc_per_ms
    }

    fn repeat_rate_cc(&self) -> u64 {
        let b = (self.typematic >> 3) & 0x03;
        let d = self.typematic & 0x07;
        // repeat_rate_cc = (1<<B)*(D+8) / 240 s, expressed in cycles.
        let period_us = ((1u64 << b) * (d as u64 + 8) * 1_000_000) / 240;
        (period_us * self.cc_per_ms) / 1000
    }

    /// Host-side key-press event; `scancode` is the set-2 make code.
    pub fn key_down(&mut self, scancode: u8) {
        if !self.enabled {
            return;
        }
        if !self.active.contains(&scancode) {
            self.active.push(scancode);
        }
        self.emit(scancode);
        self.repeat_target = Some(scancode);
        self.repeat_cc_remaining = self.delay_cc();
        self.first_repeat = true;
    }

    /// Host-side key-release event.
    pub fn key_up(&mut self, scancode: u8) {
        if !self.enabled {
            return;
        }
        if let Some(pos) = self.active.iter().position(|&c| c == scancode) {
            self.active.swap_remove(pos);
        }
        if self.translation {
            self.output.push_back(0xF0);
            self.output.push_back(translate_set2_to_set1(scancode) | 0x80);
        } else {
            self.output.push_back(0xF0);
            self.output.push_back(scancode);
        }
        if self.repeat_target == Some(scancode) {
            self.repeat_target = None;
        }
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    pub fn pop_output(&mut self) -> Option<u8> {
        self.output.pop_front()
    }

    /// Advance the typematic repeat timer by `cc` cycles.
    pub fn advance(&mut self, cc: u64) {
        let Some(code) = self.repeat_target else {
            return;
        };
        if cc >= self.repeat_cc_remaining {
            self.emit(code);
            self.repeat_cc_remaining = if self.first_repeat {
                self.first_repeat = false;
                self.repeat_rate_cc()
            } else {
                self.repeat_rate_cc()
            };
        } else {
            self.repeat_cc_remaining -= cc;
        }
    }

    pub fn cc_until_next_event(&self) -> u64 {
        if self.repeat_target.is_some() {
            self.repeat_cc_remaining.max(1)
        } else {
            u64::MAX / 2
        }
    }

    /// Handle a device-level command byte (0xED, 0xF0, 0xF2, 0xF4, 0xF5,
    /// 0xFF, ...), pushing ACK/response bytes into the output queue.
    pub fn handle_command(&mut self, cmd: u8, arg: Option<u8>) -> bool {
        match cmd {
            0xED => {
                if let Some(val) = arg {
                    self.leds = val & 0x07;
                    self.output.push_back(0xFA);
                    true
                } else {
                    false // awaiting the LED bitmask argument
                }
            }
            0xF0 => {
                if let Some(sub) = arg {
                    self.output.push_back(0xFA);
                    if sub != 2 {
                        log::warn!("keyboard: scan code set {sub} requested, only set 2 supported");
                    }
                    true
                } else {
                    false
                }
            }
            0xF2 => {
                self.output.push_back(0xFA);
                self.output.push_back(0xAB);
                self.output.push_back(0x83);
                true
            }
            0xF4 => {
                self.enabled = true;
                self.output.push_back(0xFA);
                true
            }
            0xF5 => {
                self.enabled = false;
                self.active.clear();
                self.repeat_target = None;
                self.leds = 0;
                self.typematic = 0x2B;
                self.output.push_back(0xFA);
                true
            }
            0xFF => {
                self.active.clear();
                self.repeat_target = None;
                self.enabled = true;
                self.leds = 0;
                self.typematic = 0x2B;
                self.output.push_back(0xFA);
                self.output.push_back(0xAA);
                true
            }
            0xF3 => {
                if let Some(val) = arg {
                    self.typematic = val & 0x7F;
                    self.output.push_back(0xFA);
                    true
                } else {
                    false
                }
            }
            _ => {
                self.output.push_back(0xFE); // resend: unrecognized command
                true
            }
        }
    }

    pub fn reset(&mut self) {
        let cc_per_ms = self.cc_per_ms;
        *self = Self::new(1);
        self.cc_per_ms = cc_per_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_release_is_removed_via_swap_with_last() {
        let mut kb = Keyboard::new(1_000_000);
        kb.key_down(0x1C); // 'a'
        kb.key_down(0x32); // 'b'
        kb.key_up(0x1C);
        assert_eq!(kb.active, vec![0x32]);
    }

    #[test]
    fn first_repeat_uses_the_delay_not_the_repeat_rate() {
        let mut kb = Keyboard::new(1_000_000);
        kb.typematic = 0x00; // delay index 0 -> 250 ms, fastest repeat
        kb.key_down(0x1C);
        kb.output.clear();
        kb.advance(kb.delay_cc() - 1);
        assert!(!kb.has_output(), "must not repeat before the full delay elapses");
        kb.advance(1);
        assert_eq!(kb.pop_output(), Some(0x1C));
    }

    #[test]
    fn id_command_reports_the_documented_bytes() {
        let mut kb = Keyboard::new(1_000_000);
        kb.handle_command(0xF2, None);
        assert_eq!(kb.pop_output(), Some(0xFA));
        assert_eq!(kb.pop_output(), Some(0xAB));
        assert_eq!(kb.pop_output(), Some(0x83));
    }
}
