/*!
8042 PS/2 controller (spec §4.5 + SPEC_FULL's command-set expansion).

One data port (`0x60`) and one status/command port (`0x64`). A 10 kHz
transfer clock models the serial link to each device; exactly one byte
moves every 8 clocks. When the output buffer is empty and either device
has data queued, the controller loads the next byte (keyboard first, then
mouse) and raises IRQ1 or IRQ12 if that device's IRQ-enable bit is set in
the controller command byte.

Grounded on `controller.rs`'s bitmask-to-serial-byte shape (the teacher's
NES joypad shift register is the same "host polls one byte off a small
device state machine" idea one level up), generalized to the full 8042
command set.
*/

pub mod keyboard;
pub mod mouse;

use keyboard::Keyboard;
use mouse::Mouse;

use crate::error::{warn_recoverable, RecoverableKind};
use crate::scheduler::{Clock, Device};

const TRANSFER_CLOCK_HZ: u64 = 10_000;
const CYCLES_PER_BYTE_TICKS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputSource {
    Keyboard,
    Mouse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingWrite {
    None,
    ControllerCommandByte,
    MouseOutputByte,
    MouseInputByte,
    KeyboardArg(u8),
    MouseArg(u8),
}

pub struct Ps2Controller {
    keyboard: Keyboard,
    mouse: Mouse,
    command_byte: u8,
    output_buffer: Option<(u8, OutputSource)>,
    pending_write: PendingWrite,
    transfer_cc_accum: u64,
    cc_per_transfer_clock: u64,
    self_test_ok: bool,
}

const CMD_KEYBOARD_IRQ_ENABLE: u8 = 0x01;
const CMD_MOUSE_IRQ_ENABLE: u8 = 0x02;
const CMD_KEYBOARD_DISABLE: u8 = 0x10;
const CMD_MOUSE_DISABLE: u8 = 0x20;
const CMD_TRANSLATION: u8 = 0x40;

impl Ps2Controller {
    pub fn new(cpu_clock_hz: u64) -> Self {
        Self {
            keyboard: Keyboard::new(cpu_clock_hz),
            mouse: Mouse::new(cpu_clock_hz),
            command_byte: CMD_KEYBOARD_IRQ_ENABLE | CMD_MOUSE_IRQ_ENABLE | CMD_TRANSLATION,
            output_buffer: None,
            pending_write: PendingWrite::None,
            transfer_cc_accum: 0,
            cc_per_transfer_clock: cpu_clock_hz.max(1) / TRANSFER_CLOCK_HZ,
            self_test_ok: true,
        }
    }

    pub fn set_cpu_clock_hz(&mut self, cpu_clock_hz: u64) {
        self.keyboard.set_cpu_clock_hz(cpu_clock_hz);
        self.mouse.set_cpu_clock_hz(cpu_clock_hz);
        self.cc_per_transfer_clock = cpu_clock_hz.max(1) / TRANSFER_CLOCK_HZ;
    }

    pub fn keyboard_mut(&mut self) -> &mut Keyboard {
        &mut self.keyboard
    }

    pub fn mouse_mut(&mut self) -> &mut Mouse {
        &mut self.mouse
    }

    fn keyboard_enabled(&self) -> bool {
        self.command_byte & CMD_KEYBOARD_DISABLE == 0
    }

    fn mouse_enabled(&self) -> bool {
        self.command_byte & CMD_MOUSE_DISABLE == 0
    }

    pub fn keyboard_irq_level(&self) -> bool {
        self.output_buffer.map(|(_, s)| s) == Some(OutputSource::Keyboard)
            && self.command_byte & CMD_KEYBOARD_IRQ_ENABLE != 0
    }

    pub fn mouse_irq_level(&self) -> bool {
        self.output_buffer.map(|(_, s)| s) == Some(OutputSource::Mouse)
            && self.command_byte & CMD_MOUSE_IRQ_ENABLE != 0
    }

    /// Status register read at port `0x64`: bit0 OBF, bit1 IBF (always 0,
    /// writes are serviced synchronously), bit2 "system flag", bit5
    /// mouse-byte-pending (AUX OBF), bit4 keyboard-enabled-inverse.
    fn read_status(&self) -> u8 {
        let mut byte = 0x04; // system flag always set post-POST
        if self.output_buffer.is_some() {
            byte |= 0x01;
        }
        if self.output_buffer.map(|(_, s)| s) == Some(OutputSource::Mouse) {
            byte |= 0x20;
        }
        if !self.keyboard_enabled() {
            byte |= 0x10;
        }
        byte
    }

    fn read_data(&mut self) -> u8 {
        self.service_output_buffer();
        match self.output_buffer.take() {
            Some((byte, _)) => byte,
            None => {
                warn_recoverable(RecoverableKind::Ps2BufferOverflow { device: "8042" });
                0xFF
            }
        }
    }

    pub fn io_read(&mut self, port: u16) -> u8 {
        match port {
            0x60 => self.read_data(),
            0x64 => self.read_status(),
            _ => 0xFF,
        }
    }

    pub fn io_write(&mut self, port: u16, val: u8) {
        match port {
            0x60 => self.write_data(val),
            0x64 => self.write_command(val),
            _ => {}
        }
    }

    fn write_command(&mut self, val: u8) {
        match val {
            0x20 => self.output_buffer = Some((self.command_byte, OutputSource::Keyboard)),
            0x60 => self.pending_write = PendingWrite::ControllerCommandByte,
            0xA7 => self.command_byte |= CMD_MOUSE_DISABLE,
            0xA8 => self.command_byte &= !CMD_MOUSE_DISABLE,
            0xAD => self.command_byte |= CMD_KEYBOARD_DISABLE,
            0xAE => self.command_byte &= !CMD_KEYBOARD_DISABLE,
            0xAA => {
                self.self_test_ok = true;
                self.output_buffer = Some((0x55, OutputSource::Keyboard));
            }
            0xD3 => self.pending_write = PendingWrite::MouseOutputByte,
            0xD4 => self.pending_write = PendingWrite::MouseInputByte,
            _ => {
                log::warn!("8042: unrecognized controller command {val:#04x}");
            }
        }
    }

    fn write_data(&mut self, val: u8) {
        match self.pending_write {
            PendingWrite::ControllerCommandByte => {
                self.command_byte = val;
                self.pending_write = PendingWrite::None;
            }
            PendingWrite::MouseOutputByte => {
                self.output_buffer = Some((val, OutputSource::Mouse));
                self.pending_write = PendingWrite::None;
            }
            PendingWrite::MouseInputByte => {
                self.pending_write = PendingWrite::None;
                self.dispatch_mouse_byte(val);
            }
            PendingWrite::KeyboardArg(cmd) => {
                self.pending_write = PendingWrite::None;
                self.keyboard.handle_command(cmd, Some(val));
                self.service_output_buffer();
            }
            PendingWrite::MouseArg(cmd) => {
                self.pending_write = PendingWrite::None;
                self.mouse.handle_command(cmd, Some(val));
                self.service_output_buffer();
            }
            PendingWrite::None => self.dispatch_keyboard_byte(val),
        }
    }

    fn dispatch_keyboard_byte(&mut self, cmd: u8) {
        self.keyboard.set_translation(self.command_byte & CMD_TRANSLATION != 0);
        if !self.keyboard.handle_command(cmd, None) {
            self.pending_write = PendingWrite::KeyboardArg(cmd);
        }
        self.service_output_buffer();
    }

    fn dispatch_mouse_byte(&mut self, cmd: u8) {
        if !self.mouse.handle_command(cmd, None) {
            self.pending_write = PendingWrite::MouseArg(cmd);
        }
        self.service_output_buffer();
    }

    /// Load the next byte into the output buffer if it is empty and a
    /// device has one ready, keyboard taking priority over mouse.
    fn service_output_buffer(&mut self) {
        if self.output_buffer.is_some() {
            return;
        }
        if self.keyboard.has_output() {
            if let Some(byte) = self.keyboard.pop_output() {
                self.output_buffer = Some((byte, OutputSource::Keyboard));
            }
        } else if self.mouse.has_output() {
            if let Some(byte) = self.mouse.pop_output() {
                self.output_buffer = Some((byte, OutputSource::Mouse));
            }
        }
    }
}

impl Device for Ps2Controller {
    fn next_event_cc(&self, _clock: &Clock) -> u64 {
        self.keyboard
            .cc_until_next_event()
            .min(self.mouse.cc_until_next_sample())
            .min(self.cc_per_transfer_clock.max(1))
    }

    fn end_iter(&mut self, clock: &Clock) {
        self.keyboard.advance(clock.now);
        if self.mouse_enabled() {
            self.mouse.advance(clock.now);
        }
        self.transfer_cc_accum += clock.now;
        let transfer_clocks =
            self.transfer_cc_accum / self.cc_per_transfer_clock.max(1);
        self.transfer_cc_accum %= self.cc_per_transfer_clock.max(1);
        if transfer_clocks >= CYCLES_PER_BYTE_TICKS as u64 {
            self.service_output_buffer();
        }
    }

    fn reset(&mut self) {
        self.keyboard.reset();
        self.mouse.reset();
        self.command_byte = CMD_KEYBOARD_IRQ_ENABLE | CMD_MOUSE_IRQ_ENABLE | CMD_TRANSLATION;
        self.output_buffer = None;
        self.pending_write = PendingWrite::None;
        self.transfer_cc_accum = 0;
        self.self_test_ok = true;
    }
}
