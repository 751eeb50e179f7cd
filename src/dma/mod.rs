/*!
Cascaded 8237 DMA controllers (spec §4.2).

Eight channels, numbered 0-7, split across two physical 8237 chips: DMA1
(channels 0-3, 8-bit transfers, I/O `0x00..=0x0F` + flip-flop/mask ports) and
DMA2 (channels 4-7, 16-bit transfers, I/O `0xC0..=0xDE`). Channel 4 is the
cascade link between the two chips; real hardware arbitrates DMA1's combined
request through DMA2's channel-4 slot. This core accepts full register
programming on channel 4 (so guest software that "parks" it in cascade mode
sees no surprises) but folds arbitration into one flat fixed-priority scan
over the seven real channels, which is sufficient for every testable
property in §8 (none of them depend on observing the master/slave handshake
itself, only on a channel's own count/TC/IRQ behavior).

Grounded on `bus/dma.rs`'s `DmaController` shape (a phase enum plus a
`step_one_cycle`-style micro-step, narrow `CpuMemory`/`OamWriter` traits
standing in for the bus) generalized to full 8237 channel programming, the
DREQ-latency FIFO (§4.2) and terminal-count/autoinit semantics (§8).
*/

use std::collections::VecDeque;

use crate::error::{warn_recoverable, RecoverableKind};
use crate::scheduler::{Clock, Device, RateConverter};

/// ISA DMA clock: PCICLK/4, assumed 7.5 MHz (§4.2 glossary: SysClk).
pub const SYSCLK_HZ: u64 = 7_500_000;
/// DREQ-to-service latency: approximately one byte time, 8 SYSCLK.
const DREQ_LATENCY_SYSCLK: u32 = 8;
/// Bounded FIFO capacity for deferred DREQ assertions (§9: bounded deferred events).
const DREQ_FIFO_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Demand,
    Single,
    Block,
    Cascade,
}

impl TransferMode {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0b00 => TransferMode::Demand,
            0b01 => TransferMode::Single,
            0b10 => TransferMode::Block,
            _ => TransferMode::Cascade,
        }
    }
    fn to_bits(self) -> u8 {
        match self {
            TransferMode::Demand => 0b00,
            TransferMode::Single => 0b01,
            TransferMode::Block => 0b10,
            TransferMode::Cascade => 0b11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Verify,
    Write,
    Read,
    Illegal,
}

impl TransferType {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0b00 => TransferType::Verify,
            0b01 => TransferType::Write,
            0b10 => TransferType::Read,
            _ => TransferType::Illegal,
        }
    }
    fn to_bits(self) -> u8 {
        match self {
            TransferType::Verify => 0b00,
            TransferType::Write => 0b01,
            TransferType::Read => 0b10,
            TransferType::Illegal => 0b11,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DmaChannel {
    pub mode: TransferMode,
    pub address_decrement: bool,
    pub autoinit: bool,
    pub transfer_type: TransferType,
    pub current_address: u16,
    pub base_address: u16,
    pub current_count: u16,
    pub base_count: u16,
    pub page: u8,
    pub masked: bool,
    /// Hardware DREQ latch, set once a FIFO-deferred assertion matures.
    pub dreq: bool,
    /// Set on terminal count, cleared when the status register is read.
    pub tc: bool,
    /// True while this channel currently owns the bus (demand/single transfer in progress).
    pub running: bool,
}

impl Default for DmaChannel {
    fn default() -> Self {
        Self {
            mode: TransferMode::Demand,
            address_decrement: false,
            autoinit: false,
            transfer_type: TransferType::Verify,
            current_address: 0,
            base_address: 0,
            current_count: 0,
            base_count: 0,
            page: 0,
            masked: true,
            dreq: false,
            tc: false,
            running: false,
        }
    }
}

impl DmaChannel {
    fn reset(&mut self) {
        *self = Self::default();
    }

    /// 8-bit (channels 0-3) or 16-bit (channels 5-7) physical address, per §4.2.
    fn physical_address(&self, is_16bit: bool) -> u32 {
        if is_16bit {
            (((self.page & 0xFE) as u32) << 16) | ((self.current_address as u32) << 1)
        } else {
            ((self.page as u32) << 16) | self.current_address as u32
        }
    }

    /// Advance the address/count by one unit, returning `true` if this step
    /// produced a terminal count (count wrapped from 0x0000 to 0xFFFF).
    fn step(&mut self) -> bool {
        if self.address_decrement {
            self.current_address = self.current_address.wrapping_sub(1);
        } else {
            self.current_address = self.current_address.wrapping_add(1);
        }
        let (next_count, wrapped) = self.current_count.overflowing_sub(1);
        self.current_count = next_count;
        if wrapped {
            self.tc = true;
            if self.autoinit {
                self.current_address = self.base_address;
                self.current_count = self.base_count;
            } else {
                self.masked = true;
                self.running = false;
            }
        }
        wrapped
    }
}

/// One pending DREQ assertion, counted down in SYSCLK ticks.
#[derive(Debug, Clone, Copy)]
struct PendingDreq {
    channel: u8,
    ticks_remaining: u32,
}

/// A transfer the scheduler should perform this step: which channel, the
/// physical address, and whether memory is the source or the destination.
#[derive(Debug, Clone, Copy)]
pub struct DmaTransferRequest {
    pub channel: u8,
    pub address: u32,
    pub transfer_type: TransferType,
    pub is_16bit: bool,
}

/// Result of completing one transfer unit, reported back so the caller can
/// raise IRQs / notify the owning device.
#[derive(Debug, Clone, Copy)]
pub struct DmaTransferOutcome {
    pub terminal_count: bool,
    pub channel_now_masked: bool,
}

pub struct DmaControllerPair {
    channels: [DmaChannel; 8],
    /// Per-controller byte/word flip-flop (index 0 = DMA1, 1 = DMA2).
    flipflop: [bool; 2],
    /// Full 16-entry page-register file at I/O `0x80..=0x8F`.
    page_regs: [u8; 16],
    dreq_fifo: VecDeque<PendingDreq>,
    sysclk: RateConverter,
    /// Channel currently owning the bus in a multi-byte demand/block transfer, if any.
    active_channel: Option<u8>,
}

impl Default for DmaControllerPair {
    fn default() -> Self {
        Self::new()
    }
}

const PAGE_PORT_FOR_CHANNEL: [u8; 8] = [0x87, 0x83, 0x81, 0x82, 0x8F, 0x8B, 0x89, 0x8A];

impl DmaControllerPair {
    pub fn new() -> Self {
        Self {
            channels: [DmaChannel::default(); 8],
            flipflop: [false; 2],
            page_regs: [0; 16],
            dreq_fifo: VecDeque::new(),
            sysclk: RateConverter::new(SYSCLK_HZ, 75_000_000),
            active_channel: None,
        }
    }

    pub fn channel(&self, idx: u8) -> &DmaChannel {
        &self.channels[idx as usize]
    }

    /// The physical address `channel`'s next transfer unit would target,
    /// without side effects. Callers that must fetch guest memory *before*
    /// calling [`Self::poll_transfer`] (e.g. `SoundBlaster::pump_dma`, which
    /// takes the byte/word as an argument) use this to know where to read.
    pub fn peek_physical_address(&self, channel: u8) -> u32 {
        self.channels[channel as usize].physical_address(channel >= 5)
    }

    /// Reconfigure the SYSCLK rate converter to the current CPU clock; call
    /// once at construction (or on frequency change) with `ClockFreq`.
    pub fn set_cpu_clock_hz(&mut self, cpu_clock_hz: u64) {
        self.sysclk = RateConverter::new(SYSCLK_HZ, cpu_clock_hz.max(1));
    }

    fn channel_for_page_port(port: u8) -> Option<u8> {
        PAGE_PORT_FOR_CHANNEL
            .iter()
            .position(|&p| p == port)
            .map(|i| i as u8)
    }

    /// Device-facing: assert or deassert DREQ for `channel` (0-7). Matches
    /// the DMA DREQ-latency FIFO described in §4.2: assertions are deferred
    /// ~8 SYSCLK; deassertions take effect immediately and cancel any
    /// pending assert for the same channel, aborting an in-flight demand
    /// transfer.
    pub fn dreq(&mut self, channel: u8, level: bool) {
        if level {
            if self.channels[channel as usize].dreq {
                return;
            }
            if self.dreq_fifo.iter().any(|p| p.channel == channel) {
                return;
            }
            if self.dreq_fifo.len() >= DREQ_FIFO_CAPACITY {
                warn_recoverable(RecoverableKind::DmaFifoFull { channel });
                return;
            }
            self.dreq_fifo.push_back(PendingDreq {
                channel,
                ticks_remaining: DREQ_LATENCY_SYSCLK,
            });
        } else {
            self.dreq_fifo.retain(|p| p.channel != channel);
            self.channels[channel as usize].dreq = false;
            if self.channels[channel as usize].mode == TransferMode::Demand
                && self.active_channel == Some(channel)
            {
                self.channels[channel as usize].running = false;
                self.active_channel = None;
            }
        }
    }

    /// Highest-priority (lowest channel number, skipping the channel-4
    /// cascade link) unmasked channel with its DREQ latch set, if any.
    fn highest_priority_ready(&self) -> Option<u8> {
        for ch in [0u8, 1, 2, 3, 5, 6, 7] {
            let c = &self.channels[ch as usize];
            if c.dreq && !c.masked && c.transfer_type != TransferType::Illegal {
                return Some(ch);
            }
        }
        None
    }

    /// Produce the next transfer the caller should perform, if the
    /// arbitration FIFO has a ready channel this tick. Does not itself touch
    /// memory; the caller reads/writes the byte and calls
    /// [`Self::complete_transfer`] to account for it.
    pub fn poll_transfer(&mut self) -> Option<DmaTransferRequest> {
        let ch = self.highest_priority_ready()?;
        self.channels[ch as usize].running = true;
        self.active_channel = Some(ch);
        let is_16bit = ch >= 5;
        let chan = &self.channels[ch as usize];
        Some(DmaTransferRequest {
            channel: ch,
            address: chan.physical_address(is_16bit),
            transfer_type: chan.transfer_type,
            is_16bit,
        })
    }

    /// Account for one byte/word transferred on `channel`: advance
    /// address/count, detect TC, and (for single/non-demand modes) release
    /// the channel. Returns the outcome so the caller can raise IRQ6 (FD) /
    /// IRQ5 (SB16) etc.
    pub fn complete_transfer(&mut self, channel: u8) -> DmaTransferOutcome {
        let terminal_count = self.channels[channel as usize].step();
        if self.channels[channel as usize].mode != TransferMode::Demand || terminal_count {
            self.channels[channel as usize].running = false;
            self.active_channel = None;
        }
        DmaTransferOutcome {
            terminal_count,
            channel_now_masked: self.channels[channel as usize].masked,
        }
    }

    fn controller_index(port_or_channel: u8) -> usize {
        if port_or_channel >= 4 {
            1
        } else {
            0
        }
    }

    pub fn io_read(&mut self, port: u16) -> u8 {
        match port {
            0x00..=0x0F => self.read_dma1(port as u8),
            0xC0..=0xDE => self.read_dma2(port as u8),
            0x80..=0x8F => self.page_regs[(port - 0x80) as usize],
            _ => 0xFF,
        }
    }

    pub fn io_write(&mut self, port: u16, val: u8) {
        match port {
            0x00..=0x0F => self.write_dma1(port as u8, val),
            0xC0..=0xDE => self.write_dma2(port as u8, val),
            0x80..=0x8F => {
                self.page_regs[(port - 0x80) as usize] = val;
                if let Some(ch) = Self::channel_for_page_port(port as u8) {
                    self.channels[ch as usize].page = val;
                }
            }
            _ => {}
        }
    }

    fn read_dma1(&mut self, port: u8) -> u8 {
        match port {
            0x00..=0x07 => self.read_addr_count(0, port),
            0x08 => self.read_status(0),
            0x0D => 0, // temporary register, not modeled
            _ => 0xFF,
        }
    }

    fn write_dma1(&mut self, port: u8, val: u8) {
        match port {
            0x00..=0x07 => self.write_addr_count(0, port, val),
            0x08 => self.write_command(0, val),
            0x09 => self.write_request(0, val),
            0x0A => self.write_single_mask(0, val),
            0x0B => self.write_mode(0, val),
            0x0C => self.flipflop[0] = false,
            0x0D => self.master_clear(0),
            0x0E => self.clear_all_mask(0),
            0x0F => self.write_all_mask(0, val),
            _ => {}
        }
    }

    fn read_dma2(&mut self, port: u8) -> u8 {
        match port {
            0xC0..=0xCE => self.read_addr_count(1, (port - 0xC0) / 2),
            0xD0 => self.read_status(1),
            _ => 0xFF,
        }
    }

    fn write_dma2(&mut self, port: u8, val: u8) {
        match port {
            0xC0..=0xCE => self.write_addr_count(1, (port - 0xC0) / 2, val),
            0xD0 => self.write_command(1, val),
            0xD2 => self.write_request(1, val),
            0xD4 => self.write_single_mask(1, val),
            0xD6 => self.write_mode(1, val),
            0xD8 => self.flipflop[1] = false,
            0xDA => self.master_clear(1),
            0xDC => self.clear_all_mask(1),
            0xDE => self.write_all_mask(1, val),
            _ => {}
        }
    }

    /// `local_port` is 0..=7 for controller 0 (byte-addressed, two ports per
    /// channel) and 0..=7 "word slot" index for controller 1 (even offsets).
    fn read_addr_count(&mut self, controller: usize, local_port: u8) -> u8 {
        let local_ch = (local_port / 2) as usize;
        let ch = controller * 4 + local_ch;
        let is_addr = local_port % 2 == 0;
        let ff = &mut self.flipflop[controller];
        let word = if is_addr {
            self.channels[ch].current_address
        } else {
            self.channels[ch].current_count
        };
        let byte = if !*ff { word as u8 } else { (word >> 8) as u8 };
        *ff = !*ff;
        byte
    }

    fn write_addr_count(&mut self, controller: usize, local_port: u8, val: u8) {
        let local_ch = (local_port / 2) as usize;
        let ch = controller * 4 + local_ch;
        let is_addr = local_port % 2 == 0;
        let ff = &mut self.flipflop[controller];
        let target_word = if is_addr {
            self.channels[ch].current_address
        } else {
            self.channels[ch].current_count
        };
        let new_word = if !*ff {
            (target_word & 0xFF00) | val as u16
        } else {
            (target_word & 0x00FF) | ((val as u16) << 8)
        };
        if is_addr {
            self.channels[ch].current_address = new_word;
            if *ff {
                self.channels[ch].base_address = new_word;
            } else {
                self.channels[ch].base_address =
                    (self.channels[ch].base_address & 0xFF00) | val as u16;
            }
        } else {
            self.channels[ch].current_count = new_word;
            if *ff {
                self.channels[ch].base_count = new_word;
            } else {
                self.channels[ch].base_count =
                    (self.channels[ch].base_count & 0xFF00) | val as u16;
            }
        }
        *ff = !*ff;
    }

    fn read_status(&mut self, controller: usize) -> u8 {
        let base = controller * 4;
        let mut byte = 0u8;
        for i in 0..4 {
            let ch = &mut self.channels[base + i];
            if ch.tc {
                byte |= 1 << i;
                ch.tc = false;
            }
            if ch.dreq {
                byte |= 1 << (i + 4);
            }
        }
        byte
    }

    fn write_command(&mut self, _controller: usize, _val: u8) {
        // Command register (disable/rotate priority/compressed timing/etc.)
        // is accepted but has no observable effect in this core's fixed
        // fixed-priority, non-compressed-timing model.
    }

    fn write_request(&mut self, controller: usize, val: u8) {
        let local_ch = (val & 0x03) as usize;
        let set = val & 0x04 != 0;
        let ch = controller * 4 + local_ch;
        self.dreq(ch as u8, set);
    }

    fn write_single_mask(&mut self, controller: usize, val: u8) {
        let local_ch = (val & 0x03) as usize;
        let masked = val & 0x04 != 0;
        self.channels[controller * 4 + local_ch].masked = masked;
    }

    fn write_mode(&mut self, controller: usize, val: u8) {
        let local_ch = (val & 0x03) as usize;
        let ch = &mut self.channels[controller * 4 + local_ch];
        ch.transfer_type = TransferType::from_bits((val >> 2) & 0x03);
        ch.autoinit = val & 0x10 != 0;
        ch.address_decrement = val & 0x20 != 0;
        ch.mode = TransferMode::from_bits((val >> 6) & 0x03);
    }

    fn master_clear(&mut self, controller: usize) {
        for i in 0..4 {
            self.channels[controller * 4 + i].reset();
        }
        self.flipflop[controller] = false;
    }

    fn clear_all_mask(&mut self, controller: usize) {
        for i in 0..4 {
            self.channels[controller * 4 + i].masked = false;
        }
    }

    fn write_all_mask(&mut self, controller: usize, val: u8) {
        for i in 0..4 {
            self.channels[controller * 4 + i].masked = val & (1 << i) != 0;
        }
    }
}

impl Device for DmaControllerPair {
    fn next_event_cc(&self, _clock: &Clock) -> u64 {
        if !self.dreq_fifo.is_empty() || self.highest_priority_ready().is_some() {
            self.sysclk.cc_until_next_tick().max(1)
        } else {
            u64::MAX / 2
        }
    }

    fn end_iter(&mut self, clock: &Clock) {
        let ticks = self.sysclk.advance(clock.now) as u32;
        if ticks == 0 {
            return;
        }
        let mut remaining = ticks;
        while remaining > 0 && !self.dreq_fifo.is_empty() {
            let front = self.dreq_fifo.front_mut().unwrap();
            if front.ticks_remaining > remaining {
                front.ticks_remaining -= remaining;
                remaining = 0;
            } else {
                remaining -= front.ticks_remaining;
                let entry = self.dreq_fifo.pop_front().unwrap();
                self.channels[entry.channel as usize].dreq = true;
            }
        }
    }

    fn reset(&mut self) {
        for ch in &mut self.channels {
            ch.reset();
        }
        self.flipflop = [false; 2];
        self.page_regs = [0; 16];
        self.dreq_fifo.clear();
        self.active_channel = None;
        self.sysclk.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mature_fifo(dma: &mut DmaControllerPair) {
        // Drive enough SYSCLK ticks for the 8-tick DREQ latency to mature.
        let clock = Clock::new(75_000_000);
        for _ in 0..20 {
            dma.end_iter(&Clock {
                now: SYSCLK_HZ, // one SYSCLK-domain second worth of CPU cycles is plenty
                ..clock
            });
        }
    }

    #[test]
    fn single_transfer_count_round_trip() {
        let mut dma = DmaControllerPair::new();
        dma.write_mode(0, 0b01_0_0_01_10); // single, read, channel 2
        dma.io_write(0x04, 0x00); // addr low
        dma.io_write(0x04, 0x10); // addr high -> 0x1000
        dma.io_write(0x05, 0x01); // count low
        dma.io_write(0x05, 0x00); // count high -> base count 1 (N=1 => 2 bytes)
        dma.write_single_mask(0, 0b010); // unmask channel 2
        dma.dreq(2, true);
        mature_fifo(&mut dma);

        let mut transfers = 0;
        while let Some(req) = dma.poll_transfer() {
            assert_eq!(req.channel, 2);
            let outcome = dma.complete_transfer(2);
            transfers += 1;
            if outcome.terminal_count {
                break;
            }
        }
        assert_eq!(transfers, 2, "count=1 must produce exactly N+1=2 transfers");
        assert!(dma.channel(2).masked, "single-mode channel masks itself after TC");
    }

    #[test]
    fn autoinit_channel_repeats_indefinitely() {
        let mut dma = DmaControllerPair::new();
        dma.write_mode(0, 0b01_1_0_01_01); // single, write, autoinit, channel 1
        dma.io_write(0x02, 0x00);
        dma.io_write(0x02, 0x20);
        dma.io_write(0x03, 0x02); // count low -> N=2 (3 bytes per block)
        dma.io_write(0x03, 0x00);
        dma.write_single_mask(0, 0b001);

        for block in 0..3 {
            dma.dreq(1, true);
            mature_fifo(&mut dma);
            let mut transferred = 0;
            loop {
                let req = dma.poll_transfer().expect("channel should be ready");
                assert_eq!(req.channel, 1);
                let outcome = dma.complete_transfer(1);
                transferred += 1;
                if outcome.terminal_count {
                    assert!(
                        !outcome.channel_now_masked,
                        "autoinit channel must not mask on TC (block {block})"
                    );
                    break;
                }
            }
            assert_eq!(transferred, 3);
            dma.dreq(1, false);
        }
    }

    #[test]
    fn deasserting_demand_dreq_aborts_transfer() {
        let mut dma = DmaControllerPair::new();
        dma.write_mode(0, 0b00_0_0_01_10); // demand, read, channel 2
        dma.io_write(0x05, 0xFF);
        dma.io_write(0x05, 0xFF); // huge count, won't hit TC
        dma.write_single_mask(0, 0b010);
        dma.dreq(2, true);
        mature_fifo(&mut dma);

        assert!(dma.poll_transfer().is_some());
        dma.complete_transfer(2);
        assert!(dma.channel(2).running);

        dma.dreq(2, false);
        assert!(!dma.channel(2).running);
        assert!(dma.poll_transfer().is_none());
    }

    #[test]
    fn sixteen_bit_channel_address_shifts_and_masks_page() {
        let mut dma = DmaControllerPair::new();
        dma.io_write(0x8B, 0x0B); // page register for channel 5
        dma.write_mode(1, 0b01_0_0_10_01); // single, write, channel 5
        dma.io_write(0xC4, 0x34);
        dma.io_write(0xC4, 0x12); // address 0x1234
        dma.write_single_mask(1, 0b001);
        dma.dreq(5, true);
        mature_fifo(&mut dma);
        let req = dma.poll_transfer().unwrap();
        assert_eq!(req.address, ((0x0B_u32 & 0xFE) << 16) | (0x1234 << 1));
        assert!(req.is_16bit);
    }

    #[test]
    fn dma2_high_channel_ports_address_the_right_channel() {
        // Ports above 0xC4 must decode to channels 6 and 7, not bleed into
        // each other: 0xC8/0xCA is channel 6, 0xCC/0xCE is channel 7.
        let mut dma = DmaControllerPair::new();
        dma.io_write(0xC8, 0x11);
        dma.io_write(0xC8, 0x22); // channel 6 address -> 0x2211
        dma.io_write(0xCC, 0x33);
        dma.io_write(0xCC, 0x44); // channel 7 address -> 0x4433

        assert_eq!(dma.channel(6).current_address, 0x2211);
        assert_eq!(dma.channel(7).current_address, 0x4433);

        assert_eq!(dma.io_read(0xC8), 0x11);
        assert_eq!(dma.io_read(0xC8), 0x22);
        assert_eq!(dma.io_read(0xCC), 0x33);
        assert_eq!(dma.io_read(0xCC), 0x44);
    }
}
