//! End-to-end scenarios driven entirely through `Machine`'s public port map
//! and capability methods, the way an external CPU-fabric host would.

use pcat_core::config::{BootTime, MachineConfig};
use pcat_core::floppy::FloppyMedia;
use pcat_core::machine::AudioSource;
use pcat_core::scheduler::{Clock, Device};
use pcat_core::{HostContext, Machine};

struct FlatMemoryHost {
    memory: Vec<u8>,
    cmos: [u8; 128],
}

impl FlatMemoryHost {
    fn new() -> Self {
        Self {
            memory: vec![0; 1 << 20],
            cmos: [0; 128],
        }
    }
}

impl HostContext for FlatMemoryHost {
    fn warning(&mut self, _message: &str) {}

    fn mem_read8(&mut self, addr: u32) -> u8 {
        self.memory.get(addr as usize).copied().unwrap_or(0xFF)
    }
    fn mem_read16(&mut self, addr: u32) -> u16 {
        self.mem_read8(addr) as u16 | (self.mem_read8(addr + 1) as u16) << 8
    }
    fn mem_read32(&mut self, addr: u32) -> u32 {
        self.mem_read16(addr) as u32 | (self.mem_read16(addr + 2) as u32) << 16
    }
    fn mem_read64(&mut self, addr: u32) -> u64 {
        self.mem_read32(addr) as u64 | (self.mem_read32(addr + 4) as u64) << 32
    }
    fn mem_write8(&mut self, addr: u32, val: u8) {
        if let Some(slot) = self.memory.get_mut(addr as usize) {
            *slot = val;
        }
    }
    fn mem_write16(&mut self, addr: u32, val: u16) {
        self.mem_write8(addr, val as u8);
        self.mem_write8(addr + 1, (val >> 8) as u8);
    }
    fn mem_write32(&mut self, addr: u32, val: u32) {
        self.mem_write16(addr, val as u16);
        self.mem_write16(addr + 2, (val >> 16) as u16);
    }

    fn update_screen(&mut self, _fb: &[u32], _width: u32, _height: u32) {}
    fn play_sound(&mut self, _samples: &[i16], _source: AudioSource) {}

    fn get_current_time(&mut self) -> BootTime {
        BootTime {
            second: 0,
            minute: 0,
            hour: 0,
            day_of_week: 1,
            day_of_month: 1,
            month: 1,
            year: 2000,
        }
    }

    fn get_cmos_ram(&mut self) -> &mut [u8; 128] {
        &mut self.cmos
    }
}

/// A single-track, single-sided image backed by an in-memory byte buffer,
/// geometry-compatible with a 1.44 MiB 3.5" floppy.
struct MemoryFloppyImage {
    bytes: Vec<u8>,
}

impl MemoryFloppyImage {
    fn new(first_sector: [u8; 512]) -> Self {
        let mut bytes = vec![0u8; 1_474_560];
        bytes[0..512].copy_from_slice(&first_sector);
        Self { bytes }
    }
}

impl FloppyMedia for MemoryFloppyImage {
    fn geometry(&self) -> (u8, u8, u8) {
        (80, 2, 18)
    }

    fn read_sector(&mut self, cyl: u8, head: u8, sector: u8) -> Option<[u8; 512]> {
        if sector == 0 || sector > 18 || head > 1 {
            return None;
        }
        let lba = (cyl as usize * 2 + head as usize) * 18 + (sector as usize - 1);
        let offset = lba * 512;
        let mut out = [0u8; 512];
        out.copy_from_slice(self.bytes.get(offset..offset + 512)?);
        Some(out)
    }

    fn write_sector(&mut self, _cyl: u8, _head: u8, _sector: u8, _data: &[u8; 512]) -> bool {
        false
    }
}

/// Programs DMA channel 2 for a single-mode, memory-write (disk-to-RAM)
/// transfer of one 512-byte sector into `dest`, then drives the 82077AA
/// through a Read Data command for cylinder 0/head 0/sector 1 and checks
/// the transferred bytes land at `dest` in guest memory.
#[test]
fn floppy_boot_sector_dma_transfer_lands_in_guest_memory() {
    let dest: u32 = 0x1000;
    let mut expected = [0u8; 512];
    for (i, b) in expected.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }

    let mut host = FlatMemoryHost::new();
    let mut machine = Machine::new(MachineConfig::default(), &mut host).unwrap();
    machine.mount_floppy(Box::new(MemoryFloppyImage::new(expected)));

    // DMA channel 2: single mode, memory-write transfer type, count = 511
    // (N+1 = 512 bytes), address = dest, page = 0.
    machine.io_write(0x0B, 0b01_0_0_01_10);
    machine.io_write(0x0C, 0x00); // clear byte/word flip-flop
    machine.io_write(0x04, (dest & 0xFF) as u8);
    machine.io_write(0x04, ((dest >> 8) & 0xFF) as u8);
    machine.io_write(0x81, ((dest >> 16) & 0xFF) as u8);
    machine.io_write(0x0C, 0x00);
    machine.io_write(0x05, 0xFF);
    machine.io_write(0x05, 0x01);
    machine.io_write(0x0A, 0x02); // unmask channel 2

    machine.io_write(0x3F2, 0x10); // motor on, drive 0 selected

    // Read Data (0x06): HD/DS, C, H, R, N, EOT, GPL, DTL.
    machine.io_write(0x3F5, 0x06);
    machine.io_write(0x3F5, 0x00); // drive 0, head 0
    machine.io_write(0x3F5, 0x00); // cylinder 0
    machine.io_write(0x3F5, 0x00); // head 0
    machine.io_write(0x3F5, 0x01); // sector 1
    machine.io_write(0x3F5, 0x02); // N = 512 bytes/sector
    machine.io_write(0x3F5, 0x01); // EOT: last sector of this transfer
    machine.io_write(0x3F5, 0x1B); // GPL, nominal
    machine.io_write(0x3F5, 0xFF); // DTL, unused at N != 0

    // Fast-forward in coarse steps; every device's end_iter treats this as
    // a per-call delta, so a handful of large steps reach the command's
    // ~16ms nominal transfer time without needing hundreds of thousands of
    // next_event_cc-paced single-digit-cycle iterations.
    for _ in 0..2_000 {
        machine.end_iter(2_000, &mut host);
    }

    assert_eq!(&host.memory[dest as usize..dest as usize + 512], &expected[..]);
}

/// Drives the RTC's own update-cycle/alarm state machine directly (bypassing
/// `Machine` so the clock can run at a rate that makes a multi-second alarm
/// wait cheap to pace precisely), mirroring the update-cycle mechanics
/// `src/rtc.rs`'s own inline unit tests exercise one call at a time.
#[test]
fn rtc_update_cycle_raises_uf_each_second_and_af_on_alarm_match() {
    use pcat_core::rtc::Rtc;

    let cpu_hz = 1_000_000u64;
    let mut rtc = Rtc::new(cpu_hz);

    rtc.io_write_index(0x0A);
    rtc.io_write_data(0x20); // DV=010, RS=0 (periodic interrupt disabled)
    rtc.io_write_index(0x0B);
    rtc.io_write_data(0x32); // AIE + UIE + 24-hour, update enabled

    rtc.io_write_index(0x00);
    rtc.io_write_data(0x03); // seconds = 3 (BCD)
    rtc.io_write_index(0x01);
    rtc.io_write_data(0x05); // alarm seconds = 5
    rtc.io_write_index(0x03);
    rtc.io_write_data(0xC0); // alarm minutes: don't care
    rtc.io_write_index(0x05);
    rtc.io_write_data(0xC0); // alarm hours: don't care

    let mut uf_count = 0;
    let mut af_count = 0;
    let base_clock = Clock::new(cpu_hz);
    for _ in 0..6 {
        let mut remaining = cpu_hz; // exactly one second of cycles
        while remaining > 0 {
            let cc = rtc.next_event_cc(&base_clock).min(remaining);
            rtc.end_iter(&Clock {
                now: cc,
                ..base_clock
            });
            remaining -= cc;
        }
        rtc.io_write_index(0x0C);
        let status = rtc.io_read_data();
        if status & 0x10 != 0 {
            uf_count += 1;
        }
        if status & 0x20 != 0 {
            af_count += 1;
        }
    }

    assert_eq!(uf_count, 6, "one UF per simulated second");
    assert_eq!(af_count, 1, "alarm matches exactly once, at second 5");

    rtc.io_write_index(0x00);
    assert_eq!(rtc.io_read_data(), 0x09, "seconds advanced from 3 to 9 over 6 ticks");
}

/// Enables streaming through the real 8042 command protocol (`0xD4` aux
/// select, then `0xF4` "enable streaming" via the data port) and checks a
/// reported motion event eventually surfaces as a 3-byte packet at port
/// `0x60`, with the always-1 status bit set per spec §4.5.
#[test]
fn ps2_mouse_motion_produces_a_packet_through_the_8042() {
    let mut host = FlatMemoryHost::new();
    let mut machine = Machine::new(MachineConfig::default(), &mut host).unwrap();

    machine.io_write(0x64, 0xD4);
    machine.io_write(0x60, 0xF4);
    assert_eq!(machine.io_read(0x60), 0xFA, "enable-streaming command is acked");

    machine.mouse_mut().report_motion(6.0, 0.0);

    let mut got_packet = false;
    for _ in 0..500_000 {
        let cc = machine.next_event_cc();
        machine.end_iter(cc, &mut host);
        if machine.io_read(0x64) & 0x01 != 0 {
            got_packet = true;
            break;
        }
    }
    assert!(got_packet, "mouse motion never produced a packet");

    let status = machine.io_read(0x60);
    assert_eq!(status & 0x08, 0x08, "always-1 bit must be set");
    let dx = machine.io_read(0x60) as i8;
    assert!(dx > 0, "rightward motion must report a positive dx byte");
}

/// Exercises the DMA status register's terminal-count latch (mirrors
/// `src/dma/mod.rs`'s own `single_transfer_count_round_trip` unit test) by
/// driving a real channel-2 consumer: a minimal 2-byte floppy Read Data
/// command, since no DMA channel is serviced except by a command-gated
/// device such as the FDC or sound blaster (`Machine::pump_floppy_dma`/
/// `pump_sound_blaster_dma`).
#[test]
fn dma_single_transfer_reports_terminal_count_after_floppy_read() {
    let mut host = FlatMemoryHost::new();
    let mut machine = Machine::new(MachineConfig::default(), &mut host).unwrap();
    machine.mount_floppy(Box::new(MemoryFloppyImage::new([0xAB; 512])));

    let dest: u32 = 0x2000;
    machine.io_write(0x0B, 0b01_0_0_01_10); // single, memory-write, channel 2
    machine.io_write(0x0C, 0x00);
    machine.io_write(0x04, (dest & 0xFF) as u8);
    machine.io_write(0x04, ((dest >> 8) & 0xFF) as u8);
    machine.io_write(0x81, ((dest >> 16) & 0xFF) as u8);
    machine.io_write(0x0C, 0x00);
    machine.io_write(0x05, 0x01);
    machine.io_write(0x05, 0x00); // count = 1 -> N+1 = 2 bytes transferred
    machine.io_write(0x0A, 0x02); // unmask channel 2

    machine.io_write(0x3F2, 0x10); // motor on, drive 0 selected
    machine.io_write(0x3F5, 0x06); // Read Data
    machine.io_write(0x3F5, 0x00);
    machine.io_write(0x3F5, 0x00);
    machine.io_write(0x3F5, 0x00);
    machine.io_write(0x3F5, 0x01);
    machine.io_write(0x3F5, 0x02);
    machine.io_write(0x3F5, 0x01);
    machine.io_write(0x3F5, 0x1B);
    machine.io_write(0x3F5, 0xFF);

    for _ in 0..2_000 {
        machine.end_iter(2_000, &mut host);
    }

    // DMA1's status register (port 0x08) latches one TC bit per channel,
    // cleared on read; channel 2 is bit 2. The transfer count (2 bytes) is
    // far smaller than the sector size, so the DMA side reaches terminal
    // count well before the FDC's own execution-phase countdown finishes.
    let status = machine.io_read(0x08);
    assert_eq!(status & 0x04, 0x04, "channel 2 must report terminal count");
    assert_eq!(&host.memory[dest as usize..dest as usize + 2], &[0xAB, 0xAB]);
}

/// SVGA register I/O is gated behind the PCI command register's I/O-space
/// bit (`src/svga/registers.rs`'s "I/O decode must be off by default"); this
/// enables it the same way `machine.rs`'s own
/// `pci_config_indirect_access_reaches_the_svga_vendor_id` unit test does,
/// then exercises the chain-4 byte-per-pixel path through the window/
/// aperture accessors added alongside this test.
#[test]
fn svga_chain4_memory_round_trips_after_pci_io_space_is_enabled() {
    let mut host = FlatMemoryHost::new();
    let mut machine = Machine::new(MachineConfig::default(), &mut host).unwrap();

    machine.io_write(0xCF8, 0x04); // select PCI function 0 command/status dword
    machine.io_write(0xCFC, 0x01); // set I/O space enable (bit 0)

    machine.io_write(0x3C4, 0x04); // sequencer index: memory mode
    machine.io_write(0x3C5, 0x08); // chain-4 enable

    machine.vga_mem_write(0, 0x42);
    machine.vga_mem_write(4, 0x99);
    assert_eq!(machine.vga_mem_read(0), 0x42);
    assert_eq!(machine.vga_mem_read(4), 0x99);
}

/// Port `0xCF9`'s rising-edge hard reset (`Machine::reset`, spec §5) clears
/// DMA channel programming; mirrors the existing
/// `reset_control_port_triggers_a_hard_reset` unit test's pattern but
/// checks DMA address/count state instead of the PIC mask register.
#[test]
fn reset_control_clears_dma_channel_programming() {
    let mut host = FlatMemoryHost::new();
    let mut machine = Machine::new(MachineConfig::default(), &mut host).unwrap();

    machine.io_write(0x0C, 0x00);
    machine.io_write(0x00, 0x34);
    machine.io_write(0x00, 0x12); // channel 0 address = 0x1234

    machine.io_write(0xCF9, 0x00);
    machine.io_write(0xCF9, 0x04); // rising edge -> hard reset

    machine.io_write(0x0C, 0x00);
    assert_eq!(machine.io_read(0x00), 0x00, "channel 0 address must be cleared by reset");
}
