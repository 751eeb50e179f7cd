//! `pcat-trace`: a minimal host that constructs a [`Machine`], drives it for
//! a fixed number of scheduler iterations, and logs the state it produces.
//! Disk image I/O, flat guest memory and CMOS persistence all live here
//! because they are the out-of-scope host concerns `HostContext` exists to
//! stand in for; the core itself never touches a filesystem.

use std::env;
use std::fs;
use std::path::PathBuf;

use log::info;
use pcat_core::config::BootTime;
use pcat_core::machine::AudioSource;
use pcat_core::{HostContext, Machine, MachineConfig};

const GUEST_MEMORY_BYTES: usize = 16 * 1024 * 1024;
const TRACE_ITERATIONS: u64 = 200_000;

struct FileFloppyImage {
    bytes: Vec<u8>,
    geometry: (u8, u8, u8),
}

impl FileFloppyImage {
    fn load(path: &PathBuf) -> Result<Self, pcat_core::PcError> {
        let bytes = fs::read(path).map_err(pcat_core::error::ConfigError::Io)?;
        let geometry = match bytes.len() {
            1_474_560 => (80, 2, 18),
            737_280 => (80, 2, 9),
            368_640 => (40, 2, 9),
            other => return Err(pcat_core::error::ConfigError::BadFloppyImageSize(other).into()),
        };
        Ok(Self { bytes, geometry })
    }

    fn chs_offset(&self, cyl: u8, head: u8, sector: u8) -> Option<usize> {
        let (_, heads, sectors) = self.geometry;
        if sector == 0 || sector > sectors || head >= heads {
            return None;
        }
        let lba = (cyl as usize * heads as usize + head as usize) * sectors as usize
            + (sector as usize - 1);
        Some(lba * 512)
    }
}

impl pcat_core::floppy::FloppyMedia for FileFloppyImage {
    fn geometry(&self) -> (u8, u8, u8) {
        self.geometry
    }

    fn read_sector(&mut self, cyl: u8, head: u8, sector: u8) -> Option<[u8; 512]> {
        let offset = self.chs_offset(cyl, head, sector)?;
        let slice = self.bytes.get(offset..offset + 512)?;
        let mut out = [0u8; 512];
        out.copy_from_slice(slice);
        Some(out)
    }

    fn write_sector(&mut self, cyl: u8, head: u8, sector: u8, data: &[u8; 512]) -> bool {
        match self.chs_offset(cyl, head, sector) {
            Some(offset) if offset + 512 <= self.bytes.len() => {
                self.bytes[offset..offset + 512].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }
}

struct CliHost {
    memory: Vec<u8>,
    cmos: [u8; 128],
    frames: u64,
    sound_blocks: u64,
}

impl CliHost {
    fn new() -> Self {
        Self {
            memory: vec![0; GUEST_MEMORY_BYTES],
            cmos: [0; 128],
            frames: 0,
            sound_blocks: 0,
        }
    }
}

impl HostContext for CliHost {
    fn warning(&mut self, message: &str) {
        log::warn!("{message}");
    }

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

    fn update_screen(&mut self, _fb: &[u32], width: u32, height: u32) {
        self.frames += 1;
        if self.frames % 60 == 0 {
            info!("frame {} ({width}x{height})", self.frames);
        }
    }

    fn play_sound(&mut self, _samples: &[i16], _source: AudioSource) {
        self.sound_blocks += 1;
    }

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

fn main() {
    env_logger::init();

    let floppy_path = env::args().nth(1).map(PathBuf::from);
    let config = MachineConfig {
        floppy_image: floppy_path.clone(),
        ..MachineConfig::default()
    };

    let mut host = CliHost::new();
    let mut machine = match Machine::new(config, &mut host) {
        Ok(machine) => machine,
        Err(err) => {
            eprintln!("failed to start machine: {err}");
            std::process::exit(1);
        }
    };

    if let Some(path) = floppy_path {
        match FileFloppyImage::load(&path) {
            Ok(image) => machine.mount_floppy(Box::new(image)),
            Err(err) => eprintln!("failed to load floppy image {}: {err}", path.display()),
        }
    }

    info!("running {TRACE_ITERATIONS} scheduler iterations");
    for _ in 0..TRACE_ITERATIONS {
        let cc = machine.next_event_cc();
        machine.end_iter(cc, &mut host);
    }

    machine.flush_cmos(&mut host);
    info!(
        "done: {} frame(s), {} sound block(s)",
        host.frames, host.sound_blocks
    );
}
