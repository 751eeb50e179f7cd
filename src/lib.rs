#![doc = r#"
Core of a cycle-accurate emulator for a mid-1990s IBM-PC-compatible machine
built around a Pentium-class CPU, the Intel 430TX/PIIX4 chipset and a
handful of legacy ISA peripherals plus one PCI SVGA adapter.

This crate is the deterministic device-event scheduler together with the
cycle-driven peripheral state machines that hang off it; the CPU core,
physical memory fabric and any interactive front-end are out of scope
(§1) and are represented here only by the [`machine::HostContext`] trait
a host implements.

Modules:
- scheduler: shared cycle clock, `Device` trait, Bresenham rate conversion
- config: `MachineConfig`, the host-facing configuration surface
- error: crate-wide `PcError`/`RecoverableKind`/`ConfigError`
- dma: cascaded 8237 DMA controllers
- pic: dual 8259A interrupt controllers, ELCR, PCI PIRQ routing
- rtc: MC146818 real-time clock / CMOS RAM
- pmtimer: ACPI power-management timer
- speaker: 8254 PIT channel 2 and the PC speaker gate
- ps2: 8042 keyboard/mouse controller
- floppy: 82077AA floppy disk controller
- sound_blaster: Sound Blaster 16 (OPL3, DSP, mixer)
- svga: CL-GD5446 SVGA adapter
- machine: `Machine`, the single context value wiring every device together
"#]

pub mod config;
pub mod dma;
pub mod error;
pub mod floppy;
pub mod machine;
pub mod pic;
pub mod pmtimer;
pub mod ps2;
pub mod rtc;
pub mod scheduler;
pub mod sound_blaster;
pub mod speaker;
pub mod svga;

pub use config::MachineConfig;
pub use error::PcError;
pub use machine::{HostContext, Machine};
