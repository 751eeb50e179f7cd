/*!
Configuration surface for the core (SPEC_FULL §2a). Parsing a CLI or TOML
file into this struct is the out-of-scope front-end's job; the core only
defines and validates the struct itself.
*/

use crate::error::ConfigError;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MachineConfig {
    /// CPU clock frequency in Hz, before the x2 scale factor described in
    /// §2; must fall within 60-100 MHz.
    pub cpu_clock_hz: u32,
    /// `scale` multiplier applied on top of `cpu_clock_hz` (the spec's
    /// "scaled x2"); kept configurable rather than hard-coded so a host can
    /// reproduce the source's nominal 2-cycles-per-instruction accounting.
    pub clock_scale: u32,
    /// Optional fixed boot date/time overriding `HostContext::get_current_time`.
    pub boot_time_override: Option<BootTime>,
    /// Path to a floppy disk image to mount in drive A:, if any.
    pub floppy_image: Option<std::path::PathBuf>,
    /// Size of SVGA video RAM in bytes; the CL-GD5446 ships 4 MiB but the
    /// core accepts any power-of-two size from 1 to 4 MiB for testing.
    pub svga_vram_bytes: usize,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootTime {
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub day_of_week: u8,
    pub day_of_month: u8,
    pub month: u8,
    pub year: u16,
}

pub const DEFAULT_SVGA_VRAM_BYTES: usize = 4 * 1024 * 1024;

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            cpu_clock_hz: 75_000_000,
            clock_scale: 2,
            boot_time_override: None,
            floppy_image: None,
            svga_vram_bytes: DEFAULT_SVGA_VRAM_BYTES,
        }
    }
}

impl MachineConfig {
    /// Validate the clock frequency and VRAM size, matching the
    /// "configuration errors refuse to start" policy (§7).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(60_000_000..=100_000_000).contains(&self.cpu_clock_hz) {
            return Err(ConfigError::ClockFrequencyOutOfRange(self.cpu_clock_hz));
        }
        if self.svga_vram_bytes == 0
            || self.svga_vram_bytes > DEFAULT_SVGA_VRAM_BYTES
            || !self.svga_vram_bytes.is_power_of_two()
        {
            return Err(ConfigError::RomTooLarge(self.svga_vram_bytes));
        }
        Ok(())
    }

    /// Effective clock frequency fed to the scheduler (`cpu_clock_hz * clock_scale`).
    pub fn effective_clock_hz(&self) -> u64 {
        self.cpu_clock_hz as u64 * self.clock_scale as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(MachineConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_clock_is_rejected() {
        let cfg = MachineConfig {
            cpu_clock_hz: 10_000_000,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ClockFrequencyOutOfRange(_))
        ));
    }

    #[test]
    fn non_power_of_two_vram_is_rejected() {
        let cfg = MachineConfig {
            svga_vram_bytes: 3 * 1024 * 1024,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
