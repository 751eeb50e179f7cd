/*!
Crate-wide error type, partitioned into the three classes from the error
handling design: recoverable (logged and dropped, never propagated out of a
public method), configuration (returned by fallible constructors/loaders) and
invariant (internal bug assertions, promoted to a real `Result` instead of an
unconditional process exit so a host can choose to panic via
`strict_invariants`).
*/

use std::fmt;

/// Top-level crate error. Only [`PcError::Configuration`] and
/// [`PcError::Invariant`] are meant to cross a public API boundary;
/// [`PcError::Recoverable`] is constructed and logged in place (see
/// [`warn_recoverable`]) and never returned.
#[derive(thiserror::Error, Debug)]
pub enum PcError {
    #[error("recoverable condition: {0}")]
    Recoverable(#[from] RecoverableKind),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Conditions a well-formed guest can trigger that must not abort the
/// simulation: the guest observes a dropped byte or an ignored write, but no
/// exception is injected.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoverableKind {
    #[error("DMA DREQ FIFO full on channel {channel}")]
    DmaFifoFull { channel: u8 },
    #[error("PS/2 {device} output buffer full, byte dropped")]
    Ps2BufferOverflow { device: &'static str },
    #[error("unsupported mixer register {index:#04x}")]
    UnsupportedMixerRegister { index: u8 },
    #[error("SVGA write to unimplemented extended register {index:#04x}")]
    UnsupportedSvgaRegister { index: u8 },
    #[error("floppy command {opcode:#04x} issued while controller busy")]
    FloppyBusy { opcode: u8 },
}

/// Errors surfaced by fallible constructors and image loaders; these refuse
/// to start rather than run in an undefined state.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("CPU clock frequency {0} Hz out of the supported 60-100 MHz range")]
    ClockFrequencyOutOfRange(u32),
    #[error("floppy image size {0} bytes does not match a supported geometry")]
    BadFloppyImageSize(usize),
    #[error("option ROM size {0} bytes exceeds the expansion ROM window")]
    RomTooLarge(usize),
    #[error("I/O error loading image: {0}")]
    Io(#[from] std::io::Error),
}

/// Log a recoverable condition and discard it. Matches the "emit warning,
/// drop the offending byte, continue" policy: call sites never propagate the
/// `RecoverableKind` as an `Err`.
pub fn warn_recoverable(kind: RecoverableKind) {
    log::warn!("{kind}");
}

/// Check an internal invariant. In debug builds (or with the
/// `strict_invariants` feature) a violation panics immediately, matching the
/// source's "error injection via exit" policy for genuine programming bugs;
/// otherwise it is logged and returned as an `Err` so a host can decide.
pub fn check_invariant(ok: bool, message: impl fmt::Display) -> Result<(), PcError> {
    if ok {
        return Ok(());
    }
    let message = message.to_string();
    if cfg!(feature = "strict_invariants") || cfg!(debug_assertions) {
        panic!("invariant violated: {message}");
    }
    log::error!("invariant violated: {message}");
    Err(PcError::Invariant(message))
}

pub type Result<T> = std::result::Result<T, PcError>;
