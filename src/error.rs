//! Crate-wide error taxonomy.

use embedded_hal::digital::{Error as DigitalErrorTrait, ErrorKind as DigitalErrorKind};
use embedded_hal::i2c::{Error as I2cErrorTrait, ErrorKind as I2cErrorKind};

/// Errors surfaced by the I2C byte expander and anything built on top of it.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    #[error("i2c transaction failed")]
    I2c,
    #[error("bit index {0} out of range (0..=7)")]
    InvalidBit(u8),
}

impl I2cErrorTrait for BusError {
    fn kind(&self) -> I2cErrorKind {
        match self {
            BusError::I2c => I2cErrorKind::Other,
            BusError::InvalidBit(_) => I2cErrorKind::Other,
        }
    }
}

impl DigitalErrorTrait for BusError {
    fn kind(&self) -> DigitalErrorKind {
        DigitalErrorKind::Other
    }
}

/// Errors from PMS frame acquisition over the AQM serial port.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    #[error("serial read failed")]
    Io,
    #[error("checksum mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { expected: u16, computed: u16 },
}

/// A serial read produced no frame within the configured window. Not fatal.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("timed out waiting for data")]
pub struct TimeoutError;

/// Invalid configuration detected at construction time. Fatal at startup.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("gate {name}: open_bit and close_bit must differ")]
    GateBitCollision { name: &'static str },
    #[error("channel {tool}: off_threshold ({off}) must be < on_threshold ({on})")]
    InvertedThresholds {
        tool: &'static str,
        off: i32,
        on: i32,
    },
    #[error("sample_hz must be > 0")]
    BadSampleRate,
    #[error("consecutive_required must be >= 1")]
    BadConsecutiveRequired,
    #[error("too many items for fixed-capacity collection (max {max})")]
    TooManyItems { max: usize },
}

/// Refused attempt to energize both relays of an antagonistic pair at once.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("refused to energize relay bits {a} and {b} simultaneously")]
pub struct SafetyViolation {
    pub a: u8,
    pub b: u8,
}

/// Top-level error type a component task can return to the supervisor.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CoreError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Safety(#[from] SafetyViolation),
}
