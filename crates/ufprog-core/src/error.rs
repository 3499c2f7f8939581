//! Error types for ufprog-core
//!
//! This module provides a no_std compatible error type shared by the bus,
//! regulator, device engine and protocol layers. Every variant has a wire
//! code so the dispatcher can report it to the host unchanged.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Protocol errors
    /// Frame rejected: unknown opcode, wrong length or invalid field value
    MalformedFrame,

    // Bus errors
    /// Bus index, address or buffer range outside configured bounds
    OutOfRange,

    // Supply errors
    /// Regulator did not settle within its tick bound
    RegulationTimeout,

    // Device errors
    /// Cell still mismatched after the verify-retry bound
    ProgramVerifyFailed {
        /// Device address of the failing cell
        addr: u32,
    },
    /// Blank check found a cell that is not in the erased state
    NotBlank {
        /// Device address of the first non-erased cell
        addr: u32,
    },
    /// Device family lacks the requested capability
    UnsupportedOperation,
    /// Device stopped answering (NACK, busy flag stuck, bad status)
    NoResponse,
    /// No device has been configured yet
    NotConfigured,

    // Session errors
    /// Another device session is already running
    SessionBusy,
    /// Session cancelled at a step boundary
    Cancelled,

    // Hardware errors
    /// Pin, PWM or ADC access failed
    Hardware,
}

impl Error {
    /// Address carried by the error, if any
    pub fn addr(&self) -> Option<u32> {
        match self {
            Self::ProgramVerifyFailed { addr } | Self::NotBlank { addr } => Some(*addr),
            _ => None,
        }
    }

    /// Code sent in error response frames
    pub fn code(&self) -> u8 {
        match self {
            Self::MalformedFrame => 1,
            Self::OutOfRange => 2,
            Self::RegulationTimeout => 3,
            Self::ProgramVerifyFailed { .. } => 4,
            Self::UnsupportedOperation => 5,
            Self::SessionBusy => 6,
            Self::Cancelled => 7,
            Self::Hardware => 8,
            Self::NotConfigured => 9,
            Self::NotBlank { .. } => 10,
            Self::NoResponse => 11,
        }
    }

    /// Rebuild an error from its wire code and detail dword
    pub fn from_code(code: u8, detail: u32) -> Option<Self> {
        Some(match code {
            1 => Self::MalformedFrame,
            2 => Self::OutOfRange,
            3 => Self::RegulationTimeout,
            4 => Self::ProgramVerifyFailed { addr: detail },
            5 => Self::UnsupportedOperation,
            6 => Self::SessionBusy,
            7 => Self::Cancelled,
            8 => Self::Hardware,
            9 => Self::NotConfigured,
            10 => Self::NotBlank { addr: detail },
            11 => Self::NoResponse,
            _ => return None,
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedFrame => write!(f, "malformed frame"),
            Self::OutOfRange => write!(f, "value out of range"),
            Self::RegulationTimeout => write!(f, "voltage regulation timed out"),
            Self::ProgramVerifyFailed { addr } => {
                write!(f, "program verify failed at address 0x{:08X}", addr)
            }
            Self::NotBlank { addr } => write!(f, "device not blank at address 0x{:08X}", addr),
            Self::UnsupportedOperation => write!(f, "operation not supported by device"),
            Self::NoResponse => write!(f, "device not responding"),
            Self::NotConfigured => write!(f, "no device configured"),
            Self::SessionBusy => write!(f, "another session is running"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Hardware => write!(f, "hardware failure"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
