//! Error types for host-side operations

use thiserror::Error;

/// Host client errors
#[derive(Debug, Error)]
pub enum HostError {
    /// Failed to connect to the board
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The board never answered a NOP
    #[error("Protocol synchronization failed")]
    SyncFailed,

    /// Board speaks a different protocol version
    #[error("Unsupported protocol version: 0x{0:04X}")]
    UnsupportedVersion(u16),

    /// Response did not start with a status byte
    #[error("Invalid response 0x{status:02X} for command 0x{opcode:02X}")]
    InvalidResponse {
        /// Opcode of the request
        opcode: u8,
        /// First byte received
        status: u8,
    },

    /// The board answered with an error frame
    #[error("Board error: {0}")]
    Device(#[from] ufprog_core::Error),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    IoError(String),

    /// Timeout during communication
    #[error("Communication timeout")]
    Timeout,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Device preset could not be loaded
    #[error("Preset error: {0}")]
    Preset(String),

    /// Serial port error
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    SerialError(#[from] serialport::Error),
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, HostError>;

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => HostError::Timeout,
            _ => HostError::IoError(e.to_string()),
        }
    }
}
