//! Simulator errors

use thiserror::Error;

/// Errors from building or serving a simulated board
#[derive(Debug, Error)]
pub enum SimError {
    /// The board core rejected its wiring
    #[error("board setup failed: {0}")]
    Board(#[from] ufprog_core::Error),

    /// The transport failed while serving
    #[error("transport error: {0:?}")]
    Transport(embedded_io::ErrorKind),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Board configuration could not be parsed
    #[error("invalid board configuration: {0}")]
    Config(String),
}

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;
