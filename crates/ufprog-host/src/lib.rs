//! ufprog-host - talking to a ufprog board from a PC
//!
//! The board speaks a small binary request/response protocol (see
//! `ufprog_core::protocol`). This crate wraps it in a typed client,
//! [`Programmer`], over a serial port or a TCP socket, and ships a database
//! of device presets.
//!
//! # Example
//!
//! ```no_run
//! use ufprog_host::{open, PresetDb};
//!
//! let presets = PresetDb::builtin()?;
//! let preset = presets.find("W27C512").expect("builtin preset");
//!
//! let mut board = open("ip=localhost:7878")?;
//! board.configure(&preset.config())?;
//! let mut data = vec![0u8; 256];
//! board.read_range(0, &mut data, |_| {})?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod error;
pub mod presets;
pub mod transport;

// Re-exports
pub use client::{Programmer, RailSummary, Summary};
pub use error::{HostError, Result};
pub use presets::{Preset, PresetDb};
#[cfg(feature = "serial")]
pub use transport::serial::SerialTransport;
pub use transport::tcp::TcpTransport;
pub use transport::Transport;

/// Where a board is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// Serial port connection
    Serial {
        /// Device path (e.g., "/dev/ttyACM0" or "COM1")
        device: String,
        /// Baud rate (None for the port default)
        baud: Option<u32>,
    },
    /// TCP socket connection
    Tcp {
        /// Hostname or IP address
        host: String,
        /// Port number
        port: u16,
    },
}

impl Connection {
    /// Parse a connection string
    ///
    /// Formats:
    /// - `dev=/dev/ttyACM0` - Serial with default baud
    /// - `dev=/dev/ttyACM0:115200` - Serial with specified baud
    /// - `ip=host:port` - TCP connection
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(dev) = s.strip_prefix("dev=") {
            match dev.rsplit_once(':') {
                Some((device, baud)) => Ok(Connection::Serial {
                    device: device.to_string(),
                    baud: Some(baud.parse().map_err(|_| {
                        HostError::InvalidParameter(format!("Invalid baud rate: {}", baud))
                    })?),
                }),
                None => Ok(Connection::Serial {
                    device: dev.to_string(),
                    baud: None,
                }),
            }
        } else if let Some(ip) = s.strip_prefix("ip=") {
            let (host, port) = ip.rsplit_once(':').ok_or_else(|| {
                HostError::InvalidParameter("Missing port in ip= parameter".to_string())
            })?;
            Ok(Connection::Tcp {
                host: host.to_string(),
                port: port
                    .parse()
                    .map_err(|_| HostError::InvalidParameter(format!("Invalid port: {}", port)))?,
            })
        } else {
            Err(HostError::InvalidParameter(format!(
                "Invalid connection string: {}. Use dev=... or ip=...",
                s
            )))
        }
    }

    /// Open the transport
    pub fn connect(&self) -> Result<Box<dyn Transport>> {
        match self {
            #[cfg(feature = "serial")]
            Connection::Serial { device, baud } => {
                Ok(Box::new(SerialTransport::open(device, *baud)?))
            }
            #[cfg(not(feature = "serial"))]
            Connection::Serial { .. } => Err(HostError::ConnectionFailed(
                "built without serial port support".to_string(),
            )),
            Connection::Tcp { host, port } => Ok(Box::new(TcpTransport::connect(host, *port)?)),
        }
    }
}

/// Open a board from a connection string and synchronize with it
pub fn open(options: &str) -> Result<Programmer<Box<dyn Transport>>> {
    let transport = Connection::parse(options)?.connect()?;
    Programmer::new(transport)
}
