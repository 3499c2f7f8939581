//! ufprog-sim - Simulated programmer board
//!
//! Runs the unmodified board core against a pin-level model of the
//! hardware: GPIO control lines, 74HC595/74HC165 chains, two DC-DC
//! converters and a socket that holds one simulated memory chip.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use std::time::Duration;
//! use ufprog_sim::{chip::SpiChip, link, Board};
//!
//! let board = Board::default();
//! board.insert(SpiChip::new(Default::default()));
//! let (_host, device) = link::pipe(Duration::from_millis(50));
//! board.serve(device, &AtomicBool::new(false)).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod board;
pub mod chip;
pub mod config;
pub mod error;
pub mod hal;
pub mod link;
pub mod plant;
pub mod socket;

pub use board::Board;
pub use config::BoardConfig;
pub use error::{Result, SimError};
pub use socket::{Signal, SocketHandle};
