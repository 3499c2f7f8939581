//! Memory chips that can sit in the simulated socket
//!
//! A chip only sees the socket [`Pins`]. It reacts to edges by comparing the
//! new state with the one it saw last, and reports what it drives on the
//! data lines through [`Chip::output`].

mod i2c;
mod parallel;
mod spi;

pub use i2c::I2cChip;
pub use parallel::{ParallelChip, ParallelKind};
pub use spi::{SpiChip, SpiChipConfig};

use crate::socket::Pins;

/// Data lines driven by a chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drive {
    /// Lines the chip drives
    pub mask: u16,
    /// Levels on those lines
    pub value: u16,
}

/// Behaviour of a chip at its pins
pub trait Chip: Send {
    /// Socket lines changed to `pins`
    fn update(&mut self, pins: &Pins);

    /// What the chip puts on the data lines in state `pins`
    fn output(&self, pins: &Pins) -> Option<Drive>;

    /// Memory contents, one byte per address (big-endian pairs for 16-bit
    /// parts)
    fn contents(&self) -> Vec<u8>;
}
