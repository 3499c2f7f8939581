//! Lines wired directly to MCU pins

use super::LineDriver;
use crate::error::{Error, Result};
use crate::hal::{HwResult, OutputPin};

/// `N` output pins driven as one bus
///
/// A commit writes every pin in order; with no shift register in between
/// there is no storage clock, so the pins change one after another within a
/// few cycles.
pub struct GpioLines<P, const N: usize> {
    pins: [P; N],
}

impl<P: OutputPin, const N: usize> GpioLines<P, N> {
    /// Wrap an array of pins; pin `i` is physical position `i`
    pub fn new(pins: [P; N]) -> Self {
        Self { pins }
    }
}

impl<P: OutputPin, const N: usize> LineDriver for GpioLines<P, N> {
    fn lines(&self) -> usize {
        N
    }

    fn drive(&mut self, image: &[u8]) -> Result<()> {
        if image.len() * 8 < N {
            return Err(Error::OutOfRange);
        }
        for (pos, pin) in self.pins.iter_mut().enumerate() {
            let high = image[pos / 8] & (1 << (pos % 8)) != 0;
            pin.set_state(high.into()).hw()?;
        }
        Ok(())
    }
}
