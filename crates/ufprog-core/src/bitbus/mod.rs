//! Bit-addressable signal buses
//!
//! A [`BitBus`] maps an ordered list of logical lines (address bit 0, data
//! bit 3, ...) onto physical positions of a [`LineDriver`]. Writes are staged
//! in RAM and only reach the pins on [`BitBus::commit`], so a multi-bit
//! change (a new address, a new data word) appears on the target socket as
//! one transition instead of a ripple of intermediate states.
//!
//! ## Drivers
//!
//! - [`ShiftOut`] - cascaded 74HC595 serial-in/parallel-out registers
//! - [`ShiftIn`] - cascaded 74HC165 parallel-in/serial-out registers
//! - [`Duplex`] - one of each sharing the same position numbering, used for
//!   the bidirectional data bus
//! - [`GpioLines`] - lines wired straight to MCU pins (control lines)
//!
//! ## Reading
//!
//! Reads are two explicit steps: [`BitBus::sample`] pulses the physical
//! capture and fills the input image, then [`BitBus::bit`] and
//! [`BitBus::bits`] read from that image as often as needed.

mod gpio;
mod shift;

pub use gpio::GpioLines;
pub use shift::{Duplex, ShiftIn, ShiftOut};

use heapless::Vec;

use crate::error::{Error, Result};

/// Most lines a single bus can address
pub const MAX_LINES: usize = 64;

const IMAGE_BYTES: usize = MAX_LINES / 8;

/// Physical back end of a [`BitBus`]
///
/// Images are packed LSB first: physical position `n` lives in bit `n % 8`
/// of byte `n / 8`.
pub trait LineDriver {
    /// Number of physical positions the driver owns
    fn lines(&self) -> usize;

    /// Drive every output position from `image` in one operation
    fn drive(&mut self, image: &[u8]) -> Result<()>;

    /// Capture every input position into `image`
    ///
    /// Output-only drivers keep the default, which reports
    /// [`Error::UnsupportedOperation`].
    fn sample(&mut self, image: &mut [u8]) -> Result<()> {
        let _ = image;
        Err(Error::UnsupportedOperation)
    }
}

fn image_bit(image: &[u8], pos: usize) -> bool {
    image[pos / 8] & (1 << (pos % 8)) != 0
}

fn set_image_bit(image: &mut [u8], pos: usize, value: bool) {
    if value {
        image[pos / 8] |= 1 << (pos % 8);
    } else {
        image[pos / 8] &= !(1 << (pos % 8));
    }
}

/// Staged, bit-addressable view over a [`LineDriver`]
pub struct BitBus<D> {
    driver: D,
    /// Logical index -> physical position
    map: Vec<u8, MAX_LINES>,
    width: usize,
    staged: [u8; IMAGE_BYTES],
    latched: [u8; IMAGE_BYTES],
    synced: bool,
    sampled: [u8; IMAGE_BYTES],
}

impl<D: LineDriver> BitBus<D> {
    /// Create a bus whose logical order equals the physical order
    pub fn new(driver: D) -> Result<Self> {
        let lines = driver.lines();
        if lines > MAX_LINES {
            return Err(Error::OutOfRange);
        }
        let map = (0..lines as u8).collect();
        Ok(Self::from_parts(driver, map))
    }

    /// Create a bus with an explicit logical-to-physical map
    ///
    /// `map[i]` is the physical position of logical line `i`.
    pub fn with_map(driver: D, map: &[u8]) -> Result<Self> {
        let lines = driver.lines();
        if lines > MAX_LINES {
            return Err(Error::OutOfRange);
        }
        let mut logical = Vec::new();
        for &pos in map {
            if pos as usize >= lines {
                return Err(Error::OutOfRange);
            }
            logical.push(pos).map_err(|_| Error::OutOfRange)?;
        }
        Ok(Self::from_parts(driver, logical))
    }

    fn from_parts(driver: D, map: Vec<u8, MAX_LINES>) -> Self {
        let width = map.len();
        Self {
            driver,
            map,
            width,
            staged: [0; IMAGE_BYTES],
            latched: [0; IMAGE_BYTES],
            synced: false,
            sampled: [0; IMAGE_BYTES],
        }
    }

    fn image_len(&self) -> usize {
        self.driver.lines().div_ceil(8)
    }

    fn position(&self, index: usize) -> Result<usize> {
        if index >= self.width {
            return Err(Error::OutOfRange);
        }
        Ok(self.map[index] as usize)
    }

    /// Number of logical lines the bus was built with
    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    /// Number of logical lines currently active
    pub fn width(&self) -> usize {
        self.width
    }

    /// Restrict the bus to its first `width` logical lines
    ///
    /// Lines that become inactive are staged low; nothing is driven until
    /// the next commit.
    pub fn set_width(&mut self, width: usize) -> Result<()> {
        if width > self.map.len() {
            return Err(Error::OutOfRange);
        }
        for index in width..self.map.len() {
            let pos = self.map[index] as usize;
            set_image_bit(&mut self.staged, pos, false);
        }
        self.width = width;
        Ok(())
    }

    /// Stage one logical line
    pub fn set_bit(&mut self, index: usize, value: bool) -> Result<()> {
        let pos = self.position(index)?;
        set_image_bit(&mut self.staged, pos, value);
        Ok(())
    }

    /// Staged value of one logical line
    pub fn staged_bit(&self, index: usize) -> Result<bool> {
        let pos = self.position(index)?;
        Ok(image_bit(&self.staged, pos))
    }

    /// Stage `value` across logical lines `0..count`
    ///
    /// Fails with [`Error::OutOfRange`] if `count` exceeds the active width
    /// or `value` does not fit in `count` bits.
    pub fn set_bits(&mut self, value: u32, count: usize) -> Result<()> {
        if count > self.width || count > 32 || (count < 32 && value >> count != 0) {
            return Err(Error::OutOfRange);
        }
        for index in 0..count {
            let pos = self.map[index] as usize;
            set_image_bit(&mut self.staged, pos, value >> index & 1 != 0);
        }
        Ok(())
    }

    /// Staged value of logical lines `0..count`
    pub fn staged_bits(&self, count: usize) -> Result<u32> {
        if count > self.width || count > 32 {
            return Err(Error::OutOfRange);
        }
        Ok((0..count).fold(0u32, |acc, index| {
            let pos = self.map[index] as usize;
            acc | (image_bit(&self.staged, pos) as u32) << index
        }))
    }

    /// Stage every line low
    pub fn clear(&mut self) {
        self.staged = [0; IMAGE_BYTES];
    }

    /// Push the staged image to the physical lines
    ///
    /// Skips the driver entirely when nothing changed since the last commit.
    pub fn commit(&mut self) -> Result<()> {
        let len = self.image_len();
        if self.synced && self.staged[..len] == self.latched[..len] {
            return Ok(());
        }
        self.driver.drive(&self.staged[..len])?;
        self.latched = self.staged;
        self.synced = true;
        Ok(())
    }

    /// Capture the physical input lines
    pub fn sample(&mut self) -> Result<()> {
        let len = self.image_len();
        self.driver.sample(&mut self.sampled[..len])
    }

    /// Last sampled value of one logical line
    pub fn bit(&self, index: usize) -> Result<bool> {
        let pos = self.position(index)?;
        Ok(image_bit(&self.sampled, pos))
    }

    /// Last sampled value of logical lines `0..count`
    pub fn bits(&self, count: usize) -> Result<u32> {
        if count > self.width || count > 32 {
            return Err(Error::OutOfRange);
        }
        Ok((0..count).fold(0u32, |acc, index| {
            let pos = self.map[index] as usize;
            acc | (image_bit(&self.sampled, pos) as u32) << index
        }))
    }

    /// Borrow the underlying driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Consume the bus and return its driver
    pub fn release(self) -> D {
        self.driver
    }
}
