//! Staging buffer between the protocol and the device engine
//!
//! The host fills it 16 bytes per `BufWrite`, then runs a device program or
//! verify over it; device reads land here and come back with `BufRead`.

use crate::error::{Error, Result};

/// Size of the staging buffer in bytes
pub const BUFFER_SIZE: usize = 256;
/// Bytes moved by one `BufWrite`/`BufRead`
pub const BLOCK_SIZE: usize = 16;

/// Fixed 256-byte staging area
pub struct StagingBuffer {
    data: [u8; BUFFER_SIZE],
}

impl StagingBuffer {
    /// Zeroed buffer
    pub const fn new() -> Self {
        Self {
            data: [0; BUFFER_SIZE],
        }
    }

    /// Zero every byte
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    fn block_range(offset: u16) -> Result<core::ops::Range<usize>> {
        let start = offset as usize;
        if start + BLOCK_SIZE > BUFFER_SIZE {
            log::debug!("buffer: block at {} out of range", start);
            return Err(Error::OutOfRange);
        }
        Ok(start..start + BLOCK_SIZE)
    }

    /// Store four little-endian dwords at `offset`
    pub fn write_block(&mut self, offset: u16, words: &[u32; 4]) -> Result<()> {
        let range = Self::block_range(offset)?;
        for (chunk, word) in self.data[range].chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    /// Load four little-endian dwords from `offset`
    pub fn read_block(&self, offset: u16) -> Result<[u32; 4]> {
        let range = Self::block_range(offset)?;
        let mut words = [0u32; 4];
        for (word, chunk) in words.iter_mut().zip(self.data[range].chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(words)
    }

    /// First `len` bytes
    pub fn get(&self, len: usize) -> Result<&[u8]> {
        self.data.get(..len).ok_or(Error::OutOfRange)
    }

    /// First `len` bytes, writable
    pub fn get_mut(&mut self, len: usize) -> Result<&mut [u8]> {
        self.data.get_mut(..len).ok_or(Error::OutOfRange)
    }
}

impl Default for StagingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
