//! 24Cxx I2C EEPROM over the socket lines
//!
//! SCL is the WE line (released is SCL high). SDA is D0 driven open drain:
//! writing 1 releases it, and its level is read back from the data bus.

use super::{Algorithm, BusSetup, DeviceConfig, Family, Socket};
use crate::error::{Error, Result};
use crate::regulator::Rail;

/// Device type identifier of serial EEPROMs
const DEVICE_CODE: u8 = 0xA0;
const SDA: u16 = 1 << 0;
/// Half SCL period for ~100 kHz
const HALF_PERIOD_US: u32 = 5;
const ACK_POLL_US: u32 = 100;
/// Lower bound of the ACK polling budget
const MIN_WRITE_TIMEOUT_US: u32 = 10_000;

struct Lines<'s, 'a> {
    s: &'s mut Socket<'a>,
}

impl Lines<'_, '_> {
    fn scl(&mut self, high: bool) -> Result<()> {
        self.s.bus.set_we(!high)
    }

    fn sda(&mut self, high: bool) -> Result<()> {
        self.s.bus.set_data(high as u16)
    }

    fn sda_in(&mut self) -> Result<bool> {
        Ok(self.s.bus.get_data()? & SDA != 0)
    }

    fn half(&mut self) {
        self.s.delay.delay_us(HALF_PERIOD_US);
    }

    /// START (also a repeated START)
    fn start(&mut self) -> Result<()> {
        self.sda(true)?;
        self.scl(true)?;
        self.half();
        self.sda(false)?;
        self.half();
        self.scl(false)?;
        self.half();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.sda(false)?;
        self.half();
        self.scl(true)?;
        self.half();
        self.sda(true)?;
        self.half();
        Ok(())
    }

    /// Clock out `byte`; returns whether the slave acknowledged it
    fn write_byte(&mut self, byte: u8) -> Result<bool> {
        for i in (0..8).rev() {
            self.sda((byte >> i) & 1 != 0)?;
            self.half();
            self.scl(true)?;
            self.half();
            self.scl(false)?;
        }
        self.sda(true)?;
        self.half();
        self.scl(true)?;
        self.half();
        let ack = !self.sda_in()?;
        self.scl(false)?;
        self.half();
        Ok(ack)
    }

    /// Clock in a byte and answer ACK (more to come) or NACK
    fn read_byte(&mut self, ack: bool) -> Result<u8> {
        let mut byte = 0u8;
        self.sda(true)?;
        for _ in 0..8 {
            self.half();
            self.scl(true)?;
            self.half();
            byte <<= 1;
            if self.sda_in()? {
                byte |= 1;
            }
            self.scl(false)?;
        }
        self.sda(!ack)?;
        self.half();
        self.scl(true)?;
        self.half();
        self.scl(false)?;
        self.sda(true)?;
        Ok(byte)
    }

    /// Send one byte, issuing STOP and failing on NACK
    fn send(&mut self, byte: u8) -> Result<()> {
        if self.write_byte(byte)? {
            Ok(())
        } else {
            self.stop()?;
            Err(Error::NoResponse)
        }
    }
}

/// 24Cxx EEPROM with one or two word address bytes
///
/// Address bits above the word address go into the block-select bits of
/// the device byte, so 24C04..24C16 and 24C1024 work unchanged.
pub struct I2cEeprom {
    config: DeviceConfig,
}

impl I2cEeprom {
    /// Algorithm for `config`
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    fn address_bytes(&self) -> usize {
        if self.config.family == Family::I2cEeprom16 {
            2
        } else {
            1
        }
    }

    /// Device byte for `addr`, write direction
    fn device_byte(&self, addr: u32) -> u8 {
        let block = addr >> (8 * self.address_bytes());
        DEVICE_CODE | ((block as u8 & 0x07) << 1)
    }

    /// START, device byte and word address
    fn select(&self, lines: &mut Lines<'_, '_>, addr: u32) -> Result<()> {
        lines.start()?;
        lines.send(self.device_byte(addr))?;
        let word = addr.to_be_bytes();
        for byte in &word[4 - self.address_bytes()..] {
            lines.send(*byte)?;
        }
        Ok(())
    }

    /// Wait for the write cycle to end: the part NACKs its address until then
    fn ack_poll(&self, lines: &mut Lines<'_, '_>, addr: u32) -> Result<()> {
        let budget = self.config.timing().1.max(MIN_WRITE_TIMEOUT_US);
        let mut waited = 0;
        loop {
            lines.start()?;
            let ack = lines.write_byte(self.device_byte(addr))?;
            lines.stop()?;
            if ack {
                return Ok(());
            }
            if waited >= budget {
                log::warn!("i2c: no ACK {} us after write", waited);
                return Err(Error::NoResponse);
            }
            lines.s.delay.delay_us(ACK_POLL_US);
            waited += ACK_POLL_US;
        }
    }
}

impl Algorithm for I2cEeprom {
    fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut DeviceConfig {
        &mut self.config
    }

    fn setup_bus(&mut self, s: &mut Socket<'_>, setup: BusSetup) -> Result<()> {
        s.power.release()?;
        s.bus.set_data_wide(false)?;
        s.bus.set_ce(false)?;
        s.bus.set_oe(false)?;
        // Bus idle: SCL and SDA released
        s.bus.set_we(false)?;
        s.bus.set_data(1)?;
        if setup != BusSetup::Reset {
            s.power.set_output(Rail::Vdd, true)?;
        }
        log::trace!("i2c: bus setup {:?}", setup);
        Ok(())
    }

    fn read_cell(&mut self, s: &mut Socket<'_>, addr: u32) -> Result<u16> {
        let mut cell = [0u16; 1];
        self.read_cells(s, addr, &mut cell)?;
        Ok(cell[0])
    }

    fn read_cells(&mut self, s: &mut Socket<'_>, base: u32, cells: &mut [u16]) -> Result<()> {
        let Some(last) = cells.len().checked_sub(1) else {
            return Ok(());
        };
        let mut lines = Lines { s };
        self.select(&mut lines, base)?;
        lines.start()?;
        lines.send(self.device_byte(base) | 1)?;
        // Sequential read; the internal address counter rolls over by itself
        for (i, cell) in cells.iter_mut().enumerate() {
            *cell = lines.read_byte(i != last)? as u16;
        }
        lines.stop()
    }

    fn program_cell(&mut self, s: &mut Socket<'_>, addr: u32, value: u16) -> Result<()> {
        let mut lines = Lines { s };
        self.select(&mut lines, addr)?;
        lines.send(value as u8)?;
        lines.stop()?;
        self.ack_poll(&mut lines, addr)
    }
}
