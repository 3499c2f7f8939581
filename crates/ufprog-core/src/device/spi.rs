//! 25-series SPI flash over the socket lines
//!
//! The bus is bit-banged MSB first in SPI mode 0:
//!
//! - CS on CE (asserted is CS low)
//! - SCK on WE (released is SCK high)
//! - MOSI on D0, MISO sampled from D1

use super::{Algorithm, BusSetup, DeviceConfig, Socket};
use crate::error::{Error, Result};
use crate::regulator::Rail;

/// Write enable
pub const WREN: u8 = 0x06;
/// Read status register
pub const RDSR: u8 = 0x05;
/// Write status register
pub const WRSR: u8 = 0x01;
/// Read JEDEC ID
pub const RDID: u8 = 0x9F;
/// Read data
pub const READ: u8 = 0x03;
/// Page program
pub const PP: u8 = 0x02;
/// 4 KiB sector erase
pub const SE_20: u8 = 0x20;
/// Chip erase
pub const CE_C7: u8 = 0xC7;

/// Write in progress
const SR_WIP: u8 = 0x01;
/// Block protect bits BP0..BP2
const SR_BP: u8 = 0x1C;

const MISO: u16 = 1 << 1;
const HALF_PERIOD_NS: u32 = 500;
const POLL_US: u32 = 100;

const PROGRAM_TIMEOUT_US: u32 = 10_000;
const SECTOR_ERASE_TIMEOUT_US: u32 = 1_000_000;
const CHIP_ERASE_TIMEOUT_US: u32 = 200_000_000;
const STATUS_WRITE_TIMEOUT_US: u32 = 100_000;

/// Bit-level view of the socket as an SPI master
struct Wires<'s, 'a> {
    s: &'s mut Socket<'a>,
}

impl Wires<'_, '_> {
    fn set_cs(&mut self, active: bool) -> Result<()> {
        self.s.bus.set_ce(active)
    }

    fn set_sck(&mut self, high: bool) -> Result<()> {
        self.s.bus.set_we(!high)
    }

    fn set_mosi(&mut self, high: bool) -> Result<()> {
        self.s.bus.set_data(high as u16)
    }

    fn get_miso(&mut self) -> Result<bool> {
        Ok(self.s.bus.get_data()? & MISO != 0)
    }

    fn half_period_delay(&mut self) {
        self.s.delay.delay_ns(HALF_PERIOD_NS);
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        for i in (0..8).rev() {
            self.set_sck(false)?;
            self.set_mosi((byte >> i) & 1 != 0)?;
            self.half_period_delay();
            self.set_sck(true)?;
            self.half_period_delay();
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = 0u8;
        for _ in 0..8 {
            self.set_sck(false)?;
            self.half_period_delay();
            self.set_sck(true)?;
            byte <<= 1;
            if self.get_miso()? {
                byte |= 1;
            }
            self.half_period_delay();
        }
        Ok(byte)
    }

    /// CS asserted around `out` followed by `input.len()` read bytes
    fn transaction(&mut self, out: &[u8], input: &mut [u8]) -> Result<()> {
        self.set_cs(true)?;
        let result = self.shift(out, input);
        self.set_cs(false)?;
        self.set_sck(false)?;
        result
    }

    fn shift(&mut self, out: &[u8], input: &mut [u8]) -> Result<()> {
        for &byte in out {
            self.write_byte(byte)?;
        }
        for byte in input.iter_mut() {
            *byte = self.read_byte()?;
        }
        Ok(())
    }
}

fn address_bytes(opcode: u8, addr: u32) -> [u8; 4] {
    let [_, a2, a1, a0] = addr.to_be_bytes();
    [opcode, a2, a1, a0]
}

/// 25-series flash with 3-byte addressing
pub struct SpiFlash {
    config: DeviceConfig,
}

impl SpiFlash {
    /// Algorithm for `config`
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    fn status(s: &mut Socket<'_>) -> Result<u8> {
        let mut sr = [0u8; 1];
        Wires { s }.transaction(&[RDSR], &mut sr)?;
        Ok(sr[0])
    }

    /// Poll the busy flag until clear, or fail after `timeout_us`
    fn wait_ready(s: &mut Socket<'_>, timeout_us: u32) -> Result<()> {
        let mut waited = 0;
        loop {
            if Self::status(s)? & SR_WIP == 0 {
                return Ok(());
            }
            if waited >= timeout_us {
                log::warn!("spi: still busy after {} us", waited);
                return Err(Error::NoResponse);
            }
            s.delay.delay_us(POLL_US);
            waited += POLL_US;
        }
    }

    /// WREN, the command itself, then wait for completion
    fn write_command(s: &mut Socket<'_>, out: &[u8], timeout_us: u32) -> Result<()> {
        let mut wires = Wires { s: &mut *s };
        wires.transaction(&[WREN], &mut [])?;
        wires.transaction(out, &mut [])?;
        Self::wait_ready(s, timeout_us)
    }
}

impl Algorithm for SpiFlash {
    fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut DeviceConfig {
        &mut self.config
    }

    fn setup_bus(&mut self, s: &mut Socket<'_>, setup: BusSetup) -> Result<()> {
        s.power.release()?;
        s.bus.set_data_wide(false)?;
        s.bus.set_oe(false)?;
        s.bus.set_ce(false)?;
        // SCK idles low
        s.bus.set_we(true)?;
        s.bus.set_data(0)?;
        if setup != BusSetup::Reset {
            s.power.set_output(Rail::Vdd, true)?;
        }
        log::trace!("spi: bus setup {:?}", setup);
        Ok(())
    }

    fn read_cell(&mut self, s: &mut Socket<'_>, addr: u32) -> Result<u16> {
        let mut data = [0u8; 1];
        Wires { s }.transaction(&address_bytes(READ, addr), &mut data)?;
        Ok(data[0] as u16)
    }

    fn read_cells(&mut self, s: &mut Socket<'_>, base: u32, cells: &mut [u16]) -> Result<()> {
        let mut wires = Wires { s };
        wires.set_cs(true)?;
        let result = (|| -> Result<()> {
            for &byte in &address_bytes(READ, base) {
                wires.write_byte(byte)?;
            }
            for cell in cells.iter_mut() {
                *cell = wires.read_byte()? as u16;
            }
            Ok(())
        })();
        wires.set_cs(false)?;
        wires.set_sck(false)?;
        result
    }

    fn program_cell(&mut self, s: &mut Socket<'_>, addr: u32, value: u16) -> Result<()> {
        let [op, a2, a1, a0] = address_bytes(PP, addr);
        Self::write_command(s, &[op, a2, a1, a0, value as u8], PROGRAM_TIMEOUT_US)
    }

    fn erase_chip(&mut self, s: &mut Socket<'_>) -> Result<()> {
        log::debug!("spi: chip erase");
        Self::write_command(s, &[CE_C7], CHIP_ERASE_TIMEOUT_US)
    }

    fn erase_sector(&mut self, s: &mut Socket<'_>, addr: u32) -> Result<()> {
        Self::write_command(s, &address_bytes(SE_20, addr), SECTOR_ERASE_TIMEOUT_US)
    }

    fn get_id(&mut self, s: &mut Socket<'_>) -> Result<(u16, u16)> {
        let mut id = [0u8; 3];
        Wires { s }.transaction(&[RDID], &mut id)?;
        // Floating or shorted MISO
        if id == [0xFF; 3] || id == [0x00; 3] {
            return Err(Error::NoResponse);
        }
        Ok((id[0] as u16, u16::from_be_bytes([id[1], id[2]])))
    }

    fn protect(&mut self, s: &mut Socket<'_>, enable: bool) -> Result<()> {
        let bits = if enable { SR_BP } else { 0 };
        Self::write_command(s, &[WRSR, bits], STATUS_WRITE_TIMEOUT_US)
    }
}
