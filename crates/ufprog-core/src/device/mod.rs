//! Device programming engine
//!
//! A device is described by a [`DeviceConfig`]: its [`Family`] picks the
//! algorithm, [`DeviceFlags`] adjust pin usage and pulse polarity, and the
//! timings and voltages come from the family defaults unless overridden.
//!
//! The [`DeviceEngine`] runs whole operations (read, program, erase, ...)
//! as sessions. The per-family algorithms behind it implement
//! [`Algorithm`], which only knows how to touch one cell or issue one erase
//! or ID sequence.
//!
//! Cells are bytes, or big-endian byte pairs for 16-bit devices. Addresses
//! are always cell addresses.

mod engine;
mod i2c;
mod parallel;
mod session;
mod spi;

pub use engine::DeviceEngine;
pub use i2c::I2cEeprom;
pub use parallel::Parallel;
pub use session::{Session, SessionState};
pub use spi::SpiFlash;

use bitflags::bitflags;

use crate::bus::TargetBus;
use crate::error::{Error, Result};
use crate::generator::Supplies;
use crate::hal::DelayNs;

bitflags! {
    /// Per-device algorithm switches
    ///
    /// Bit positions are the wire encoding of the configure command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
    #[cfg_attr(feature = "std", serde(transparent))]
    pub struct DeviceFlags: u16 {
        /// Do not write cells whose new value is the erased value
        const SKIP_FF = 1 << 0;
        /// Switch VPP on around every program pulse
        const PROG_WITH_VPP = 1 << 1;
        /// OE pin doubles as VPP; reads drop it back to VDD level
        const VPP_OE_PIN = 1 << 2;
        /// The WE line is wired to the device's PGM/CE pin
        const PGM_CE_PIN = 1 << 3;
        /// Program pulse is WE released instead of asserted
        const PGM_POSITIVE = 1 << 4;
        /// 16-bit data bus
        const IS_16BIT = 1 << 5;
        /// Use the family's fast program timings
        const FAST_MODE = 1 << 6;
    }
}

/// How a family is wired to the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    /// Address, data and control lines
    Parallel,
    /// SCL on WE, SDA on D0
    I2c,
    /// CS on CE, SCK on WE, MOSI on D0, MISO on D1
    Spi,
}

/// Closed set of supported device families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum Family {
    /// Static RAM (6116, 62256, ...)
    Sram,
    /// UV EPROM (27xx)
    Eprom,
    /// Electrically erasable EPROM (27E / W27C)
    Eprom27E,
    /// 28C64-style EEPROM (SDP at 0x1555/0x0AAA)
    Eeprom28C64,
    /// 28C256-style EEPROM (SDP at 0x5555/0x2AAA)
    Eeprom28C256,
    /// Intel 28F flash
    Flash28F,
    /// SST 28SF flash
    FlashSst28SF,
    /// AMD 28F flash
    FlashAm28F,
    /// Intel 28F flash with status register
    FlashI28F,
    /// 24Cxx EEPROM, one word address byte
    I2cEeprom,
    /// 24Cxx EEPROM, two word address bytes
    I2cEeprom16,
    /// 25-series SPI NOR flash
    SpiFlash,
}

impl Family {
    /// Every family, in wire code order
    pub const ALL: [Family; 12] = [
        Self::Sram,
        Self::Eprom,
        Self::Eprom27E,
        Self::Eeprom28C64,
        Self::Eeprom28C256,
        Self::Flash28F,
        Self::FlashSst28SF,
        Self::FlashAm28F,
        Self::FlashI28F,
        Self::I2cEeprom,
        Self::I2cEeprom16,
        Self::SpiFlash,
    ];

    /// Wire code
    pub fn code(self) -> u8 {
        match self {
            Self::Sram => 0x04,
            Self::Eprom => 0x08,
            Self::Eprom27E => 0x09,
            Self::Eeprom28C64 => 0x0C,
            Self::Eeprom28C256 => 0x0D,
            Self::Flash28F => 0x10,
            Self::FlashSst28SF => 0x11,
            Self::FlashAm28F => 0x12,
            Self::FlashI28F => 0x13,
            Self::I2cEeprom => 0x20,
            Self::I2cEeprom16 => 0x21,
            Self::SpiFlash => 0x30,
        }
    }

    /// Family for a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.code() == code)
    }

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Sram => "SRAM",
            Self::Eprom => "EPROM",
            Self::Eprom27E => "EPROM 27E",
            Self::Eeprom28C64 => "EEPROM 28C64",
            Self::Eeprom28C256 => "EEPROM 28C256",
            Self::Flash28F => "Flash 28F",
            Self::FlashSst28SF => "Flash SST28SF",
            Self::FlashAm28F => "Flash Am28F",
            Self::FlashI28F => "Flash I28F",
            Self::I2cEeprom => "I2C EEPROM",
            Self::I2cEeprom16 => "I2C EEPROM (16-bit address)",
            Self::SpiFlash => "SPI flash",
        }
    }

    /// Socket wiring
    pub fn interface(self) -> Interface {
        match self {
            Self::I2cEeprom | Self::I2cEeprom16 => Interface::I2c,
            Self::SpiFlash => Interface::Spi,
            _ => Interface::Parallel,
        }
    }

    /// Whether the family has an electrical erase
    pub fn can_erase(self) -> bool {
        matches!(
            self,
            Self::Eprom27E
                | Self::Flash28F
                | Self::FlashSst28SF
                | Self::FlashAm28F
                | Self::FlashI28F
                | Self::SpiFlash
        )
    }

    /// Whether the family reports a manufacturer/device ID
    pub fn can_identify(self) -> bool {
        !matches!(self, Self::Sram | Self::I2cEeprom | Self::I2cEeprom16)
    }

    /// Whether the family has a write protection the programmer can toggle
    pub fn can_protect(self) -> bool {
        matches!(
            self,
            Self::Eeprom28C64 | Self::Eeprom28C256 | Self::FlashSst28SF | Self::SpiFlash
        )
    }

    /// Program pulse width and write cycle time, microseconds
    pub fn timings(self) -> (u32, u32) {
        match self {
            Self::Sram => (3, 5),
            Self::Eprom | Self::Eprom27E => (600, 8),
            Self::Eeprom28C64 | Self::Eeprom28C256 => (2, 10_000),
            Self::FlashSst28SF => (7, 50),
            Self::Flash28F | Self::FlashAm28F | Self::FlashI28F => (20, 30),
            Self::I2cEeprom | Self::I2cEeprom16 => (0, 5_000),
            Self::SpiFlash => (0, 0),
        }
    }

    /// Timings used with [`DeviceFlags::FAST_MODE`], if the family has them
    pub fn fast_timings(self) -> Option<(u32, u32)> {
        match self {
            Self::Eprom | Self::Eprom27E => Some((100, 1)),
            _ => None,
        }
    }

    /// VDD for reading, VDD for programming, VPP
    pub fn voltages(self) -> (f32, f32, f32) {
        match self {
            Self::Eprom | Self::Eprom27E => (5.0, 6.0, 13.0),
            Self::SpiFlash => (3.3, 3.3, 12.0),
            _ => (5.0, 5.0, 12.0),
        }
    }

    /// Flags a fresh configuration starts with
    pub fn default_flags(self) -> DeviceFlags {
        match self {
            Self::Eprom | Self::Eprom27E => DeviceFlags::SKIP_FF | DeviceFlags::PROG_WITH_VPP,
            Self::Flash28F | Self::FlashAm28F | Self::FlashI28F => {
                DeviceFlags::SKIP_FF | DeviceFlags::PROG_WITH_VPP
            }
            Self::FlashSst28SF | Self::SpiFlash => DeviceFlags::SKIP_FF,
            _ => DeviceFlags::empty(),
        }
    }

    /// Program attempts per cell before giving up
    pub fn default_attempts(self) -> u8 {
        match self {
            Self::Eprom | Self::Eprom27E => 25,
            _ => 3,
        }
    }
}

/// Everything the engine needs to know about the device in the socket
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceConfig {
    /// Algorithm family
    pub family: Family,
    /// Size in cells
    pub size: u32,
    /// Erase granularity in cells; 0 erases the whole chip at once
    pub sector_size: u32,
    /// Algorithm switches
    pub flags: DeviceFlags,
    /// Program pulse width, microseconds
    pub twp_us: u32,
    /// Write cycle time, microseconds
    pub twc_us: u32,
    /// VDD while reading
    pub vdd_read: f32,
    /// VDD while programming
    pub vdd_program: f32,
    /// Programming voltage
    pub vpp: f32,
    /// Program attempts per cell
    pub max_attempts: u8,
}

impl DeviceConfig {
    /// Family defaults for a device of `size` cells
    pub fn new(family: Family, size: u32) -> Self {
        let (twp_us, twc_us) = family.timings();
        let (vdd_read, vdd_program, vpp) = family.voltages();
        Self {
            family,
            size,
            sector_size: if family == Family::SpiFlash { 4096 } else { 0 },
            flags: family.default_flags(),
            twp_us,
            twc_us,
            vdd_read,
            vdd_program,
            vpp,
            max_attempts: family.default_attempts(),
        }
    }

    /// Replace the flags
    pub fn with_flags(mut self, flags: DeviceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Replace the sector size
    pub fn with_sector_size(mut self, sector_size: u32) -> Self {
        self.sector_size = sector_size;
        self
    }

    /// Reject combinations no algorithm can run
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::OutOfRange);
        }
        if self.sector_size > 0 && self.size % self.sector_size != 0 {
            return Err(Error::OutOfRange);
        }
        if self.family.interface() != Interface::Parallel && self.is_16bit() {
            return Err(Error::UnsupportedOperation);
        }
        // Only SPI flash has a sector erase command
        if self.sector_size > 0 && self.family.interface() != Interface::Spi {
            return Err(Error::UnsupportedOperation);
        }
        Ok(())
    }

    /// Pulse width and cycle time in effect
    pub fn timing(&self) -> (u32, u32) {
        if self.flags.contains(DeviceFlags::FAST_MODE) {
            if let Some(fast) = self.family.fast_timings() {
                return fast;
            }
        }
        (self.twp_us, self.twc_us)
    }

    /// 16-bit cells
    pub fn is_16bit(&self) -> bool {
        self.flags.contains(DeviceFlags::IS_16BIT)
    }

    /// Bytes per cell
    pub fn cell_bytes(&self) -> usize {
        if self.is_16bit() {
            2
        } else {
            1
        }
    }

    /// Mask of the data lines in use
    pub fn mask(&self) -> u16 {
        if self.is_16bit() {
            0xFFFF
        } else {
            0x00FF
        }
    }

    /// Value of an erased cell
    pub fn erased(&self) -> u16 {
        self.mask()
    }

    /// Address lines needed to reach every cell
    pub fn address_bits(&self) -> u8 {
        if self.size <= 1 {
            1
        } else {
            (32 - (self.size - 1).leading_zeros()) as u8
        }
    }

    /// Check that `count` cells from `base` lie inside the device
    pub fn check_range(&self, base: u32, count: u32) -> Result<()> {
        match base.checked_add(count) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::OutOfRange),
        }
    }

    /// Whether programming needs the VPP rail up
    pub fn needs_vpp(&self) -> bool {
        self.flags
            .intersects(DeviceFlags::PROG_WITH_VPP | DeviceFlags::VPP_OE_PIN)
            || self.family == Family::Eprom27E
    }

    /// Pack a cell into `out` (big-endian for 16-bit cells)
    pub fn store_cell(&self, out: &mut [u8], value: u16) {
        if self.is_16bit() {
            out[..2].copy_from_slice(&value.to_be_bytes());
        } else {
            out[0] = value as u8;
        }
    }

    /// Unpack a cell from `data`
    pub fn load_cell(&self, data: &[u8]) -> u16 {
        if self.is_16bit() {
            u16::from_be_bytes([data[0], data[1]])
        } else {
            data[0] as u16
        }
    }
}

/// Preset line states of the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSetup {
    /// Everything off and released
    Reset,
    /// Powered for reading
    Read,
    /// Powered for programming
    Program,
    /// Signature mode (VPP on A9 for parallel devices)
    GetId,
}

impl BusSetup {
    /// Wire code
    pub fn code(self) -> u8 {
        match self {
            Self::Reset => 0,
            Self::Read => 1,
            Self::Program => 2,
            Self::GetId => 3,
        }
    }

    /// Setup for a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Reset,
            1 => Self::Read,
            2 => Self::Program,
            3 => Self::GetId,
            _ => return None,
        })
    }
}

/// Hardware an algorithm drives for the length of one operation
pub struct Socket<'a> {
    /// Control, address and data lines
    pub bus: &'a mut dyn TargetBus,
    /// VDD/VPP generators
    pub power: &'a mut dyn Supplies,
    /// Pulse and cycle timing
    pub delay: &'a mut dyn DelayNs,
}

impl<'a> Socket<'a> {
    /// Borrow the parts of a programmer
    pub fn new(
        bus: &'a mut dyn TargetBus,
        power: &'a mut dyn Supplies,
        delay: &'a mut dyn DelayNs,
    ) -> Self {
        Self { bus, power, delay }
    }
}

/// One family's cell-level programming algorithm
///
/// The engine calls [`setup_bus`](Algorithm::setup_bus) before and after
/// every operation; the other methods may assume the matching setup is in
/// place.
pub trait Algorithm {
    /// Configuration the algorithm was built for
    fn config(&self) -> &DeviceConfig;

    /// Mutable configuration (timing and voltage overrides)
    fn config_mut(&mut self) -> &mut DeviceConfig;

    /// Put the socket into the line state for `setup`
    fn setup_bus(&mut self, socket: &mut Socket<'_>, setup: BusSetup) -> Result<()>;

    /// Read one cell
    fn read_cell(&mut self, socket: &mut Socket<'_>, addr: u32) -> Result<u16>;

    /// Read consecutive cells from `base`
    ///
    /// Serial devices override this with one sequential read.
    fn read_cells(&mut self, socket: &mut Socket<'_>, base: u32, cells: &mut [u16]) -> Result<()> {
        for (addr, cell) in (base..).zip(cells.iter_mut()) {
            *cell = self.read_cell(socket, addr)?;
        }
        Ok(())
    }

    /// Read one cell back for comparison, right after programming it if
    /// `after_program` is set
    fn check_cell(&mut self, socket: &mut Socket<'_>, addr: u32, after_program: bool) -> Result<u16> {
        let _ = after_program;
        self.read_cell(socket, addr)
    }

    /// Apply one program cycle to one cell
    fn program_cell(&mut self, socket: &mut Socket<'_>, addr: u32, value: u16) -> Result<()>;

    /// Erase the whole device
    fn erase_chip(&mut self, socket: &mut Socket<'_>) -> Result<()> {
        let _ = socket;
        Err(Error::UnsupportedOperation)
    }

    /// Erase the sector starting at `addr`
    fn erase_sector(&mut self, socket: &mut Socket<'_>, addr: u32) -> Result<()> {
        let _ = (socket, addr);
        Err(Error::UnsupportedOperation)
    }

    /// Manufacturer and device ID
    fn get_id(&mut self, socket: &mut Socket<'_>) -> Result<(u16, u16)> {
        let _ = socket;
        Err(Error::UnsupportedOperation)
    }

    /// Enable or disable write protection
    fn protect(&mut self, socket: &mut Socket<'_>, enable: bool) -> Result<()> {
        let _ = (socket, enable);
        Err(Error::UnsupportedOperation)
    }
}

/// Algorithm selected by the configured family
pub enum Driver {
    /// Parallel-bus families
    Parallel(Parallel),
    /// 24Cxx EEPROMs
    I2c(I2cEeprom),
    /// 25-series flash
    Spi(SpiFlash),
}

impl Driver {
    /// Build the algorithm for `config.family`
    pub fn new(config: DeviceConfig) -> Self {
        match config.family.interface() {
            Interface::Parallel => Self::Parallel(Parallel::new(config)),
            Interface::I2c => Self::I2c(I2cEeprom::new(config)),
            Interface::Spi => Self::Spi(SpiFlash::new(config)),
        }
    }

    fn inner(&mut self) -> &mut dyn Algorithm {
        match self {
            Self::Parallel(a) => a,
            Self::I2c(a) => a,
            Self::Spi(a) => a,
        }
    }
}

impl Algorithm for Driver {
    fn config(&self) -> &DeviceConfig {
        match self {
            Self::Parallel(a) => a.config(),
            Self::I2c(a) => a.config(),
            Self::Spi(a) => a.config(),
        }
    }

    fn config_mut(&mut self) -> &mut DeviceConfig {
        self.inner().config_mut()
    }

    fn setup_bus(&mut self, socket: &mut Socket<'_>, setup: BusSetup) -> Result<()> {
        self.inner().setup_bus(socket, setup)
    }

    fn read_cell(&mut self, socket: &mut Socket<'_>, addr: u32) -> Result<u16> {
        self.inner().read_cell(socket, addr)
    }

    fn read_cells(&mut self, socket: &mut Socket<'_>, base: u32, cells: &mut [u16]) -> Result<()> {
        self.inner().read_cells(socket, base, cells)
    }

    fn check_cell(&mut self, socket: &mut Socket<'_>, addr: u32, after_program: bool) -> Result<u16> {
        self.inner().check_cell(socket, addr, after_program)
    }

    fn program_cell(&mut self, socket: &mut Socket<'_>, addr: u32, value: u16) -> Result<()> {
        self.inner().program_cell(socket, addr, value)
    }

    fn erase_chip(&mut self, socket: &mut Socket<'_>) -> Result<()> {
        self.inner().erase_chip(socket)
    }

    fn erase_sector(&mut self, socket: &mut Socket<'_>, addr: u32) -> Result<()> {
        self.inner().erase_sector(socket, addr)
    }

    fn get_id(&mut self, socket: &mut Socket<'_>) -> Result<(u16, u16)> {
        self.inner().get_id(socket)
    }

    fn protect(&mut self, socket: &mut Socket<'_>, enable: bool) -> Result<()> {
        self.inner().protect(socket, enable)
    }
}
