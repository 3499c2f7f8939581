//! Control, address and data buses
//!
//! Thin named wrappers over [`BitBus`]. They only set line states; pulse
//! widths and cycle times belong to the device algorithms one layer up.
//!
//! Control lines are expressed as *asserted* (`true`) or released. The board
//! buffers translate that to the active-low `/CE`, `/OE` and `/WE` pins of the
//! socket.

use crate::bitbus::{BitBus, LineDriver};
use crate::error::{Error, Result};

/// One of the three control lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlLine {
    /// Chip enable
    Ce,
    /// Output enable
    Oe,
    /// Write enable / program pulse
    We,
}

impl ControlLine {
    fn index(self) -> usize {
        match self {
            Self::Ce => 0,
            Self::Oe => 1,
            Self::We => 2,
        }
    }
}

/// Line-level access used by the device algorithms
///
/// [`Buses`] implements this over real bit-buses; tests implement it over an
/// in-memory device model.
pub trait TargetBus {
    /// Assert or release a control line
    fn set_control(&mut self, line: ControlLine, active: bool) -> Result<()>;

    /// Current (committed) state of a control line
    fn control(&self, line: ControlLine) -> bool;

    /// Put `address` on the address lines
    fn set_address(&mut self, address: u32) -> Result<()>;

    /// Address currently on the lines
    fn address(&self) -> u32;

    /// Number of active address lines
    fn set_address_width(&mut self, width: u8) -> Result<()>;

    /// Drive `value` on the data lines
    fn set_data(&mut self, value: u16) -> Result<()>;

    /// Sample the data lines
    fn get_data(&mut self) -> Result<u16>;

    /// Switch the data bus between 8 and 16 lines
    fn set_data_wide(&mut self, wide: bool) -> Result<()>;

    /// Step to the next address
    fn increment_address(&mut self) -> Result<()> {
        let next = self.address().checked_add(1).ok_or(Error::OutOfRange)?;
        self.set_address(next)
    }

    /// Assert or release `/CE`
    fn set_ce(&mut self, active: bool) -> Result<()> {
        self.set_control(ControlLine::Ce, active)
    }

    /// Assert or release `/OE`
    fn set_oe(&mut self, active: bool) -> Result<()> {
        self.set_control(ControlLine::Oe, active)
    }

    /// Assert or release `/WE`
    fn set_we(&mut self, active: bool) -> Result<()> {
        self.set_control(ControlLine::We, active)
    }
}

/// CE/OE/WE lines
pub struct CtrlBus<D> {
    bus: BitBus<D>,
}

impl<D: LineDriver> CtrlBus<D> {
    /// Use physical positions 0, 1 and 2 of `driver` for CE, OE and WE
    pub fn new(driver: D) -> Result<Self> {
        Ok(Self {
            bus: BitBus::with_map(driver, &[0, 1, 2])?,
        })
    }

    /// Assert or release one line and commit
    pub fn set(&mut self, line: ControlLine, active: bool) -> Result<()> {
        self.bus.set_bit(line.index(), active)?;
        self.bus.commit()
    }

    /// Staged state of one line
    pub fn is_active(&self, line: ControlLine) -> bool {
        self.bus.staged_bit(line.index()).unwrap_or(false)
    }

    /// Release all lines
    pub fn release(&mut self) -> Result<()> {
        self.bus.clear();
        self.bus.commit()
    }
}

/// Address lines
pub struct AddrBus<D> {
    bus: BitBus<D>,
    address: u32,
}

impl<D: LineDriver> AddrBus<D> {
    /// All lines of `driver` become address lines, bit 0 first
    pub fn new(driver: D) -> Result<Self> {
        Ok(Self {
            bus: BitBus::new(driver)?,
            address: 0,
        })
    }

    /// Number of active address lines
    pub fn width(&self) -> usize {
        self.bus.width()
    }

    /// Activate only the first `width` lines; the address resets to 0
    pub fn setup(&mut self, width: usize) -> Result<()> {
        if width > 32 {
            return Err(Error::OutOfRange);
        }
        self.bus.set_width(width)?;
        self.set(0)
    }

    /// Put an address on the bus
    ///
    /// Fails with [`Error::OutOfRange`] if it needs more than the active
    /// lines.
    pub fn set(&mut self, address: u32) -> Result<()> {
        let lines = self.bus.width().min(32);
        self.bus.set_bits(address, lines)?;
        self.bus.commit()?;
        self.address = address;
        Ok(())
    }

    /// Next address
    pub fn increment(&mut self) -> Result<()> {
        let next = self.address.checked_add(1).ok_or(Error::OutOfRange)?;
        self.set(next)
    }

    /// Address 0
    pub fn clear(&mut self) -> Result<()> {
        self.set(0)
    }

    /// Address last committed
    pub fn address(&self) -> u32 {
        self.address
    }
}

/// Bidirectional data lines
pub struct DataBus<D> {
    bus: BitBus<D>,
}

impl<D: LineDriver> DataBus<D> {
    /// Data bus over `driver`, starting 8 lines wide
    pub fn new(driver: D) -> Result<Self> {
        let mut bus = BitBus::new(driver)?;
        if bus.capacity() < 8 {
            return Err(Error::OutOfRange);
        }
        bus.set_width(8)?;
        Ok(Self { bus })
    }

    /// Use 16 lines instead of 8
    pub fn set_wide(&mut self, wide: bool) -> Result<()> {
        self.bus.set_width(if wide { 16 } else { 8 })
    }

    /// Whether the bus is 16 lines wide
    pub fn is_wide(&self) -> bool {
        self.bus.width() == 16
    }

    /// Drive a byte or word
    pub fn set(&mut self, value: u16) -> Result<()> {
        let lines = self.bus.width();
        self.bus.set_bits(value as u32, lines)?;
        self.bus.commit()
    }

    /// Sample and return the lines
    pub fn get(&mut self) -> Result<u16> {
        self.bus.sample()?;
        Ok(self.bus.bits(self.bus.width())? as u16)
    }

    /// Drive all lines low
    pub fn clear(&mut self) -> Result<()> {
        self.bus.clear();
        self.bus.commit()
    }
}

/// The three buses of the socket, bundled for the device engine
pub struct Buses<C, A, D> {
    /// Control lines
    pub ctrl: CtrlBus<C>,
    /// Address lines
    pub addr: AddrBus<A>,
    /// Data lines
    pub data: DataBus<D>,
}

impl<C: LineDriver, A: LineDriver, D: LineDriver> Buses<C, A, D> {
    /// Bundle the buses
    pub fn new(ctrl: CtrlBus<C>, addr: AddrBus<A>, data: DataBus<D>) -> Self {
        Self { ctrl, addr, data }
    }
}

impl<C: LineDriver, A: LineDriver, D: LineDriver> TargetBus for Buses<C, A, D> {
    fn set_control(&mut self, line: ControlLine, active: bool) -> Result<()> {
        self.ctrl.set(line, active)
    }

    fn control(&self, line: ControlLine) -> bool {
        self.ctrl.is_active(line)
    }

    fn set_address(&mut self, address: u32) -> Result<()> {
        self.addr.set(address)
    }

    fn address(&self) -> u32 {
        self.addr.address()
    }

    fn set_address_width(&mut self, width: u8) -> Result<()> {
        self.addr.setup(width as usize)
    }

    fn set_data(&mut self, value: u16) -> Result<()> {
        self.data.set(value)
    }

    fn get_data(&mut self) -> Result<u16> {
        self.data.get()
    }

    fn set_data_wide(&mut self, wide: bool) -> Result<()> {
        self.data.set_wide(wide)
    }

    fn increment_address(&mut self) -> Result<()> {
        self.addr.increment()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingDriver;

    #[test]
    fn test_control_lines() {
        let driver = RecordingDriver::new(8);
        let log = driver.log();
        let mut ctrl = CtrlBus::new(driver).unwrap();

        ctrl.set(ControlLine::Oe, true).unwrap();
        ctrl.set(ControlLine::We, true).unwrap();
        assert!(ctrl.is_active(ControlLine::Oe));
        assert!(!ctrl.is_active(ControlLine::Ce));
        assert_eq!(log.borrow().drives.last().unwrap()[0], 0b110);

        ctrl.release().unwrap();
        assert_eq!(log.borrow().drives.last().unwrap()[0], 0);
    }

    #[test]
    fn test_address_width() {
        let driver = RecordingDriver::new(24);
        let log = driver.log();
        let mut addr = AddrBus::new(driver).unwrap();

        addr.set(0x12_3456).unwrap();
        assert_eq!(log.borrow().drives.last().unwrap()[..], [0x56, 0x34, 0x12]);

        addr.setup(12).unwrap();
        assert_eq!(addr.address(), 0);
        assert_eq!(addr.set(0x1000), Err(Error::OutOfRange));
        addr.set(0xFFF).unwrap();
        assert_eq!(addr.increment(), Err(Error::OutOfRange));
        assert_eq!(addr.address(), 0xFFF);
        assert_eq!(addr.setup(25), Err(Error::OutOfRange));
    }

    #[test]
    fn test_address_increment() {
        let mut addr = AddrBus::new(RecordingDriver::new(16)).unwrap();
        addr.set(0x00FF).unwrap();
        addr.increment().unwrap();
        assert_eq!(addr.address(), 0x0100);
    }

    #[test]
    fn test_data_width() {
        let driver = RecordingDriver::new(16).with_input();
        let log = driver.log();
        let mut data = DataBus::new(driver).unwrap();

        assert_eq!(data.set(0x1FF), Err(Error::OutOfRange));
        data.set(0xA5).unwrap();

        data.set_wide(true).unwrap();
        assert!(data.is_wide());
        data.set(0xBEEF).unwrap();
        assert_eq!(log.borrow().drives.last().unwrap()[..], [0xEF, 0xBE]);

        log.borrow_mut().input = std::vec![0x34, 0x12];
        assert_eq!(data.get().unwrap(), 0x1234);
        data.set_wide(false).unwrap();
        assert_eq!(data.get().unwrap(), 0x34);
    }

    #[test]
    fn test_narrow_data_driver_rejected() {
        assert!(DataBus::new(RecordingDriver::new(4)).is_err());
    }
}
