//! Parallel-bus algorithms
//!
//! SRAM, EPROM, 28C EEPROM and 28F flash all share the same bus cycles:
//!
//! - output cycle: OE asserted, sample data, OE released
//! - write cycle: data on the bus, one program pulse on WE
//!
//! What differs per family are the command sequences written before a
//! cycle (flash), the protection sequences (EEPROM), and erase.

use super::{Algorithm, BusSetup, DeviceConfig, DeviceFlags, Family, Socket};
use crate::error::{Error, Result};
use crate::generator::VppRoute;
use crate::regulator::Rail;

/// Erase pulse with VPP on A9 for 27E parts, milliseconds
pub const ERASE_PULSE_27E_MS: u32 = 100;
/// Wait after a 28F erase command, milliseconds
pub const ERASE_DELAY_28F_MS: u32 = 10;
/// I28F status byte with bit 0 masked
const STATUS_OK_I28F: u16 = 0x80;

/// One bus write of a command sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cycle {
    /// `None` writes at the address already on the bus
    addr: Option<u32>,
    data: u16,
}

const fn at(addr: u32, data: u16) -> Cycle {
    Cycle {
        addr: Some(addr),
        data,
    }
}

const fn here(data: u16) -> Cycle {
    Cycle { addr: None, data }
}

const UNPROTECT_28C64: &[Cycle] = &[
    at(0x1555, 0xAA),
    at(0x0AAA, 0x55),
    at(0x1555, 0x80),
    at(0x1555, 0xAA),
    at(0x0AAA, 0x55),
    at(0x1555, 0x20),
];
const PROTECT_28C64: &[Cycle] = &[at(0x1555, 0xAA), at(0x0AAA, 0x55), at(0x1555, 0xA0)];
const UNPROTECT_28C256: &[Cycle] = &[
    at(0x5555, 0xAA),
    at(0x2AAA, 0x55),
    at(0x5555, 0x80),
    at(0x5555, 0xAA),
    at(0x2AAA, 0x55),
    at(0x5555, 0x20),
];
const PROTECT_28C256: &[Cycle] = &[at(0x5555, 0xAA), at(0x2AAA, 0x55), at(0x5555, 0xA0)];

/// SST28SF protection is toggled by reading these addresses in order
const SST28SF_DISABLE_SDP: [u32; 7] = [0x1823, 0x1820, 0x1822, 0x0418, 0x041B, 0x0419, 0x041A];
const SST28SF_ENABLE_SDP: [u32; 7] = [0x1823, 0x1820, 0x1822, 0x0418, 0x041B, 0x0419, 0x040A];

/// Command sequences of one family; empty means "none"
struct CommandSet {
    read: &'static [Cycle],
    write: &'static [Cycle],
    verify: &'static [Cycle],
    erase: &'static [Cycle],
    id: &'static [Cycle],
}

const NO_COMMANDS: CommandSet = CommandSet {
    read: &[],
    write: &[],
    verify: &[],
    erase: &[],
    id: &[],
};

const ID_0X90: &[Cycle] = &[at(0x00, 0x90)];

fn commands(family: Family) -> CommandSet {
    match family {
        Family::Flash28F => CommandSet {
            read: const { &[here(0x00)] },
            write: const { &[here(0x40)] },
            verify: const { &[here(0xC0)] },
            erase: const { &[here(0x20), here(0x20)] },
            id: ID_0X90,
        },
        Family::FlashSst28SF => CommandSet {
            read: &[],
            write: const { &[here(0x10)] },
            verify: &[],
            erase: const { &[here(0x20), here(0xD0)] },
            id: ID_0X90,
        },
        Family::FlashAm28F => CommandSet {
            read: const { &[here(0x00)] },
            write: const { &[here(0x10)] },
            verify: const { &[here(0x00)] },
            erase: const { &[here(0x30), here(0x30)] },
            id: ID_0X90,
        },
        Family::FlashI28F => CommandSet {
            read: const { &[here(0xFF)] },
            write: const { &[here(0x40)] },
            verify: const { &[here(0xFF)] },
            erase: const { &[here(0x20), here(0xD0)] },
            id: ID_0X90,
        },
        _ => NO_COMMANDS,
    }
}

/// Algorithm for every parallel-bus family
pub struct Parallel {
    config: DeviceConfig,
    commands: CommandSet,
}

impl Parallel {
    /// Algorithm for `config.family`
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            commands: commands(config.family),
        }
    }

    fn flag(&self, flag: DeviceFlags) -> bool {
        self.config.flags.contains(flag)
    }

    fn twp(&self) -> u32 {
        self.config.timing().0
    }

    fn twc(&self) -> u32 {
        self.config.timing().1
    }

    /// OE asserted, sample, OE released
    fn output_cycle(&self, s: &mut Socket<'_>) -> Result<u16> {
        let vpp_oe = self.flag(DeviceFlags::VPP_OE_PIN);
        if vpp_oe {
            s.power.set_vdd_on_vpp(false)?;
        }
        s.bus.set_oe(true)?;
        let data = s.bus.get_data();
        s.bus.set_oe(false)?;
        if vpp_oe {
            s.power.set_vdd_on_vpp(true)?;
        }
        Ok(data? & self.config.mask())
    }

    /// Start and end of one program pulse
    fn pulse(&self, s: &mut Socket<'_>, us: u32) -> Result<()> {
        let positive = self.flag(DeviceFlags::PGM_POSITIVE);
        s.bus.set_we(!positive)?;
        s.delay.delay_us(us);
        s.bus.set_we(positive)
    }

    /// Data on the bus and one program pulse at the current address
    ///
    /// `vpp` allows VPP to be switched on around the pulse; `command`
    /// sends the family's write command first and checks its status after.
    fn write_cycle(&self, s: &mut Socket<'_>, data: u16, vpp: bool, command: bool) -> Result<()> {
        let with_vpp = vpp && self.flag(DeviceFlags::PROG_WITH_VPP);
        if with_vpp {
            s.power.set_vdd_on_vpp(false)?;
            s.power.set_output(Rail::Vpp, true)?;
        }
        let result = self.write_cycle_inner(s, data, command);
        if with_vpp {
            s.power.set_output(Rail::Vpp, false)?;
            s.power.set_vdd_on_vpp(true)?;
        }
        result
    }

    fn write_cycle_inner(&self, s: &mut Socket<'_>, data: u16, command: bool) -> Result<()> {
        // VPP, if needed, is already up for the whole cycle
        if command {
            self.send(s, self.commands.write, false)?;
        }
        s.bus.set_data(data & self.config.mask())?;
        self.pulse(s, self.twp())?;
        if command {
            self.check_status(s)?;
        }
        Ok(())
    }

    /// Write a command sequence; `vpp` is false for read commands
    fn send(&self, s: &mut Socket<'_>, cycles: &[Cycle], vpp: bool) -> Result<()> {
        for cycle in cycles {
            let addr = match cycle.addr {
                Some(addr) => addr,
                None => s.bus.address(),
            };
            s.bus.set_address(addr)?;
            self.write_cycle(s, cycle.data, vpp, false)?;
            s.delay.delay_us(self.twp());
        }
        Ok(())
    }

    /// I28F reports program/erase success in its status byte
    fn check_status(&self, s: &mut Socket<'_>) -> Result<()> {
        if self.config.family != Family::FlashI28F {
            return Ok(());
        }
        s.bus.set_oe(true)?;
        let status = s.bus.get_data();
        s.bus.set_oe(false)?;
        if status? & 0xFE == STATUS_OK_I28F {
            Ok(())
        } else {
            log::warn!("parallel: I28F status error");
            Err(Error::NoResponse)
        }
    }

    /// Toggle SST28SF software data protection by reading a sequence
    fn sst_sdp(&self, s: &mut Socket<'_>, enable: bool) -> Result<()> {
        let sequence = if enable {
            &SST28SF_ENABLE_SDP
        } else {
            &SST28SF_DISABLE_SDP
        };
        for &addr in sequence {
            s.bus.set_address(addr)?;
            self.output_cycle(s)?;
        }
        s.bus.set_address(0)
    }

    /// 28C EEPROM software data protection sequence
    fn sdp_28c(&self, s: &mut Socket<'_>, sequence: &[Cycle]) -> Result<()> {
        s.bus.set_ce(true)?;
        let result = self.send(s, sequence, true);
        s.delay.delay_us(self.twc());
        s.bus.set_ce(false)?;
        result
    }

    fn erase_27e(&self, s: &mut Socket<'_>) -> Result<()> {
        s.bus.set_address(0)?;
        s.bus.set_data(self.config.erased())?;
        s.power.set_vpp_route(VppRoute::A9, true)?;
        let pulse = self.pulse(s, ERASE_PULSE_27E_MS * 1000);
        s.delay.delay_us(self.twc());
        s.power.set_vpp_route(VppRoute::A9, false)?;
        if self.flag(DeviceFlags::PGM_CE_PIN) {
            s.bus.set_we(true)?;
        }
        pulse
    }
}

impl Algorithm for Parallel {
    fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut DeviceConfig {
        &mut self.config
    }

    fn setup_bus(&mut self, s: &mut Socket<'_>, setup: BusSetup) -> Result<()> {
        let pgm_ce = self.flag(DeviceFlags::PGM_CE_PIN);
        let positive = self.flag(DeviceFlags::PGM_POSITIVE);
        let vpp_oe = self.flag(DeviceFlags::VPP_OE_PIN);

        s.power.release()?;
        s.bus.set_address_width(self.config.address_bits())?;
        s.bus.set_data_wide(self.config.is_16bit())?;
        s.bus.set_oe(false)?;
        s.bus.set_ce(false)?;
        s.bus.set_we(positive)?;
        s.bus.set_data(0)?;

        match setup {
            BusSetup::Reset => {}
            BusSetup::Read => {
                s.power.set_output(Rail::Vdd, true)?;
                s.power.set_vdd_on_vpp(true)?;
                s.bus.set_we(pgm_ce)?;
                s.bus.set_ce(true)?;
            }
            BusSetup::Program => {
                s.power.set_output(Rail::Vdd, true)?;
                if vpp_oe {
                    s.power.set_vdd_on_vpp(true)?;
                }
                s.bus.set_we(positive)?;
                s.bus.set_ce(true)?;
                if self.config.family == Family::FlashSst28SF {
                    self.sst_sdp(s, false)?;
                }
            }
            BusSetup::GetId => {
                s.power.set_output(Rail::Vdd, true)?;
                s.bus.set_we(pgm_ce)?;
                s.bus.set_ce(true)?;
                if !vpp_oe {
                    s.power.set_vdd_on_vpp(true)?;
                }
                s.bus.set_oe(true)?;
                s.power.set_vpp_route(VppRoute::A9, true)?;
            }
        }
        log::trace!("parallel: bus setup {:?}", setup);
        Ok(())
    }

    fn read_cell(&mut self, s: &mut Socket<'_>, addr: u32) -> Result<u16> {
        s.bus.set_address(addr)?;
        self.send(s, self.commands.read, false)?;
        self.output_cycle(s)
    }

    fn check_cell(&mut self, s: &mut Socket<'_>, addr: u32, after_program: bool) -> Result<u16> {
        s.bus.set_address(addr)?;
        if after_program {
            self.send(s, self.commands.verify, true)?;
        } else {
            self.send(s, self.commands.read, false)?;
        }
        let pgm_ce = self.flag(DeviceFlags::PGM_CE_PIN);
        if pgm_ce {
            s.bus.set_we(true)?;
        }
        let data = self.output_cycle(s);
        if pgm_ce {
            s.bus.set_we(false)?;
        }
        data
    }

    fn program_cell(&mut self, s: &mut Socket<'_>, addr: u32, value: u16) -> Result<()> {
        s.bus.set_address(addr)?;
        self.write_cycle(s, value, true, true)?;
        s.delay.delay_us(self.twc());
        Ok(())
    }

    fn erase_chip(&mut self, s: &mut Socket<'_>) -> Result<()> {
        match self.config.family {
            Family::Eprom27E => self.erase_27e(s),
            Family::Flash28F | Family::FlashSst28SF | Family::FlashAm28F | Family::FlashI28F => {
                self.send(s, self.commands.erase, true)?;
                self.check_status(s)?;
                s.delay.delay_ms(ERASE_DELAY_28F_MS);
                Ok(())
            }
            _ => Err(Error::UnsupportedOperation),
        }
    }

    fn get_id(&mut self, s: &mut Socket<'_>) -> Result<(u16, u16)> {
        if self.config.family == Family::Sram {
            return Err(Error::UnsupportedOperation);
        }
        if !self.commands.id.is_empty() {
            s.bus.set_oe(false)?;
            self.send(s, self.commands.id, true)?;
            s.bus.set_oe(true)?;
        }
        let mask = self.config.mask();
        s.bus.set_address(0)?;
        let manufacturer = s.bus.get_data()? & mask;
        s.bus.increment_address()?;
        let device = s.bus.get_data()? & mask;

        // A part without a signature mode returns ordinary data; compare
        // with the same offsets read normally, A9 high
        if self.config.size > 0x201 {
            self.setup_bus(s, BusSetup::Read)?;
            let plain_man = self.read_cell(s, 0x200)?;
            let plain_dev = self.read_cell(s, 0x201)?;
            if plain_man == manufacturer && plain_dev == device {
                log::warn!(
                    "parallel: ID {:04X}:{:04X} matches plain data, no signature mode",
                    manufacturer,
                    device
                );
                return Err(Error::NoResponse);
            }
        }
        Ok((manufacturer, device))
    }

    fn protect(&mut self, s: &mut Socket<'_>, enable: bool) -> Result<()> {
        match (self.config.family, enable) {
            (Family::Eeprom28C64, true) => self.sdp_28c(s, PROTECT_28C64),
            (Family::Eeprom28C64, false) => self.sdp_28c(s, UNPROTECT_28C64),
            (Family::Eeprom28C256, true) => self.sdp_28c(s, PROTECT_28C256),
            (Family::Eeprom28C256, false) => self.sdp_28c(s, UNPROTECT_28C256),
            (Family::FlashSst28SF, enable) => self.sst_sdp(s, enable),
            _ => Err(Error::UnsupportedOperation),
        }
    }
}
