//! Command execution on the programmer board
//!
//! [`Programmer`] owns the socket hardware (buses, supplies, delay), the
//! staging buffer and the device engine, and carries out one decoded
//! [`Command`] at a time. The dispatcher only sees it through [`Executor`].

use crate::buffer::StagingBuffer;
use crate::bus::TargetBus;
use crate::device::{DeviceConfig, DeviceEngine, Socket};
use crate::error::{Error, Result};
use crate::generator::Supplies;
use crate::hal::DelayNs;
use crate::protocol::{Command, Reply, PROTOCOL_VERSION};
use crate::shared::Shared;

/// Something that carries out decoded commands
pub trait Executor {
    /// Run `command` to completion
    fn execute(&mut self, command: Command) -> Result<Reply>;
}

/// Board-side command executor
pub struct Programmer<'s, B, S, D> {
    bus: B,
    power: S,
    delay: D,
    buffer: StagingBuffer,
    engine: DeviceEngine<'s>,
}

impl<'s, B: TargetBus, S: Supplies, D: DelayNs> Programmer<'s, B, S, D> {
    /// Programmer over the given hardware, no device configured
    pub fn new(shared: &'s Shared, bus: B, power: S, delay: D) -> Self {
        Self {
            bus,
            power,
            delay,
            buffer: StagingBuffer::new(),
            engine: DeviceEngine::new(shared),
        }
    }

    /// Socket lines
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Supplies
    pub fn power(&self) -> &S {
        &self.power
    }

    /// Device engine
    pub fn engine(&self) -> &DeviceEngine<'s> {
        &self.engine
    }

    fn device(&mut self, command: Command) -> Result<Reply> {
        let mut socket = Socket::new(&mut self.bus, &mut self.power, &mut self.delay);
        match command {
            Command::BusSetup(setup) => self.engine.setup_bus(&mut socket, setup)?,
            Command::Read { base, count } => {
                let len = staged_len(&self.engine, count)?;
                let out = self.buffer.get_mut(len)?;
                self.engine.read(&mut socket, base, out)?;
            }
            Command::Program { base, count } => {
                let len = staged_len(&self.engine, count)?;
                let data = self.buffer.get(len)?;
                self.engine.program(&mut socket, base, data)?;
            }
            Command::Verify { base, count } => {
                let len = staged_len(&self.engine, count)?;
                let data = self.buffer.get(len)?;
                self.engine.verify(&mut socket, base, data)?;
            }
            Command::BlankCheck { base, count } => {
                self.engine.blank_check(&mut socket, base, count)?
            }
            Command::GetId => return Ok(Reply::Dword(self.engine.get_id(&mut socket)?)),
            Command::Erase => self.engine.erase(&mut socket)?,
            Command::Unprotect => self.engine.unprotect(&mut socket)?,
            Command::Protect => self.engine.protect(&mut socket)?,
            _ => return Err(Error::UnsupportedOperation),
        }
        Ok(Reply::Done)
    }
}

/// Bytes of staging buffer `count` cells of the configured device take
fn staged_len(engine: &DeviceEngine<'_>, count: u16) -> Result<usize> {
    Ok(count as usize * engine.config()?.cell_bytes())
}

impl<B: TargetBus, S: Supplies, D: DelayNs> Executor for Programmer<'_, B, S, D> {
    fn execute(&mut self, command: Command) -> Result<Reply> {
        log::trace!("programmer: {:?}", command);
        let reply = match command {
            Command::Nop => Reply::Done,
            Command::GetVersion => Reply::Word(PROTOCOL_VERSION),

            Command::SetOutput { rail, on } => {
                self.power.set_output(rail, on)?;
                Reply::Done
            }
            Command::SetVoltage { rail, volts } => {
                self.power.set_voltage(rail, volts)?;
                Reply::Done
            }
            Command::GetVoltage(rail) => Reply::Float(self.power.status(rail).measured),
            Command::GetDuty(rail) => Reply::Float(self.power.status(rail).duty),
            Command::GetCalibration(rail) => Reply::Float(self.power.calibration(rail)),
            Command::InitCalibration(rail) => {
                self.power.begin_calibration(rail)?;
                Reply::Done
            }
            Command::SaveCalibration { rail, measured } => {
                Reply::Float(
                    self.power
                        .finish_calibration(rail, measured, &mut self.delay)?,
                )
            }
            Command::SetCalibration { rail, offset } => {
                self.power.set_calibration(rail, offset)?;
                Reply::Done
            }
            Command::VddOnVpp(on) => {
                self.power.set_vdd_on_vpp(on)?;
                Reply::Done
            }
            Command::Start { rail, volts } => {
                self.power.start(rail, volts)?;
                Reply::Done
            }
            Command::Stop(rail) => {
                self.power.stop(rail)?;
                Reply::Done
            }
            Command::GetStatus(rail) => Reply::Status(self.power.status(rail)),
            Command::Route { route, on } => {
                self.power.set_vpp_route(route, on)?;
                Reply::Done
            }

            Command::Control { line, active } => {
                self.bus.set_control(line, active)?;
                Reply::Done
            }
            Command::AddrClear => {
                self.bus.set_address(0)?;
                Reply::Done
            }
            Command::AddrIncrement => {
                self.bus.increment_address()?;
                Reply::Done
            }
            Command::AddrSet(addr) => {
                self.bus.set_address(addr)?;
                Reply::Done
            }
            Command::AddrSetByte(addr) => {
                self.bus.set_address(addr as u32)?;
                Reply::Done
            }
            Command::AddrSetWord(addr) => {
                self.bus.set_address(addr as u32)?;
                Reply::Done
            }
            Command::AddrWidth(width) => {
                self.bus.set_address_width(width)?;
                Reply::Done
            }
            Command::DataClear => {
                self.bus.set_data(0)?;
                Reply::Done
            }
            Command::DataSet(value) => {
                self.bus.set_data(value as u16)?;
                Reply::Done
            }
            Command::DataSetWord(value) => {
                self.bus.set_data(value)?;
                Reply::Done
            }
            Command::DataGet => Reply::Byte(self.bus.get_data()? as u8),
            Command::DataGetWord => Reply::Word(self.bus.get_data()?),

            Command::BufClear => {
                self.buffer.clear();
                Reply::Done
            }
            Command::BufWrite { offset, words } => {
                self.buffer.write_block(offset, &words)?;
                Reply::Done
            }
            Command::BufRead { offset } => Reply::Block(self.buffer.read_block(offset)?),

            Command::SetTwp(us) => {
                self.engine.set_twp(us)?;
                Reply::Done
            }
            Command::SetTwc(us) => {
                self.engine.set_twc(us)?;
                Reply::Done
            }
            Command::Configure {
                family,
                flags,
                size,
                sector_size,
            } => {
                let config = DeviceConfig::new(family, size)
                    .with_flags(flags)
                    .with_sector_size(sector_size);
                self.engine.configure(config)?;
                Reply::Done
            }
            Command::SetVoltages {
                vdd_read,
                vdd_program,
                vpp,
            } => {
                self.engine.set_voltages(vdd_read, vdd_program, vpp)?;
                Reply::Done
            }
            Command::SetAttempts(attempts) => {
                self.engine.set_attempts(attempts)?;
                Reply::Done
            }
            Command::State => Reply::Byte(self.engine.state().code()),
            Command::BusSetup(_)
            | Command::Read { .. }
            | Command::Program { .. }
            | Command::Verify { .. }
            | Command::BlankCheck { .. }
            | Command::GetId
            | Command::Erase
            | Command::Unprotect
            | Command::Protect => self.device(command)?,
        };
        Ok(reply)
    }
}
