//! Session-level device operations

use super::{Algorithm, BusSetup, DeviceConfig, DeviceFlags, Driver, Interface, Socket};
use super::{Session, SessionState};
use crate::error::{Error, Result};
use crate::regulator::Rail;
use crate::shared::Shared;

/// Cells read between two cancel checkpoints
const READ_CHUNK: usize = 64;

/// Runs whole device operations against the configured device
///
/// Every operation is one [`Session`]: supplies up and settled, bus set up,
/// the cell loop with a cancel checkpoint per step, then the bus back to
/// [`BusSetup::Reset`] whatever happened.
pub struct DeviceEngine<'s> {
    shared: &'s Shared,
    driver: Option<Driver>,
    state: SessionState,
}

impl<'s> DeviceEngine<'s> {
    /// Engine with no device configured
    pub fn new(shared: &'s Shared) -> Self {
        Self {
            shared,
            driver: None,
            state: SessionState::Unconfigured,
        }
    }

    /// Lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Select the device in the socket
    pub fn configure(&mut self, config: DeviceConfig) -> Result<()> {
        if self.shared.session_active() {
            return Err(Error::SessionBusy);
        }
        config.validate()?;
        log::info!(
            "device: configured {} size 0x{:X} flags {:?}",
            config.family.name(),
            config.size,
            config.flags
        );
        self.driver = Some(Driver::new(config));
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Current configuration
    pub fn config(&self) -> Result<&DeviceConfig> {
        self.driver
            .as_ref()
            .map(|d| d.config())
            .ok_or(Error::NotConfigured)
    }

    fn config_mut(&mut self) -> Result<&mut DeviceConfig> {
        self.driver
            .as_mut()
            .map(|d| d.config_mut())
            .ok_or(Error::NotConfigured)
    }

    /// Override the program pulse width
    pub fn set_twp(&mut self, us: u32) -> Result<()> {
        self.config_mut()?.twp_us = us;
        Ok(())
    }

    /// Override the write cycle time
    pub fn set_twc(&mut self, us: u32) -> Result<()> {
        self.config_mut()?.twc_us = us;
        Ok(())
    }

    /// Override the supply voltages
    pub fn set_voltages(&mut self, vdd_read: f32, vdd_program: f32, vpp: f32) -> Result<()> {
        let valid = |v: f32| v.is_finite() && v >= 0.0;
        if !(valid(vdd_read) && valid(vdd_program) && valid(vpp)) {
            return Err(Error::OutOfRange);
        }
        let config = self.config_mut()?;
        config.vdd_read = vdd_read;
        config.vdd_program = vdd_program;
        config.vpp = vpp;
        Ok(())
    }

    /// Override the per-cell program attempts
    pub fn set_attempts(&mut self, attempts: u8) -> Result<()> {
        if attempts == 0 {
            return Err(Error::OutOfRange);
        }
        self.config_mut()?.max_attempts = attempts;
        Ok(())
    }

    /// Put the socket in a preset line state outside of any session
    pub fn setup_bus(&mut self, socket: &mut Socket<'_>, setup: BusSetup) -> Result<()> {
        if self.shared.session_active() {
            return Err(Error::SessionBusy);
        }
        let driver = self.driver.as_mut().ok_or(Error::NotConfigured)?;
        driver.setup_bus(socket, setup)
    }

    /// Read cells from `base` into `out`
    pub fn read(&mut self, socket: &mut Socket<'_>, base: u32, out: &mut [u8]) -> Result<()> {
        let config = *self.config()?;
        let count = cell_count(&config, out.len())?;
        config.check_range(base, count)?;

        let chunk_bytes = READ_CHUNK * config.cell_bytes();
        self.run(socket, BusSetup::Read, |driver, s, session| {
            let mut cells = [0u16; READ_CHUNK];
            for (i, chunk) in out.chunks_mut(chunk_bytes).enumerate() {
                session.checkpoint()?;
                let cells = &mut cells[..chunk.len() / config.cell_bytes()];
                driver.read_cells(s, base + (i * READ_CHUNK) as u32, cells)?;
                for (value, cell) in cells.iter().zip(chunk.chunks_exact_mut(config.cell_bytes())) {
                    config.store_cell(cell, *value);
                }
            }
            Ok(())
        })
    }

    /// Program `data` from `base`, verifying every cell
    pub fn program(&mut self, socket: &mut Socket<'_>, base: u32, data: &[u8]) -> Result<()> {
        let config = *self.config()?;
        let count = cell_count(&config, data.len())?;
        config.check_range(base, count)?;

        self.run(socket, BusSetup::Program, |driver, s, session| {
            for (addr, cell) in (base..).zip(data.chunks_exact(config.cell_bytes())) {
                session.checkpoint()?;
                let value = config.load_cell(cell) & config.mask();
                program_one(driver, s, session, &config, addr, value)?;
            }
            Ok(())
        })
    }

    /// Compare the device against `data` from `base`
    pub fn verify(&mut self, socket: &mut Socket<'_>, base: u32, data: &[u8]) -> Result<()> {
        let config = *self.config()?;
        let count = cell_count(&config, data.len())?;
        config.check_range(base, count)?;

        self.run(socket, BusSetup::Read, |driver, s, session| {
            for (addr, cell) in (base..).zip(data.chunks_exact(config.cell_bytes())) {
                session.checkpoint()?;
                let expected = config.load_cell(cell) & config.mask();
                if driver.check_cell(s, addr, false)? != expected {
                    log::debug!("device: verify mismatch at 0x{:08X}", addr);
                    return Err(Error::ProgramVerifyFailed { addr });
                }
            }
            Ok(())
        })
    }

    /// Check that `count` cells from `base` are erased
    pub fn blank_check(&mut self, socket: &mut Socket<'_>, base: u32, count: u32) -> Result<()> {
        let config = *self.config()?;
        config.check_range(base, count)?;

        self.run(socket, BusSetup::Read, |driver, s, session| {
            for addr in base..base + count {
                session.checkpoint()?;
                if driver.read_cell(s, addr)? != config.erased() {
                    return Err(Error::NotBlank { addr });
                }
            }
            Ok(())
        })
    }

    /// Erase the device, sector by sector when it has sectors
    pub fn erase(&mut self, socket: &mut Socket<'_>) -> Result<()> {
        let config = *self.config()?;
        if !config.family.can_erase() {
            return Err(Error::UnsupportedOperation);
        }

        self.run(socket, BusSetup::Program, |driver, s, session| {
            if config.sector_size == 0 {
                return driver.erase_chip(s);
            }
            for sector in (0..config.size).step_by(config.sector_size as usize) {
                session.checkpoint()?;
                log::trace!("device: erasing sector at 0x{:08X}", sector);
                driver.erase_sector(s, sector)?;
            }
            Ok(())
        })
    }

    /// Manufacturer and device ID packed as `manufacturer << 16 | device`
    pub fn get_id(&mut self, socket: &mut Socket<'_>) -> Result<u32> {
        let config = *self.config()?;
        if !config.family.can_identify() {
            return Err(Error::UnsupportedOperation);
        }

        let (manufacturer, device) =
            self.run(socket, BusSetup::GetId, |driver, s, _| driver.get_id(s))?;
        log::info!("device: ID {:04X}:{:04X}", manufacturer, device);
        Ok((manufacturer as u32) << 16 | device as u32)
    }

    /// Disable write protection
    pub fn unprotect(&mut self, socket: &mut Socket<'_>) -> Result<()> {
        self.set_protection(socket, false)
    }

    /// Enable write protection
    pub fn protect(&mut self, socket: &mut Socket<'_>) -> Result<()> {
        self.set_protection(socket, true)
    }

    fn set_protection(&mut self, socket: &mut Socket<'_>, enable: bool) -> Result<()> {
        let config = *self.config()?;
        if !config.family.can_protect() {
            return Err(Error::UnsupportedOperation);
        }
        self.run(socket, BusSetup::Program, |driver, s, _| {
            driver.protect(s, enable)
        })
    }

    /// One session around `body`
    fn run<T>(
        &mut self,
        socket: &mut Socket<'_>,
        setup: BusSetup,
        body: impl FnOnce(&mut Driver, &mut Socket<'_>, &Session<'_>) -> Result<T>,
    ) -> Result<T> {
        let driver = self.driver.as_mut().ok_or(Error::NotConfigured)?;
        let session = Session::begin(self.shared)?;
        self.state = SessionState::Running;

        let config = *driver.config();
        let result = power_up(&config, socket, setup)
            .and_then(|()| driver.setup_bus(socket, setup))
            .and_then(|()| body(driver, socket, &session));
        let reset = driver.setup_bus(socket, BusSetup::Reset);
        let result = match (result, reset) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
        };

        if let Err(e) = &result {
            log::warn!("device: {:?} failed: {}", setup, e);
        }
        self.state = session.finish(&result);
        result
    }
}

/// Cells in a buffer of `len` bytes
fn cell_count(config: &DeviceConfig, len: usize) -> Result<u32> {
    if len % config.cell_bytes() != 0 {
        return Err(Error::OutOfRange);
    }
    u32::try_from(len / config.cell_bytes()).map_err(|_| Error::OutOfRange)
}

/// Bring up the supplies `setup` needs and wait for them to settle
fn power_up(config: &DeviceConfig, s: &mut Socket<'_>, setup: BusSetup) -> Result<()> {
    if setup == BusSetup::Reset {
        return Ok(());
    }
    let vdd = if setup == BusSetup::Program {
        config.vdd_program
    } else {
        config.vdd_read
    };
    s.power.start(Rail::Vdd, vdd)?;
    s.power.wait_settled(Rail::Vdd, &mut *s.delay)?;

    let parallel = config.family.interface() == Interface::Parallel;
    let vpp = match setup {
        BusSetup::Program => config.needs_vpp(),
        BusSetup::GetId => parallel,
        _ => false,
    };
    if vpp {
        s.power.start(Rail::Vpp, config.vpp)?;
        s.power.wait_settled(Rail::Vpp, &mut *s.delay)?;
    }
    Ok(())
}

/// Program one cell with the verify-retry loop
fn program_one(
    driver: &mut Driver,
    s: &mut Socket<'_>,
    session: &Session<'_>,
    config: &DeviceConfig,
    addr: u32,
    value: u16,
) -> Result<()> {
    if config.flags.contains(DeviceFlags::SKIP_FF) && value == config.erased() {
        // Not written, but it has to be erased already
        if driver.check_cell(s, addr, false)? == value {
            return Ok(());
        }
        return Err(Error::ProgramVerifyFailed { addr });
    }

    for attempt in 1..=config.max_attempts.max(1) {
        if attempt > 1 {
            session.checkpoint()?;
        }
        driver.program_cell(s, addr, value)?;
        if driver.check_cell(s, addr, true)? == value {
            if attempt > 1 {
                log::trace!("device: 0x{:08X} took {} pulses", addr, attempt);
            }
            return Ok(());
        }
    }
    log::warn!(
        "device: 0x{:08X} still wrong after {} attempts",
        addr,
        config.max_attempts
    );
    Err(Error::ProgramVerifyFailed { addr })
}
