//! Typed client for a ufprog board
//!
//! [`Programmer`] turns method calls into request frames, waits for the
//! response and decodes it. Bulk data is moved through the board's staging
//! buffer in [`BUFFER_SIZE`] chunks. Raising the flag from
//! [`Programmer::cancel_flag`] stops a range operation before its next chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ufprog_core::buffer::{BLOCK_SIZE, BUFFER_SIZE};
use ufprog_core::bus::ControlLine;
use ufprog_core::device::{BusSetup, DeviceConfig, SessionState};
use ufprog_core::generator::VppRoute;
use ufprog_core::protocol::{
    decode_response, schema_len, Command, Opcode, Reply, ERROR_PAYLOAD, PROTOCOL_VERSION,
    RESP_ERROR, RESP_OK,
};
use ufprog_core::regulator::{Phase, Rail, RegulatorStatus};

use crate::error::{HostError, Result};
use crate::transport::Transport;

/// Snapshot of one rail
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RailSummary {
    /// Regulator state
    pub status: RegulatorStatus,
    /// Stored measurement offset
    pub calibration: f32,
}

/// Everything `status` reports about a board
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Protocol version
    pub version: u16,
    /// Device supply
    pub vdd: RailSummary,
    /// Programming supply
    pub vpp: RailSummary,
    /// Device engine lifecycle
    pub state: SessionState,
}

/// Connection to a board
pub struct Programmer<T: Transport> {
    transport: T,
    version: u16,
    device: Option<DeviceConfig>,
    cancel: Arc<AtomicBool>,
}

impl<T: Transport> Programmer<T> {
    /// Synchronize with the board and check its protocol version
    pub fn new(transport: T) -> Result<Self> {
        let mut programmer = Self {
            transport,
            version: 0,
            device: None,
            cancel: Arc::new(AtomicBool::new(false)),
        };

        programmer.synchronize()?;
        log::debug!("client: synchronized");

        let version = programmer.request(Command::GetVersion)?.word()?;
        if version >> 8 != PROTOCOL_VERSION >> 8 {
            return Err(HostError::UnsupportedVersion(version));
        }
        programmer.version = version;
        log::debug!("client: protocol version 0x{:04X}", version);
        Ok(programmer)
    }

    /// Protocol version reported by the board
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Flag that stops the running range operation before its next chunk
    ///
    /// Safe to raise from a signal handler or another thread. The operation
    /// then fails with [`ufprog_core::Error::Cancelled`] and the flag drops
    /// again.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.swap(false, Ordering::AcqRel) {
            log::info!("client: cancelled");
            return Err(HostError::Device(ufprog_core::Error::Cancelled));
        }
        Ok(())
    }

    /// Device sent with the last [`Programmer::configure`]
    pub fn device(&self) -> Option<&DeviceConfig> {
        self.device.as_ref()
    }

    /// Send one request and decode its response
    ///
    /// An error frame becomes [`HostError::Device`].
    pub fn request(&mut self, command: Command) -> Result<Reply> {
        let opcode = command.opcode();
        let frame = command.encode()?;
        self.transport.write(&frame)?;
        self.transport.flush()?;

        let mut status = [0u8];
        self.transport.read(&mut status)?;
        let len = match status[0] {
            RESP_OK => schema_len(opcode.response()),
            RESP_ERROR => ERROR_PAYLOAD,
            other => {
                return Err(HostError::InvalidResponse {
                    opcode: opcode as u8,
                    status: other,
                })
            }
        };
        let mut response = vec![status[0]; len + 1];
        self.transport.read(&mut response[1..])?;
        let reply = decode_response(opcode, &response);
        if let Err(e) = &reply {
            log::debug!("client: {:?} -> {}", opcode, e);
        }
        Ok(reply?)
    }

    /// Bring the link to a known waiting-for-opcode state
    ///
    /// A board left half-way through a frame answers it once its payload
    /// timeout expires; that answer is drained before testing with a NOP.
    fn synchronize(&mut self) -> Result<()> {
        for _ in 0..8 {
            self.drain()?;
            self.transport.write(&[Opcode::Nop as u8])?;
            self.transport.flush()?;
            let mut c = [0u8];
            if self.transport.read_nonblock(&mut c, 500)? == 1 && c[0] == RESP_OK {
                let mut extra = [0u8];
                if self.transport.read_nonblock(&mut extra, 20)? == 0 {
                    return Ok(());
                }
            }
        }
        Err(HostError::SyncFailed)
    }

    fn drain(&mut self) -> Result<()> {
        let mut buf = [0u8; 64];
        for _ in 0..1024 {
            if self.transport.read_nonblock(&mut buf, 100)? == 0 {
                break;
            }
        }
        Ok(())
    }

    // ---- Generators ----

    /// Set the target and begin regulating
    pub fn start(&mut self, rail: Rail, volts: f32) -> Result<()> {
        self.request(Command::Start { rail, volts })?;
        Ok(())
    }

    /// Stop regulating
    pub fn stop(&mut self, rail: Rail) -> Result<()> {
        self.request(Command::Stop(rail))?;
        Ok(())
    }

    /// Change the target of a running rail
    pub fn set_voltage(&mut self, rail: Rail, volts: f32) -> Result<()> {
        self.request(Command::SetVoltage { rail, volts })?;
        Ok(())
    }

    /// Regulator snapshot
    pub fn get_status(&mut self, rail: Rail) -> Result<RegulatorStatus> {
        Ok(self.request(Command::GetStatus(rail))?.status()?)
    }

    /// Last measured voltage
    pub fn voltage(&mut self, rail: Rail) -> Result<f32> {
        Ok(self.request(Command::GetVoltage(rail))?.float()?)
    }

    /// Current duty in percent
    pub fn duty(&mut self, rail: Rail) -> Result<f32> {
        Ok(self.request(Command::GetDuty(rail))?.float()?)
    }

    /// Poll until the rail settles
    pub fn wait_settled(&mut self, rail: Rail, timeout: Duration) -> Result<RegulatorStatus> {
        let start = Instant::now();
        loop {
            let status = self.get_status(rail)?;
            if let Some(fault) = status.fault {
                return Err(HostError::Device(fault.error()));
            }
            if status.phase == Phase::Settled {
                return Ok(status);
            }
            if start.elapsed() > timeout {
                return Err(HostError::Device(ufprog_core::Error::RegulationTimeout));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Connect or disconnect a rail's output switch
    pub fn set_output(&mut self, rail: Rail, on: bool) -> Result<()> {
        self.request(Command::SetOutput { rail, on })?;
        Ok(())
    }

    /// Feed VDD from the VPP rail
    pub fn set_vdd_on_vpp(&mut self, on: bool) -> Result<()> {
        self.request(Command::VddOnVpp(on))?;
        Ok(())
    }

    /// Route VPP to one socket pin
    pub fn route_vpp(&mut self, route: VppRoute, on: bool) -> Result<()> {
        self.request(Command::Route { route, on })?;
        Ok(())
    }

    /// Stored measurement offset
    pub fn calibration(&mut self, rail: Rail) -> Result<f32> {
        Ok(self.request(Command::GetCalibration(rail))?.float()?)
    }

    /// Restore a measurement offset
    pub fn set_calibration(&mut self, rail: Rail, offset: f32) -> Result<()> {
        self.request(Command::SetCalibration { rail, offset })?;
        Ok(())
    }

    /// Drive the rail to nominal with a zero offset, output on
    pub fn begin_calibration(&mut self, rail: Rail) -> Result<()> {
        self.request(Command::InitCalibration(rail))?;
        Ok(())
    }

    /// Store the offset against an external reading; returns the offset
    pub fn finish_calibration(&mut self, rail: Rail, measured: f32) -> Result<f32> {
        Ok(self
            .request(Command::SaveCalibration { rail, measured })?
            .float()?)
    }

    // ---- Bus ----

    /// Put a full address on the bus
    pub fn set_address(&mut self, address: u32) -> Result<()> {
        self.request(Command::AddrSet(address))?;
        Ok(())
    }

    /// Address lines in use
    pub fn set_address_width(&mut self, width: u8) -> Result<()> {
        self.request(Command::AddrWidth(width))?;
        Ok(())
    }

    /// Drive the data lines; values above 0xFF use the 16-bit command
    pub fn set_data(&mut self, value: u16) -> Result<()> {
        let command = match u8::try_from(value) {
            Ok(byte) => Command::DataSet(byte),
            Err(_) => Command::DataSetWord(value),
        };
        self.request(command)?;
        Ok(())
    }

    /// Sample the low 8 data lines
    pub fn get_data(&mut self) -> Result<u8> {
        Ok(self.request(Command::DataGet)?.byte()?)
    }

    /// Sample all 16 data lines
    pub fn get_data_word(&mut self) -> Result<u16> {
        Ok(self.request(Command::DataGetWord)?.word()?)
    }

    /// Assert or release one control line
    pub fn set_control_line(&mut self, line: ControlLine, active: bool) -> Result<()> {
        self.request(Command::Control { line, active })?;
        Ok(())
    }

    /// Put the socket in a preset state
    pub fn bus_setup(&mut self, setup: BusSetup) -> Result<()> {
        self.request(Command::BusSetup(setup))?;
        Ok(())
    }

    // ---- Device ----

    /// Select the device and send its timings, voltages and retry bound
    pub fn configure(&mut self, config: &DeviceConfig) -> Result<()> {
        config.validate()?;
        self.request(Command::Configure {
            family: config.family,
            flags: config.flags,
            size: config.size,
            sector_size: config.sector_size,
        })?;
        self.request(Command::SetTwp(config.twp_us))?;
        self.request(Command::SetTwc(config.twc_us))?;
        self.request(Command::SetVoltages {
            vdd_read: config.vdd_read,
            vdd_program: config.vdd_program,
            vpp: config.vpp,
        })?;
        self.request(Command::SetAttempts(config.max_attempts))?;
        log::info!(
            "client: configured {} ({} cells)",
            config.family.name(),
            config.size
        );
        self.device = Some(*config);
        Ok(())
    }

    fn configured(&self) -> Result<DeviceConfig> {
        self.device.ok_or(HostError::Device(ufprog_core::Error::NotConfigured))
    }

    /// Engine lifecycle state
    pub fn state(&mut self) -> Result<SessionState> {
        let code = self.request(Command::State)?.byte()?;
        SessionState::from_code(code).ok_or(HostError::InvalidParameter(format!(
            "unknown session state {}",
            code
        )))
    }

    /// Copy `data` into the staging buffer
    fn stage(&mut self, data: &[u8]) -> Result<()> {
        for (i, block) in data.chunks(BLOCK_SIZE).enumerate() {
            let mut padded = [0u8; BLOCK_SIZE];
            padded[..block.len()].copy_from_slice(block);
            let mut words = [0u32; 4];
            for (word, bytes) in words.iter_mut().zip(padded.chunks_exact(4)) {
                *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            self.request(Command::BufWrite {
                offset: (i * BLOCK_SIZE) as u16,
                words,
            })?;
        }
        Ok(())
    }

    /// Copy the start of the staging buffer into `out`
    fn fetch(&mut self, out: &mut [u8]) -> Result<()> {
        for (i, block) in out.chunks_mut(BLOCK_SIZE).enumerate() {
            let words = self
                .request(Command::BufRead {
                    offset: (i * BLOCK_SIZE) as u16,
                })?
                .block()?;
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            block.copy_from_slice(&bytes[..block.len()]);
        }
        Ok(())
    }

    /// Bytes per chunk, and bytes per cell, for the configured device
    fn chunking(&self, len: usize) -> Result<(usize, usize)> {
        let cell = self.configured()?.cell_bytes();
        if len % cell != 0 {
            return Err(HostError::InvalidParameter(format!(
                "{} bytes is not a whole number of {}-byte cells",
                len, cell
            )));
        }
        Ok((BUFFER_SIZE - BUFFER_SIZE % cell, cell))
    }

    /// Read `out.len()` bytes of cells from `base`
    pub fn read_range(
        &mut self,
        base: u32,
        out: &mut [u8],
        mut progress: impl FnMut(usize),
    ) -> Result<()> {
        let (chunk, cell) = self.chunking(out.len())?;
        let mut done = 0;
        for (i, part) in out.chunks_mut(chunk).enumerate() {
            self.checkpoint()?;
            self.request(Command::Read {
                base: base + (i * chunk / cell) as u32,
                count: (part.len() / cell) as u16,
            })?;
            self.fetch(part)?;
            done += part.len();
            progress(done);
        }
        Ok(())
    }

    /// Program `data` from `base`, every cell verified by the board
    pub fn program_range(
        &mut self,
        base: u32,
        data: &[u8],
        mut progress: impl FnMut(usize),
    ) -> Result<()> {
        let (chunk, cell) = self.chunking(data.len())?;
        let mut done = 0;
        for (i, part) in data.chunks(chunk).enumerate() {
            self.checkpoint()?;
            self.stage(part)?;
            self.request(Command::Program {
                base: base + (i * chunk / cell) as u32,
                count: (part.len() / cell) as u16,
            })?;
            done += part.len();
            progress(done);
        }
        Ok(())
    }

    /// Compare the device from `base` against `data`
    pub fn verify_range(
        &mut self,
        base: u32,
        data: &[u8],
        mut progress: impl FnMut(usize),
    ) -> Result<()> {
        let (chunk, cell) = self.chunking(data.len())?;
        let mut done = 0;
        for (i, part) in data.chunks(chunk).enumerate() {
            self.checkpoint()?;
            self.stage(part)?;
            self.request(Command::Verify {
                base: base + (i * chunk / cell) as u32,
                count: (part.len() / cell) as u16,
            })?;
            done += part.len();
            progress(done);
        }
        Ok(())
    }

    /// Check that `count` cells from `base` are erased
    pub fn blank_check(&mut self, base: u32, count: u32) -> Result<()> {
        self.request(Command::BlankCheck { base, count })?;
        Ok(())
    }

    /// Manufacturer and device ID
    pub fn get_id(&mut self) -> Result<(u16, u16)> {
        let id = self.request(Command::GetId)?.dword()?;
        Ok(((id >> 16) as u16, id as u16))
    }

    /// Erase the whole device
    pub fn erase(&mut self) -> Result<()> {
        self.request(Command::Erase)?;
        Ok(())
    }

    /// Disable write protection
    pub fn unprotect(&mut self) -> Result<()> {
        self.request(Command::Unprotect)?;
        Ok(())
    }

    /// Enable write protection
    pub fn protect(&mut self) -> Result<()> {
        self.request(Command::Protect)?;
        Ok(())
    }

    /// Both rails, their offsets and the engine state
    pub fn status(&mut self) -> Result<Summary> {
        let summary = |p: &mut Self, rail| -> Result<RailSummary> {
            Ok(RailSummary {
                status: p.get_status(rail)?,
                calibration: p.calibration(rail)?,
            })
        };
        Ok(Summary {
            version: self.version,
            vdd: summary(self, Rail::Vdd)?,
            vpp: summary(self, Rail::Vpp)?,
            state: self.state()?,
        })
    }

    /// Switch every output off and stop both regulators
    pub fn shutdown(&mut self) -> Result<()> {
        for rail in [Rail::Vpp, Rail::Vdd] {
            self.set_output(rail, false)?;
            self.stop(rail)?;
        }
        self.set_vdd_on_vpp(false)?;
        for route in VppRoute::ALL {
            self.route_vpp(route, false)?;
        }
        log::debug!("client: supplies off");
        Ok(())
    }
}

impl<T: Transport> Drop for Programmer<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::debug!("client: shutdown failed: {}", e);
        }
    }
}
