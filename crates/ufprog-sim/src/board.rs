//! A complete simulated programmer board
//!
//! [`Board`] owns the socket and both converter plants. [`Board::serve`]
//! wires the real core onto them and runs the two contexts exactly as the
//! firmware does: the regulator loop on its own thread, the dispatcher on
//! the calling one, meeting only in [`Shared`].
//!
//! [`Board::cancel`] plays the part of the board's abort input: it raises
//! the cancel flag of the connection being served, and the running device
//! operation stops at its next step boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use embedded_io::{Error as _, Read, Write};
use ufprog_core::bitbus::{Duplex, GpioLines, ShiftIn, ShiftOut};
use ufprog_core::bus::{AddrBus, Buses, CtrlBus, DataBus};
use ufprog_core::dispatcher::{Dispatcher, Poll};
use ufprog_core::generator::{Generators, VddGenerator, VppGenerator};
use ufprog_core::programmer::Programmer;
use ufprog_core::regulator::Dc2Dc;
use ufprog_core::scheduler::RegulatorLoop;
use ufprog_core::shared::Shared;

use crate::chip::Chip;
use crate::config::BoardConfig;
use crate::error::{Result, SimError};
use crate::hal::{SimDelay, StdClock};
use crate::plant::Plant;
use crate::socket::{Signal, SimInput, SimPin, SocketHandle, ADDRESS_LINES, DATA_LINES};

type Chain = ShiftOut<SimPin, SimPin, SimPin, SimDelay>;
type DataLines = Duplex<Chain, ShiftIn<SimPin, SimPin, SimInput, SimDelay>>;
type SimBuses = Buses<GpioLines<SimPin, 3>, Chain, DataLines>;
type SimGenerators<'s> = Generators<'s, SimPin, SimPin, SimPin, Chain>;

/// Board-side executor as wired on the simulated board
pub type SimProgrammer<'s> = Programmer<'s, SimBuses, SimGenerators<'s>, SimDelay>;

/// Simulated board: socket, plants and configuration
pub struct Board {
    config: BoardConfig,
    socket: SocketHandle,
    vdd: Plant,
    vpp: Plant,
    active: Mutex<Option<Arc<Shared>>>,
}

impl Board {
    /// Board with an empty socket and both converters off
    pub fn new(config: BoardConfig) -> Self {
        Self {
            socket: SocketHandle::new(),
            vdd: Plant::new(config.vdd.plant),
            vpp: Plant::new(config.vpp.plant),
            active: Mutex::new(None),
            config,
        }
    }

    /// Board configuration
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// Socket lines and fault injection
    pub fn socket(&self) -> &SocketHandle {
        &self.socket
    }

    /// Put `chip` in the socket and keep a handle on it
    pub fn insert<C: Chip + 'static>(&self, chip: C) -> Arc<Mutex<C>> {
        let chip = Arc::new(Mutex::new(chip));
        self.socket.insert(chip.clone());
        chip
    }

    /// VDD converter
    pub fn vdd(&self) -> &Plant {
        &self.vdd
    }

    /// VPP converter
    pub fn vpp(&self) -> &Plant {
        &self.vpp
    }

    /// Cancel the device operation in progress, if any
    ///
    /// Returns whether one was running. The operation ends with
    /// [`Error::Cancelled`](ufprog_core::Error::Cancelled) at its next step
    /// boundary.
    pub fn cancel(&self) -> bool {
        let Ok(active) = self.active.lock() else {
            return false;
        };
        match active.as_ref() {
            Some(shared) if shared.session_active() => {
                log::info!("board: cancel requested");
                shared.cancel();
                true
            }
            _ => false,
        }
    }

    fn set_active(&self, shared: Option<Arc<Shared>>) {
        if let Ok(mut active) = self.active.lock() {
            *active = shared;
        }
    }

    /// Serve commands from `transport` until it closes or `stop` is set
    ///
    /// The transport's read timeout bounds how long `stop` may go unnoticed.
    pub fn serve<T: Read + Write>(&self, transport: T, stop: &AtomicBool) -> Result<()> {
        let shared = Arc::new(Shared::new());
        self.set_active(Some(shared.clone()));
        let done = AtomicBool::new(false);
        let result = thread::scope(|scope| {
            scope.spawn(|| self.regulate(&shared, &done));
            let result = self.dispatch(&shared, transport, stop);
            done.store(true, Ordering::Relaxed);
            result
        });
        self.set_active(None);
        result
    }

    fn regulate(&self, shared: &Shared, done: &AtomicBool) {
        let vdd = &self.config.vdd.regulator;
        let vpp = &self.config.vpp.regulator;
        let mut regulators = RegulatorLoop::new(
            shared,
            Dc2Dc::new(*vdd, self.vdd.pwm(), self.vdd.adc(vdd)),
            Dc2Dc::new(*vpp, self.vpp.pwm(), self.vpp.adc(vpp)),
        )
        .with_period(self.config.tick_period_us);
        regulators.run(&StdClock::new(), &mut SimDelay, || {
            !done.load(Ordering::Relaxed)
        });
        if regulators.overruns() > 0 {
            log::debug!(
                "board: {} of {} regulator ticks overran",
                regulators.overruns(),
                regulators.ticks()
            );
        }
    }

    fn dispatch<T: Read + Write>(
        &self,
        shared: &Shared,
        transport: T,
        stop: &AtomicBool,
    ) -> Result<()> {
        let mut dispatcher = Dispatcher::new(transport, self.programmer(shared)?);
        log::info!("board: serving");
        while !stop.load(Ordering::Relaxed) {
            match dispatcher.poll() {
                Ok(Poll::Closed) => {
                    log::info!("board: host disconnected");
                    break;
                }
                Ok(Poll::Idle | Poll::Handled) => {}
                Err(e) => return Err(SimError::Transport(e.kind())),
            }
        }
        Ok(())
    }

    fn chain(&self, ser: Signal, srclk: Signal, rclk: Signal, lines: usize) -> Chain {
        let s = &self.socket;
        ShiftOut::new(s.pin(ser), s.pin(srclk), s.pin(rclk), SimDelay, lines / 8)
    }

    /// Wire the core onto the socket
    pub fn programmer<'s>(&self, shared: &'s Shared) -> Result<SimProgrammer<'s>> {
        let s = &self.socket;
        let ctrl = CtrlBus::new(GpioLines::new([
            s.pin(Signal::Ce),
            s.pin(Signal::Oe),
            s.pin(Signal::We),
        ]))?;
        let addr = AddrBus::new(self.chain(
            Signal::AddrSer,
            Signal::AddrSrclk,
            Signal::AddrRclk,
            ADDRESS_LINES,
        ))?;
        let data = DataBus::new(Duplex::new(
            self.chain(
                Signal::DataSer,
                Signal::DataSrclk,
                Signal::DataRclk,
                DATA_LINES,
            ),
            ShiftIn::new(
                s.pin(Signal::DataLoad),
                s.pin(Signal::DataClk),
                s.q7(),
                SimDelay,
                DATA_LINES / 8,
            ),
        ))?;
        let vdd = VddGenerator::new(
            shared,
            self.config.vdd.generator,
            s.pin(Signal::VddOn),
            s.pin(Signal::VddOnVpp),
        )?;
        let vpp = VppGenerator::new(
            shared,
            self.config.vpp.generator,
            s.pin(Signal::VppOn),
            self.chain(Signal::RouteSer, Signal::RouteSrclk, Signal::RouteRclk, 8),
        )?;
        Ok(Programmer::new(
            shared,
            Buses::new(ctrl, addr, data),
            Generators::new(vdd, vpp),
            SimDelay,
        ))
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(BoardConfig::default())
    }
}
