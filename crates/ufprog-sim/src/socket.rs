//! Pin-level model of the board between the MCU and the target socket
//!
//! The MCU side is a set of [`SimPin`] outputs and one [`SimInput`], wired
//! exactly like the real board: control lines straight to GPIOs, the
//! address, data and VPP-routing lines behind 74HC595 chains, data readback
//! through a 74HC165 chain. Whenever a latch or GPIO changes what the socket
//! sees, the inserted [`Chip`] is told about the new [`Pins`].

use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::digital::{self, ErrorKind, ErrorType, InputPin, OutputPin};
use ufprog_core::generator::VppRoute;

use crate::chip::{Chip, Drive};

/// Address lines behind the address chain
pub const ADDRESS_LINES: usize = 24;
/// Data lines behind the data chains
pub const DATA_LINES: usize = 16;

/// MCU output pins of the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Chip enable GPIO
    Ce,
    /// Output enable GPIO
    Oe,
    /// Write enable GPIO
    We,
    /// Address chain serial data
    AddrSer,
    /// Address chain shift clock
    AddrSrclk,
    /// Address chain storage clock
    AddrRclk,
    /// Data output chain serial data
    DataSer,
    /// Data output chain shift clock
    DataSrclk,
    /// Data output chain storage clock
    DataRclk,
    /// Data input chain parallel load (active low)
    DataLoad,
    /// Data input chain clock
    DataClk,
    /// Routing chain serial data
    RouteSer,
    /// Routing chain shift clock
    RouteSrclk,
    /// Routing chain storage clock
    RouteRclk,
    /// VDD output switch
    VddOn,
    /// VDD-from-VPP switch
    VddOnVpp,
    /// VPP output switch
    VppOn,
}

/// Line states as seen from the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pins {
    /// Chip enable asserted
    pub ce: bool,
    /// Output enable asserted
    pub oe: bool,
    /// Write enable asserted
    pub we: bool,
    /// Address lines
    pub address: u32,
    /// Data lines as driven by the programmer
    pub data: u16,
    /// VDD connected
    pub vdd: bool,
    /// VDD fed from the VPP rail
    pub vdd_on_vpp: bool,
    /// VPP connected to the routing switches
    pub vpp: bool,
    /// Routing switch states, A9 in bit 0
    pub routes: u8,
}

impl Pins {
    /// Whether VPP is switched to `route`
    pub fn routed(&self, route: VppRoute) -> bool {
        let bit = match route {
            VppRoute::A9 => 0,
            VppRoute::A18 => 1,
            VppRoute::Ce => 2,
            VppRoute::Oe => 3,
            VppRoute::We => 4,
        };
        self.routes & (1 << bit) != 0
    }
}

/// One 74HC595 chain
#[derive(Debug, Default)]
struct Chain595 {
    lines: usize,
    ser: bool,
    srclk: bool,
    rclk: bool,
    stage: u64,
    outputs: u64,
}

impl Chain595 {
    fn new(lines: usize) -> Self {
        Self {
            lines,
            ..Self::default()
        }
    }

    fn mask(&self) -> u64 {
        (1u64 << self.lines) - 1
    }

    fn ser(&mut self, high: bool) {
        self.ser = high;
    }

    fn srclk(&mut self, high: bool) {
        if high && !self.srclk {
            self.stage = (self.stage << 1 | self.ser as u64) & self.mask();
        }
        self.srclk = high;
    }

    /// Returns whether the outputs were latched
    fn rclk(&mut self, high: bool) -> bool {
        let rising = high && !self.rclk;
        self.rclk = high;
        if rising {
            self.outputs = self.stage;
        }
        rising
    }
}

/// One 74HC165 chain
#[derive(Debug, Default)]
struct Chain165 {
    lines: usize,
    clk: bool,
    captured: u64,
    clocked: usize,
}

impl Chain165 {
    fn load(&mut self, lines: u64) {
        self.captured = lines;
        self.clocked = 0;
    }

    fn clk(&mut self, high: bool) {
        if high && !self.clk {
            self.clocked += 1;
        }
        self.clk = high;
    }

    /// Register 0 presents D7 first; later registers follow it
    fn q7(&self) -> bool {
        if self.clocked >= self.lines {
            return false;
        }
        let pos = self.clocked / 8 * 8 + 7 - self.clocked % 8;
        self.captured >> pos & 1 != 0
    }
}

/// Chip in the socket, shared with whoever inserted it
pub type SharedChip = Arc<Mutex<dyn Chip>>;

/// Board state behind the pins
pub struct Socket {
    pins: Pins,
    addr: Chain595,
    data_out: Chain595,
    routes: Chain595,
    data_in: Chain165,
    chip: Option<SharedChip>,
    fault: Option<Signal>,
}

impl Socket {
    fn new() -> Self {
        Self {
            pins: Pins::default(),
            addr: Chain595::new(ADDRESS_LINES),
            data_out: Chain595::new(DATA_LINES),
            routes: Chain595::new(8),
            data_in: Chain165 {
                lines: DATA_LINES,
                ..Chain165::default()
            },
            chip: None,
            fault: None,
        }
    }

    /// Line states the socket currently sees
    pub fn pins(&self) -> Pins {
        self.pins
    }

    /// Data lines including whatever the chip drives
    pub fn data_lines(&self) -> u16 {
        let drive = self
            .chip
            .as_ref()
            .and_then(|chip| lock(chip).output(&self.pins));
        match drive {
            Some(Drive { mask, value }) => self.pins.data & !mask | value & mask,
            None => self.pins.data,
        }
    }

    fn set(&mut self, signal: Signal, high: bool) -> Result<(), PinFault> {
        if self.fault == Some(signal) {
            return Err(PinFault(signal));
        }
        let before = self.pins;
        match signal {
            Signal::Ce => self.pins.ce = high,
            Signal::Oe => self.pins.oe = high,
            Signal::We => self.pins.we = high,
            Signal::AddrSer => self.addr.ser(high),
            Signal::AddrSrclk => self.addr.srclk(high),
            Signal::AddrRclk => {
                if self.addr.rclk(high) {
                    self.pins.address = self.addr.outputs as u32;
                }
            }
            Signal::DataSer => self.data_out.ser(high),
            Signal::DataSrclk => self.data_out.srclk(high),
            Signal::DataRclk => {
                if self.data_out.rclk(high) {
                    self.pins.data = self.data_out.outputs as u16;
                }
            }
            Signal::DataLoad => {
                if !high {
                    let lines = self.data_lines();
                    self.data_in.load(lines as u64);
                }
            }
            Signal::DataClk => self.data_in.clk(high),
            Signal::RouteSer => self.routes.ser(high),
            Signal::RouteSrclk => self.routes.srclk(high),
            Signal::RouteRclk => {
                if self.routes.rclk(high) {
                    self.pins.routes = self.routes.outputs as u8;
                }
            }
            Signal::VddOn => self.pins.vdd = high,
            Signal::VddOnVpp => self.pins.vdd_on_vpp = high,
            Signal::VppOn => self.pins.vpp = high,
        }
        if self.pins != before {
            if let Some(chip) = &self.chip {
                lock(chip).update(&self.pins);
            }
        }
        Ok(())
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable handle on the board state
#[derive(Clone)]
pub struct SocketHandle(Arc<Mutex<Socket>>);

impl SocketHandle {
    /// Empty socket, all lines low
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Socket::new())))
    }

    fn lock(&self) -> MutexGuard<'_, Socket> {
        lock(&self.0)
    }

    /// Output pin wired to `signal`
    pub fn pin(&self, signal: Signal) -> SimPin {
        SimPin {
            socket: self.clone(),
            signal,
        }
    }

    /// Serial output of the data input chain
    pub fn q7(&self) -> SimInput {
        SimInput {
            socket: self.clone(),
        }
    }

    /// Put a chip in the socket, replacing any previous one
    pub fn insert(&self, chip: SharedChip) {
        let mut socket = self.lock();
        lock(&chip).update(&socket.pins);
        socket.chip = Some(chip);
    }

    /// Empty the socket
    pub fn remove(&self) {
        self.lock().chip = None;
    }

    /// Make every write to `signal` fail, or clear the fault with `None`
    pub fn fail_pin(&self, signal: Option<Signal>) {
        self.lock().fault = signal;
    }

    /// Snapshot of the socket lines
    pub fn pins(&self) -> Pins {
        self.lock().pins()
    }
}

impl Default for SocketHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Pin write rejected by an injected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinFault(pub Signal);

impl digital::Error for PinFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// MCU output pin
pub struct SimPin {
    socket: SocketHandle,
    signal: Signal,
}

impl ErrorType for SimPin {
    type Error = PinFault;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), PinFault> {
        self.socket.lock().set(self.signal, false)
    }

    fn set_high(&mut self) -> Result<(), PinFault> {
        self.socket.lock().set(self.signal, true)
    }
}

/// MCU input pin on the 165 chain output
pub struct SimInput {
    socket: SocketHandle,
}

impl ErrorType for SimInput {
    type Error = core::convert::Infallible;
}

impl InputPin for SimInput {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.socket.lock().data_in.q7())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}
