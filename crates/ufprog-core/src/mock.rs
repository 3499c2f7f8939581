//! Test doubles shared by the unit tests

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;

use crate::bitbus::LineDriver;
use crate::bus::{ControlLine, TargetBus};
use crate::error::{Error, Result};
use crate::generator::{Supplies, VppRoute};
use crate::hal::{AdcChannel, DelayNs, InputPin, OutputPin, SetDutyCycle};
use crate::regulator::{Phase, Rail, RegulatorStatus};

// ---------------------------------------------------------------------------
// Line drivers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct DriverLog {
    pub drives: Vec<Vec<u8>>,
    pub input: Vec<u8>,
    pub samples: usize,
}

/// Records every image it is asked to drive
pub struct RecordingDriver {
    lines: usize,
    input: bool,
    log: Rc<RefCell<DriverLog>>,
}

impl RecordingDriver {
    pub fn new(lines: usize) -> Self {
        Self {
            lines,
            input: false,
            log: Rc::default(),
        }
    }

    /// Also answer `sample` from `log.input`
    pub fn with_input(mut self) -> Self {
        self.input = true;
        self
    }

    pub fn log(&self) -> Rc<RefCell<DriverLog>> {
        self.log.clone()
    }
}

impl LineDriver for RecordingDriver {
    fn lines(&self) -> usize {
        self.lines
    }

    fn drive(&mut self, image: &[u8]) -> Result<()> {
        self.log.borrow_mut().drives.push(image.to_vec());
        Ok(())
    }

    fn sample(&mut self, image: &mut [u8]) -> Result<()> {
        if !self.input {
            return Err(Error::UnsupportedOperation);
        }
        let mut log = self.log.borrow_mut();
        for (i, byte) in image.iter_mut().enumerate() {
            *byte = log.input.get(i).copied().unwrap_or(0);
        }
        log.samples += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pins
// ---------------------------------------------------------------------------

/// Ordered record of every pin write, shared by the pins it hands out
#[derive(Clone, Default)]
pub struct PinLog {
    events: Rc<RefCell<Vec<(&'static str, bool)>>>,
}

impl PinLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&self, name: &'static str) -> MockPin {
        MockPin {
            name,
            log: self.clone(),
            wire: None,
        }
    }

    /// A pin whose rising edges advance `wire` by one bit
    pub fn clocked_pin(&self, name: &'static str, wire: &Wire) -> MockPin {
        MockPin {
            name,
            log: self.clone(),
            wire: Some(wire.clone()),
        }
    }

    pub fn level(&self, name: &str) -> Option<bool> {
        self.events
            .borrow()
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, level)| *level)
    }

    pub fn last_event(&self) -> Option<(&'static str, bool)> {
        self.events.borrow().last().copied()
    }

    /// Transitions of `name` to `to`; the first write counts as an edge
    fn edges(&self, name: &str, to: bool) -> usize {
        let mut level = None;
        let mut count = 0;
        for (n, value) in self.events.borrow().iter() {
            if *n != name {
                continue;
            }
            if *value == to && level != Some(to) {
                count += 1;
            }
            level = Some(*value);
        }
        count
    }

    pub fn rises(&self, name: &str) -> usize {
        self.edges(name, true)
    }

    pub fn falls(&self, name: &str) -> usize {
        self.edges(name, false)
    }

    /// Level of `data` at each rising edge of `clock`
    pub fn sampled_on_rise(&self, clock: &str, data: &str) -> Vec<bool> {
        let mut clock_level = None;
        let mut data_level = false;
        let mut out = Vec::new();
        for (name, value) in self.events.borrow().iter() {
            if *name == data {
                data_level = *value;
            } else if *name == clock {
                if *value && clock_level != Some(true) {
                    out.push(data_level);
                }
                clock_level = Some(*value);
            }
        }
        out
    }

    fn record(&self, name: &'static str, level: bool) {
        self.events.borrow_mut().push((name, level));
    }
}

pub struct MockPin {
    name: &'static str,
    log: PinLog,
    wire: Option<Wire>,
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        self.log.record(self.name, false);
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        let rising = self.log.level(self.name) != Some(true);
        self.log.record(self.name, true);
        if rising {
            if let Some(wire) = &self.wire {
                wire.advance();
            }
        }
        Ok(())
    }
}

/// Serial input stream, one bit per clock
#[derive(Clone)]
pub struct Wire {
    state: Rc<RefCell<(Vec<bool>, usize)>>,
}

impl Wire {
    pub fn new(bits: &[bool]) -> Self {
        Self {
            state: Rc::new(RefCell::new((bits.to_vec(), 0))),
        }
    }

    fn advance(&self) {
        self.state.borrow_mut().1 += 1;
    }
}

impl embedded_hal::digital::ErrorType for Wire {
    type Error = Infallible;
}

impl InputPin for Wire {
    fn is_high(&mut self) -> core::result::Result<bool, Infallible> {
        let state = self.state.borrow();
        Ok(state.0.get(state.1).copied().unwrap_or(false))
    }

    fn is_low(&mut self) -> core::result::Result<bool, Infallible> {
        self.is_high().map(|high| !high)
    }
}

/// Delay that returns immediately and sums what was asked for
#[derive(Clone, Default)]
pub struct NoDelay {
    total: Rc<Cell<u64>>,
}

impl NoDelay {
    pub fn total_ns(&self) -> u64 {
        self.total.get()
    }
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total.set(self.total.get() + ns as u64);
    }
}

// ---------------------------------------------------------------------------
// PWM / ADC plant
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockPwm {
    max: u16,
    raw: Rc<Cell<u16>>,
    writes: Rc<Cell<u32>>,
    fail: Rc<Cell<bool>>,
}

impl MockPwm {
    pub fn new(max: u16) -> Self {
        Self {
            max,
            raw: Rc::default(),
            writes: Rc::default(),
            fail: Rc::default(),
        }
    }

    pub fn raw(&self) -> u16 {
        self.raw.get()
    }

    /// Duty writes attempted, failed ones included
    pub fn writes(&self) -> u32 {
        self.writes.get()
    }

    /// Set to make duty writes fail
    pub fn failure(&self) -> Rc<Cell<bool>> {
        self.fail.clone()
    }
}

impl embedded_hal::pwm::ErrorType for MockPwm {
    type Error = embedded_hal::pwm::ErrorKind;
}

impl SetDutyCycle for MockPwm {
    fn max_duty_cycle(&self) -> u16 {
        self.max
    }

    fn set_duty_cycle(&mut self, duty: u16) -> core::result::Result<(), Self::Error> {
        self.writes.set(self.writes.get() + 1);
        if self.fail.get() {
            return Err(embedded_hal::pwm::ErrorKind::Other);
        }
        self.raw.set(duty);
        Ok(())
    }
}

/// ADC reading an ideal converter: rail volts = duty percent * gain
pub struct PlantAdc<'a> {
    pwm: MockPwm,
    gain: f32,
    divider: f32,
    vref: f32,
    fail: Rc<Cell<bool>>,
    hook: Option<Box<dyn FnMut() + 'a>>,
}

impl<'a> PlantAdc<'a> {
    pub fn new(pwm: &MockPwm, gain: f32, divider: f32, vref: f32) -> Self {
        Self {
            pwm: pwm.clone(),
            gain,
            divider,
            vref,
            fail: Rc::default(),
            hook: None,
        }
    }

    /// Run `hook` at every conversion
    pub fn on_read(mut self, hook: impl FnMut() + 'a) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Set to make conversions fail
    pub fn failure(&self) -> Rc<Cell<bool>> {
        self.fail.clone()
    }
}

impl AdcChannel for PlantAdc<'_> {
    type Error = &'static str;

    fn read_raw(&mut self) -> core::result::Result<u16, Self::Error> {
        if let Some(hook) = self.hook.as_mut() {
            hook();
        }
        if self.fail.get() {
            return Err("conversion failed");
        }
        let duty = self.pwm.raw() as f32 * 100.0 / self.pwm.max as f32;
        let pin = duty * self.gain / self.divider;
        let counts = pin / self.vref * 4096.0;
        Ok(counts.clamp(0.0, 4095.0) as u16)
    }
}

// ---------------------------------------------------------------------------
// Parallel memory behind a TargetBus
// ---------------------------------------------------------------------------

/// Byte- or word-wide memory wired to the control/address/data lines
///
/// A write cycle completes at the trailing edge of the program pulse on WE
/// with CE asserted and OE released. EPROM-style cells can only clear bits.
pub struct MemoryBus {
    pub mem: Vec<u16>,
    /// Every completed write cycle, commands included
    pub writes: Vec<(u32, u16)>,
    pub reads: usize,
    /// Program pulse is WE released (instead of asserted)
    pub positive_pulse: bool,
    /// Cells take the written value instead of `old & new`
    pub overwrite: bool,
    /// Pulses a cell needs before a write sticks
    pub pulses_needed: u32,
    /// Cell that never takes a write
    pub stuck: Option<u32>,
    /// Manufacturer and device returned at 0 and 1 while in ID mode
    pub id: (u16, u16),
    id_mode: Rc<Cell<bool>>,
    pulses: Vec<u32>,
    ctrl: [bool; 3],
    address: u32,
    width: u8,
    data: u16,
    wide: bool,
}

impl MemoryBus {
    /// Erased memory of `cells` cells
    pub fn new(cells: usize) -> Self {
        Self {
            mem: vec![0xFFFF; cells],
            writes: Vec::new(),
            reads: 0,
            positive_pulse: false,
            overwrite: false,
            pulses_needed: 1,
            stuck: None,
            id: (0, 0),
            id_mode: Rc::default(),
            pulses: vec![0; cells],
            ctrl: [false; 3],
            address: 0,
            width: 32,
            data: 0,
            wide: false,
        }
    }

    /// Flag that switches reads at 0/1 to the ID bytes (VPP on A9)
    pub fn id_line(&self) -> Rc<Cell<bool>> {
        self.id_mode.clone()
    }

    fn index(line: ControlLine) -> usize {
        match line {
            ControlLine::Ce => 0,
            ControlLine::Oe => 1,
            ControlLine::We => 2,
        }
    }

    fn mask(&self) -> u16 {
        if self.wide {
            0xFFFF
        } else {
            0x00FF
        }
    }

    fn complete_write(&mut self) {
        let address = self.address;
        let data = self.data & self.mask();
        self.writes.push((address, data));
        let i = address as usize;
        if i >= self.mem.len() || self.stuck == Some(address) {
            return;
        }
        self.pulses[i] += 1;
        if self.pulses[i] < self.pulses_needed {
            return;
        }
        self.pulses[i] = 0;
        let old = self.mem[i] & self.mask();
        self.mem[i] = if self.overwrite { data } else { old & data };
    }
}

impl TargetBus for MemoryBus {
    fn set_control(&mut self, line: ControlLine, active: bool) -> Result<()> {
        let was = self.ctrl[Self::index(line)];
        self.ctrl[Self::index(line)] = active;
        if line == ControlLine::We && was != active {
            let pulse_end = if self.positive_pulse { active } else { !active };
            if pulse_end && self.ctrl[0] && !self.ctrl[1] {
                self.complete_write();
            }
        }
        Ok(())
    }

    fn control(&self, line: ControlLine) -> bool {
        self.ctrl[Self::index(line)]
    }

    fn set_address(&mut self, address: u32) -> Result<()> {
        if self.width < 32 && address >> self.width != 0 {
            return Err(Error::OutOfRange);
        }
        self.address = address;
        Ok(())
    }

    fn address(&self) -> u32 {
        self.address
    }

    fn set_address_width(&mut self, width: u8) -> Result<()> {
        if width > 32 {
            return Err(Error::OutOfRange);
        }
        self.width = width;
        self.address = 0;
        Ok(())
    }

    fn set_data(&mut self, value: u16) -> Result<()> {
        if value & !self.mask() != 0 {
            return Err(Error::OutOfRange);
        }
        self.data = value;
        Ok(())
    }

    fn get_data(&mut self) -> Result<u16> {
        self.reads += 1;
        if !(self.ctrl[0] && self.ctrl[1]) {
            return Ok(self.mask());
        }
        if self.id_mode.get() && self.address <= 1 {
            let id = if self.address == 0 { self.id.0 } else { self.id.1 };
            return Ok(id & self.mask());
        }
        let value = self
            .mem
            .get(self.address as usize)
            .copied()
            .unwrap_or(0xFFFF);
        Ok(value & self.mask())
    }

    fn set_data_wide(&mut self, wide: bool) -> Result<()> {
        self.wide = wide;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Supplies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SupplyEvent {
    Start(Rail, f32),
    SetVoltage(Rail, f32),
    Stop(Rail),
    Output(Rail, bool),
    VddOnVpp(bool),
    Route(VppRoute, bool),
}

/// Supplies that settle instantly and log every switch
#[derive(Default)]
pub struct MockSupplies {
    pub events: Vec<SupplyEvent>,
    pub targets: [f32; 2],
    pub running: [bool; 2],
    pub outputs: [bool; 2],
    pub vdd_on_vpp: bool,
    pub routes: [bool; 5],
    pub calibration: [f32; 2],
    /// Returned by every `wait_settled`
    pub settle_error: Option<Error>,
    /// Raised while VPP is routed to A9
    pub a9_line: Option<Rc<Cell<bool>>>,
}

impl MockSupplies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linked_a9(mut self, line: Rc<Cell<bool>>) -> Self {
        self.a9_line = Some(line);
        self
    }

    fn slot(rail: Rail) -> usize {
        match rail {
            Rail::Vdd => 0,
            Rail::Vpp => 1,
        }
    }

    fn route_slot(route: VppRoute) -> usize {
        VppRoute::ALL
            .iter()
            .position(|r| *r == route)
            .unwrap_or(0)
    }

    /// Events that switched VPP routing or the VPP output
    pub fn vpp_switching(&self) -> Vec<SupplyEvent> {
        self.events
            .iter()
            .copied()
            .filter(|e| {
                matches!(
                    e,
                    SupplyEvent::Route(..) | SupplyEvent::Output(Rail::Vpp, _)
                )
            })
            .collect()
    }
}

impl Supplies for MockSupplies {
    fn start(&mut self, rail: Rail, volts: f32) -> Result<()> {
        self.events.push(SupplyEvent::Start(rail, volts));
        self.targets[Self::slot(rail)] = volts;
        self.running[Self::slot(rail)] = true;
        Ok(())
    }

    fn set_voltage(&mut self, rail: Rail, volts: f32) -> Result<()> {
        self.events.push(SupplyEvent::SetVoltage(rail, volts));
        self.targets[Self::slot(rail)] = volts;
        Ok(())
    }

    fn stop(&mut self, rail: Rail) -> Result<()> {
        self.events.push(SupplyEvent::Stop(rail));
        self.running[Self::slot(rail)] = false;
        Ok(())
    }

    fn status(&self, rail: Rail) -> RegulatorStatus {
        let i = Self::slot(rail);
        RegulatorStatus {
            phase: if self.running[i] {
                Phase::Settled
            } else {
                Phase::Idle
            },
            fault: None,
            target: self.targets[i],
            measured: self.targets[i],
            duty: 0.0,
        }
    }

    fn wait_settled(&mut self, _rail: Rail, _delay: &mut dyn DelayNs) -> Result<()> {
        match self.settle_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn set_output(&mut self, rail: Rail, on: bool) -> Result<()> {
        self.events.push(SupplyEvent::Output(rail, on));
        self.outputs[Self::slot(rail)] = on;
        Ok(())
    }

    fn is_output_on(&self, rail: Rail) -> bool {
        self.outputs[Self::slot(rail)]
    }

    fn set_vdd_on_vpp(&mut self, on: bool) -> Result<()> {
        self.events.push(SupplyEvent::VddOnVpp(on));
        self.vdd_on_vpp = on;
        Ok(())
    }

    fn is_vdd_on_vpp(&self) -> bool {
        self.vdd_on_vpp
    }

    fn set_vpp_route(&mut self, route: VppRoute, on: bool) -> Result<()> {
        self.events.push(SupplyEvent::Route(route, on));
        self.routes[Self::route_slot(route)] = on;
        if route == VppRoute::A9 {
            if let Some(line) = &self.a9_line {
                line.set(on);
            }
        }
        Ok(())
    }

    fn is_vpp_routed(&self, route: VppRoute) -> bool {
        self.routes[Self::route_slot(route)]
    }

    fn calibration(&self, rail: Rail) -> f32 {
        self.calibration[Self::slot(rail)]
    }

    fn set_calibration(&mut self, rail: Rail, offset: f32) -> Result<()> {
        self.calibration[Self::slot(rail)] = offset;
        Ok(())
    }

    fn begin_calibration(&mut self, rail: Rail) -> Result<()> {
        self.calibration[Self::slot(rail)] = 0.0;
        self.set_output(rail, true)
    }

    fn finish_calibration(
        &mut self,
        rail: Rail,
        measured: f32,
        _delay: &mut dyn DelayNs,
    ) -> Result<f32> {
        let offset = measured - self.targets[Self::slot(rail)];
        self.calibration[Self::slot(rail)] = offset;
        self.set_output(rail, false)?;
        Ok(offset)
    }
}

// ---------------------------------------------------------------------------
// Serial memories behind a TargetBus
// ---------------------------------------------------------------------------

/// Control lines of a bus model: CE, OE and WE asserted flags
#[derive(Default)]
struct Lines {
    ctrl: [bool; 3],
    address: u32,
}

/// 25-series flash wired CS=CE, SCK=WE (released is high), MOSI=D0, MISO=D1
///
/// Writes, erases and status writes take effect when CS is released, as on
/// a real part. Protected parts (any BP bit set) ignore them.
pub struct SpiFlashBus {
    pub mem: Vec<u8>,
    pub status: u8,
    pub id: [u8; 3],
    /// Opcode of every transaction
    pub commands: Vec<u8>,
    /// Status reads reporting busy after each write or erase
    pub busy_polls: u32,
    busy_left: u32,
    lines: Lines,
    mosi: bool,
    miso: bool,
    shift_in: u8,
    bits_in: u8,
    frame: Vec<u8>,
    out_byte: u8,
}

impl SpiFlashBus {
    pub fn new(size: usize) -> Self {
        Self {
            mem: vec![0xFF; size],
            status: 0,
            id: [0xEF, 0x40, 0x18],
            commands: Vec::new(),
            busy_polls: 0,
            busy_left: 0,
            lines: Lines::default(),
            mosi: false,
            miso: false,
            shift_in: 0,
            bits_in: 0,
            frame: Vec::new(),
            out_byte: 0,
        }
    }

    fn selected(&self) -> bool {
        self.lines.ctrl[0]
    }

    fn frame_address(&self) -> Option<usize> {
        if self.frame.len() < 4 {
            return None;
        }
        Some(u32::from_be_bytes([0, self.frame[1], self.frame[2], self.frame[3]]) as usize)
    }

    /// Byte shifted out while the `position`-th byte of the frame goes in
    fn next_out_byte(&mut self, position: usize) -> u8 {
        match self.frame.first() {
            Some(0x05) => {
                let mut status = self.status;
                if self.busy_left > 0 {
                    self.busy_left -= 1;
                    status |= 0x01;
                }
                status
            }
            Some(0x9F) => self.id.get(position - 1).copied().unwrap_or(0xFF),
            Some(0x03) if position >= 4 => match self.frame_address() {
                Some(addr) => self.mem.get(addr + position - 4).copied().unwrap_or(0xFF),
                None => 0xFF,
            },
            _ => 0xFF,
        }
    }

    fn rising(&mut self) {
        self.shift_in = self.shift_in << 1 | self.mosi as u8;
        self.bits_in += 1;
        if self.bits_in == 8 {
            if self.frame.is_empty() {
                self.commands.push(self.shift_in);
            }
            self.frame.push(self.shift_in);
            self.bits_in = 0;
            self.shift_in = 0;
        }
    }

    fn falling(&mut self) {
        if self.frame.is_empty() {
            return;
        }
        if self.bits_in == 0 {
            self.out_byte = self.next_out_byte(self.frame.len());
        }
        self.miso = self.out_byte >> (7 - self.bits_in) & 1 != 0;
    }

    fn execute(&mut self) {
        let frame = core::mem::take(&mut self.frame);
        let Some(&opcode) = frame.first() else {
            return;
        };
        let enabled = self.status & 0x02 != 0;
        let protected = self.status & 0x1C != 0;
        if opcode == 0x06 {
            self.status |= 0x02;
            return;
        }
        if !matches!(opcode, 0x01 | 0x02 | 0x20 | 0xC7) {
            return;
        }
        self.status &= !0x02;
        if !enabled {
            return;
        }
        match opcode {
            0x01 if frame.len() == 2 => self.status = frame[1] & 0xFC,
            0x02 if frame.len() > 4 && !protected => {
                let addr = u32::from_be_bytes([0, frame[1], frame[2], frame[3]]) as usize;
                for (i, byte) in frame[4..].iter().enumerate() {
                    if let Some(cell) = self.mem.get_mut(addr + i) {
                        *cell &= byte;
                    }
                }
            }
            0x20 if frame.len() == 4 && !protected => {
                let addr = u32::from_be_bytes([0, frame[1], frame[2], frame[3]]) as usize;
                let start = addr & !0xFFF;
                let end = (start + 0x1000).min(self.mem.len());
                self.mem[start..end].fill(0xFF);
            }
            0xC7 if !protected => self.mem.fill(0xFF),
            _ => return,
        }
        self.busy_left = self.busy_polls;
    }
}

impl TargetBus for SpiFlashBus {
    fn set_control(&mut self, line: ControlLine, active: bool) -> Result<()> {
        let i = MemoryBus::index(line);
        let was = self.lines.ctrl[i];
        self.lines.ctrl[i] = active;
        match line {
            ControlLine::Ce if was && !active => self.execute(),
            ControlLine::Ce if !was && active => {
                self.frame.clear();
                self.bits_in = 0;
                self.shift_in = 0;
            }
            // SCK is high while WE is released
            ControlLine::We if self.selected() && was != active => {
                if active {
                    self.falling();
                } else {
                    self.rising();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn control(&self, line: ControlLine) -> bool {
        self.lines.ctrl[MemoryBus::index(line)]
    }

    fn set_address(&mut self, address: u32) -> Result<()> {
        self.lines.address = address;
        Ok(())
    }

    fn address(&self) -> u32 {
        self.lines.address
    }

    fn set_address_width(&mut self, _width: u8) -> Result<()> {
        Ok(())
    }

    fn set_data(&mut self, value: u16) -> Result<()> {
        self.mosi = value & 1 != 0;
        Ok(())
    }

    fn get_data(&mut self) -> Result<u16> {
        Ok((self.miso as u16) << 1)
    }

    fn set_data_wide(&mut self, _wide: bool) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum I2cMode {
    Idle,
    Receive,
    Transmit,
}

/// 24Cxx EEPROM wired SCL=WE (released is high), SDA=D0 open drain
///
/// Buffered writes land at STOP; the part then NACKs its address for
/// `busy_polls` selections, which is what ACK polling waits out.
pub struct I2cEepromBus {
    pub mem: Vec<u8>,
    /// Word address bytes after the device byte
    pub addr_bytes: usize,
    /// The part answers at all
    pub present: bool,
    pub busy_polls: u32,
    /// Address selections NACKed while busy
    pub nacked: u32,
    /// Completed write transactions
    pub write_cycles: u32,
    busy_left: u32,
    lines: Lines,
    master_sda: bool,
    slave_sda: bool,
    mode: I2cMode,
    bit: u8,
    shift: u8,
    frame: Vec<u8>,
    pointer: usize,
    pending: Vec<(usize, u8)>,
    next_mode: I2cMode,
    master_ack: bool,
    out_byte: u8,
}

impl I2cEepromBus {
    pub fn new(size: usize, addr_bytes: usize) -> Self {
        Self {
            mem: vec![0xFF; size],
            addr_bytes,
            present: true,
            busy_polls: 0,
            nacked: 0,
            write_cycles: 0,
            busy_left: 0,
            lines: Lines::default(),
            master_sda: true,
            slave_sda: true,
            mode: I2cMode::Idle,
            bit: 0,
            shift: 0,
            frame: Vec::new(),
            pointer: 0,
            pending: Vec::new(),
            next_mode: I2cMode::Idle,
            master_ack: false,
            out_byte: 0,
        }
    }

    fn scl(&self) -> bool {
        !self.lines.ctrl[2]
    }

    fn sda(&self) -> bool {
        self.master_sda && self.slave_sda
    }

    /// Returns whether the byte is acknowledged
    fn on_byte(&mut self, byte: u8) -> bool {
        self.frame.push(byte);
        if self.frame.len() == 1 {
            if !self.present || byte & 0xF0 != 0xA0 {
                return false;
            }
            if self.busy_left > 0 {
                self.busy_left -= 1;
                self.nacked += 1;
                return false;
            }
            let block = ((byte >> 1) & 0x07) as usize;
            if byte & 1 != 0 {
                self.next_mode = I2cMode::Transmit;
            } else if self.addr_bytes == 1 {
                self.pointer = block << 8 | (self.pointer & 0xFF);
            } else {
                self.pointer = block << 16 | (self.pointer & 0xFFFF);
            }
            return true;
        }
        let index = self.frame.len() - 2;
        if index < self.addr_bytes {
            let shift = 8 * (self.addr_bytes - 1 - index);
            self.pointer = self.pointer & !(0xFF << shift) | (byte as usize) << shift;
        } else {
            self.pending.push((self.pointer, byte));
            self.pointer += 1;
        }
        true
    }

    fn load_out(&mut self) {
        self.out_byte = self.mem.get(self.pointer).copied().unwrap_or(0xFF);
        self.pointer += 1;
        self.slave_sda = self.out_byte & 0x80 != 0;
    }

    fn start(&mut self) {
        self.mode = I2cMode::Receive;
        self.next_mode = I2cMode::Receive;
        self.bit = 0;
        self.shift = 0;
        self.frame.clear();
        self.slave_sda = true;
    }

    fn stop(&mut self) {
        if !self.pending.is_empty() {
            for (addr, byte) in self.pending.drain(..) {
                if let Some(cell) = self.mem.get_mut(addr) {
                    *cell = byte;
                }
            }
            self.write_cycles += 1;
            self.busy_left = self.busy_polls;
        }
        self.mode = I2cMode::Idle;
        self.slave_sda = true;
    }

    /// Bits count up on rising edges; 9 is the ACK clock
    fn scl_rising(&mut self) {
        match self.mode {
            I2cMode::Idle => {}
            I2cMode::Receive => {
                if self.bit < 8 {
                    self.shift = self.shift << 1 | self.sda() as u8;
                }
                self.bit += 1;
            }
            I2cMode::Transmit => {
                if self.bit == 8 {
                    self.master_ack = !self.sda();
                }
                self.bit += 1;
            }
        }
    }

    fn scl_falling(&mut self) {
        match (self.mode, self.bit) {
            (I2cMode::Idle, _) | (_, 0) => {}
            (I2cMode::Receive, 8) => {
                let ack = self.on_byte(self.shift);
                self.shift = 0;
                self.slave_sda = !ack;
                if !ack {
                    self.next_mode = I2cMode::Idle;
                }
            }
            (I2cMode::Receive, 9) => {
                self.bit = 0;
                self.slave_sda = true;
                self.mode = self.next_mode;
                if self.mode == I2cMode::Transmit {
                    self.load_out();
                }
            }
            (I2cMode::Transmit, 8) => self.slave_sda = true,
            (I2cMode::Transmit, 9) => {
                self.bit = 0;
                if self.master_ack {
                    self.load_out();
                } else {
                    self.slave_sda = true;
                    self.mode = I2cMode::Idle;
                }
            }
            (I2cMode::Transmit, bit) => self.slave_sda = self.out_byte >> (7 - bit) & 1 != 0,
            _ => {}
        }
    }
}

impl TargetBus for I2cEepromBus {
    fn set_control(&mut self, line: ControlLine, active: bool) -> Result<()> {
        let i = MemoryBus::index(line);
        let was = self.lines.ctrl[i];
        self.lines.ctrl[i] = active;
        if line == ControlLine::We && was != active {
            if active {
                self.scl_falling();
            } else {
                self.scl_rising();
            }
        }
        Ok(())
    }

    fn control(&self, line: ControlLine) -> bool {
        self.lines.ctrl[MemoryBus::index(line)]
    }

    fn set_address(&mut self, address: u32) -> Result<()> {
        self.lines.address = address;
        Ok(())
    }

    fn address(&self) -> u32 {
        self.lines.address
    }

    fn set_address_width(&mut self, _width: u8) -> Result<()> {
        Ok(())
    }

    fn set_data(&mut self, value: u16) -> Result<()> {
        let before = self.sda();
        self.master_sda = value & 1 != 0;
        let after = self.sda();
        if self.scl() && before != after {
            if after {
                self.stop();
            } else {
                self.start();
            }
        }
        Ok(())
    }

    fn get_data(&mut self) -> Result<u16> {
        Ok(self.sda() as u16)
    }

    fn set_data_wide(&mut self, _wide: bool) -> Result<()> {
        Ok(())
    }
}
