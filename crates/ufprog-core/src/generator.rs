//! VDD and VPP generators
//!
//! A generator wraps one regulated rail with the switches that connect it to
//! the socket. VDD has an output switch and a VDD-on-VPP switch; VPP has an
//! output switch and a routing bit-bus that puts it on A9, A18, CE, OE or WE.
//!
//! Generators run in the dispatcher context. They never touch the PWM or
//! ADC; voltage commands are posted to [`Shared`] and carried out by the
//! regulator context.

use crate::bitbus::{BitBus, LineDriver};
use crate::error::{Error, Result};
use crate::hal::{DelayNs, HwResult, OutputPin};
use crate::regulator::{Phase, Rail, RegulatorStatus};
use crate::shared::Shared;

/// Socket pin VPP can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum VppRoute {
    /// Address line 9 (EPROM signature / erase)
    A9,
    /// Address line 18
    A18,
    /// Chip enable pin
    Ce,
    /// Output enable pin (27C-style VPP/OE)
    Oe,
    /// Write enable pin
    We,
}

impl VppRoute {
    /// All routes, in routing bus order
    pub const ALL: [VppRoute; 5] = [Self::A9, Self::A18, Self::Ce, Self::Oe, Self::We];

    fn index(self) -> usize {
        match self {
            Self::A9 => 0,
            Self::A18 => 1,
            Self::Ce => 2,
            Self::Oe => 3,
            Self::We => 4,
        }
    }
}

/// Nominal voltage and settle wait of one generator
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct GeneratorConfig {
    /// Voltage used for calibration
    pub nominal: f32,
    /// Interval between settle polls, microseconds
    pub poll_us: u32,
    /// Give up waiting for Settled after this long, milliseconds
    pub settle_timeout_ms: u32,
}

impl GeneratorConfig {
    /// 5 V device supply
    pub fn vdd() -> Self {
        Self {
            nominal: 5.0,
            poll_us: 500,
            settle_timeout_ms: 2000,
        }
    }

    /// 12 V programming supply
    pub fn vpp() -> Self {
        Self {
            nominal: 12.0,
            ..Self::vdd()
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self::vdd()
    }
}

/// Everything the device engine needs from the supplies
pub trait Supplies {
    /// Set the target and begin regulating
    fn start(&mut self, rail: Rail, volts: f32) -> Result<()>;

    /// Change the target
    fn set_voltage(&mut self, rail: Rail, volts: f32) -> Result<()>;

    /// Stop regulating
    fn stop(&mut self, rail: Rail) -> Result<()>;

    /// Regulator snapshot
    fn status(&self, rail: Rail) -> RegulatorStatus;

    /// Block until the rail reports Settled
    ///
    /// A latched fault reports its error; an idle rail or an exhausted wait
    /// reports [`Error::RegulationTimeout`].
    fn wait_settled(&mut self, rail: Rail, delay: &mut dyn DelayNs) -> Result<()>;

    /// Connect or disconnect the rail's output switch
    fn set_output(&mut self, rail: Rail, on: bool) -> Result<()>;

    /// State of the rail's output switch
    fn is_output_on(&self, rail: Rail) -> bool;

    /// Feed VDD from the VPP rail
    fn set_vdd_on_vpp(&mut self, on: bool) -> Result<()>;

    /// State of the VDD-on-VPP switch
    fn is_vdd_on_vpp(&self) -> bool;

    /// Route VPP to one socket pin
    fn set_vpp_route(&mut self, route: VppRoute, on: bool) -> Result<()>;

    /// Whether VPP is routed to `route`
    fn is_vpp_routed(&self, route: VppRoute) -> bool;

    /// Measurement offset of the rail
    fn calibration(&self, rail: Rail) -> f32;

    /// Replace the measurement offset of the rail
    fn set_calibration(&mut self, rail: Rail, offset: f32) -> Result<()>;

    /// Drive the rail to its nominal voltage with a zero offset, output on
    fn begin_calibration(&mut self, rail: Rail) -> Result<()>;

    /// Store the offset between an external meter and the rail's own
    /// reading, switch the output off and return the offset
    ///
    /// Waits for a reading taken since [`Supplies::begin_calibration`].
    fn finish_calibration(
        &mut self,
        rail: Rail,
        measured: f32,
        delay: &mut dyn DelayNs,
    ) -> Result<f32>;

    /// Disconnect every switch; regulators keep their targets
    fn release(&mut self) -> Result<()> {
        self.set_output(Rail::Vdd, false)?;
        self.set_output(Rail::Vpp, false)?;
        self.set_vdd_on_vpp(false)?;
        for route in VppRoute::ALL {
            self.set_vpp_route(route, false)?;
        }
        Ok(())
    }
}

/// Posts commands for one rail into [`Shared`]
#[derive(Clone, Copy)]
pub struct RailControl<'s> {
    shared: &'s Shared,
    rail: Rail,
    config: GeneratorConfig,
}

impl<'s> RailControl<'s> {
    /// Control `rail` through `shared`
    pub fn new(shared: &'s Shared, rail: Rail, config: GeneratorConfig) -> Self {
        Self {
            shared,
            rail,
            config,
        }
    }

    /// Rail this controls
    pub fn rail(&self) -> Rail {
        self.rail
    }

    /// Generator settings
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// See [`Supplies::start`]
    pub fn start(&self, volts: f32) {
        log::debug!("generator: {:?} start {:.2} V", self.rail, volts);
        self.shared.with(|s| s.rail_mut(self.rail).start(volts));
    }

    /// See [`Supplies::set_voltage`]
    pub fn set_v(&self, volts: f32) {
        log::debug!("generator: {:?} set {:.2} V", self.rail, volts);
        self.shared.with(|s| s.rail_mut(self.rail).set_v(volts));
    }

    /// See [`Supplies::stop`]
    pub fn stop(&self) {
        log::debug!("generator: {:?} stop", self.rail);
        self.shared.with(|s| s.rail_mut(self.rail).stop());
    }

    /// See [`Supplies::status`]
    pub fn status(&self) -> RegulatorStatus {
        self.shared.status(self.rail)
    }

    /// See [`Supplies::calibration`]
    pub fn calibration(&self) -> f32 {
        self.shared.calibration().get(self.rail)
    }

    /// See [`Supplies::set_calibration`]
    ///
    /// Readings taken with the old offset are discarded.
    pub fn set_calibration(&self, offset: f32) {
        self.shared.with(|s| {
            s.calibration.set(self.rail, offset);
            s.rail_mut(self.rail).invalidate();
        });
    }

    /// First reading taken after the last command or offset change
    pub fn fresh_measurement(&self, delay: &mut dyn DelayNs) -> Result<f32> {
        let poll_us = self.config.poll_us.max(1);
        let polls = (self.config.settle_timeout_ms as u64 * 1000 / poll_us as u64).max(1);
        for _ in 0..polls {
            let (fresh, status) = self.shared.with(|s| {
                let state = s.rail(self.rail);
                (state.fresh, state.status())
            });
            if let Some(fault) = status.fault {
                return Err(fault.error());
            }
            if fresh {
                return Ok(status.measured);
            }
            delay.delay_us(poll_us);
        }
        log::warn!("generator: {:?} no reading in time", self.rail);
        Err(Error::RegulationTimeout)
    }

    /// See [`Supplies::wait_settled`]
    pub fn wait_settled(&self, delay: &mut dyn DelayNs) -> Result<()> {
        let poll_us = self.config.poll_us.max(1);
        let polls = (self.config.settle_timeout_ms as u64 * 1000 / poll_us as u64).max(1);
        for _ in 0..polls {
            let status = self.status();
            if let Some(fault) = status.fault {
                return Err(fault.error());
            }
            match status.phase {
                Phase::Settled => return Ok(()),
                Phase::Idle => return Err(Error::RegulationTimeout),
                Phase::Regulating => delay.delay_us(poll_us),
            }
        }
        log::warn!("generator: {:?} not settled in time", self.rail);
        Err(Error::RegulationTimeout)
    }
}

/// Device supply generator
pub struct VddGenerator<'s, CTRL, ONVPP> {
    rail: RailControl<'s>,
    ctrl: CTRL,
    on_vpp: ONVPP,
    output: bool,
    vdd_on_vpp: bool,
}

impl<'s, CTRL: OutputPin, ONVPP: OutputPin> VddGenerator<'s, CTRL, ONVPP> {
    /// Take the output and VDD-on-VPP switches; both start off
    pub fn new(
        shared: &'s Shared,
        config: GeneratorConfig,
        mut ctrl: CTRL,
        mut on_vpp: ONVPP,
    ) -> Result<Self> {
        ctrl.set_low().hw()?;
        on_vpp.set_low().hw()?;
        Ok(Self {
            rail: RailControl::new(shared, Rail::Vdd, config),
            ctrl,
            on_vpp,
            output: false,
            vdd_on_vpp: false,
        })
    }

    /// Voltage commands for this rail
    pub fn rail(&self) -> &RailControl<'s> {
        &self.rail
    }

    /// Connect VDD to the socket
    pub fn set_output(&mut self, on: bool) -> Result<()> {
        self.ctrl.set_state(on.into()).hw()?;
        self.output = on;
        Ok(())
    }

    /// Whether VDD is connected
    pub fn is_on(&self) -> bool {
        self.output
    }

    /// Feed VDD from the VPP rail
    pub fn set_on_vpp(&mut self, on: bool) -> Result<()> {
        self.on_vpp.set_state(on.into()).hw()?;
        self.vdd_on_vpp = on;
        Ok(())
    }

    /// Whether VDD is fed from VPP
    pub fn is_on_vpp(&self) -> bool {
        self.vdd_on_vpp
    }
}

/// Programming voltage generator
pub struct VppGenerator<'s, CTRL, R> {
    rail: RailControl<'s>,
    ctrl: CTRL,
    routes: BitBus<R>,
    output: bool,
}

impl<'s, CTRL: OutputPin, R: LineDriver> VppGenerator<'s, CTRL, R> {
    /// Take the output switch and the routing lines (A9, A18, CE, OE, WE
    /// at positions 0..5); everything starts off
    pub fn new(
        shared: &'s Shared,
        config: GeneratorConfig,
        mut ctrl: CTRL,
        routes: R,
    ) -> Result<Self> {
        ctrl.set_low().hw()?;
        let mut routes = BitBus::with_map(routes, &[0, 1, 2, 3, 4])?;
        routes.commit()?;
        Ok(Self {
            rail: RailControl::new(shared, Rail::Vpp, config),
            ctrl,
            routes,
            output: false,
        })
    }

    /// Voltage commands for this rail
    pub fn rail(&self) -> &RailControl<'s> {
        &self.rail
    }

    /// Connect VPP to the routing switches
    pub fn set_output(&mut self, on: bool) -> Result<()> {
        self.ctrl.set_state(on.into()).hw()?;
        self.output = on;
        Ok(())
    }

    /// Whether VPP is connected
    pub fn is_on(&self) -> bool {
        self.output
    }

    /// Route VPP to `route`
    pub fn set_route(&mut self, route: VppRoute, on: bool) -> Result<()> {
        self.routes.set_bit(route.index(), on)?;
        self.routes.commit()
    }

    /// Whether VPP is routed to `route`
    pub fn is_routed(&self, route: VppRoute) -> bool {
        self.routes.staged_bit(route.index()).unwrap_or(false)
    }

    /// Routed to A9
    pub fn is_on_a9(&self) -> bool {
        self.is_routed(VppRoute::A9)
    }

    /// Routed to A18
    pub fn is_on_a18(&self) -> bool {
        self.is_routed(VppRoute::A18)
    }

    /// Routed to CE
    pub fn is_on_ce(&self) -> bool {
        self.is_routed(VppRoute::Ce)
    }

    /// Routed to OE
    pub fn is_on_oe(&self) -> bool {
        self.is_routed(VppRoute::Oe)
    }

    /// Routed to WE
    pub fn is_on_we(&self) -> bool {
        self.is_routed(VppRoute::We)
    }
}

/// Both generators of a board
pub struct Generators<'s, VC, VO, PC, R> {
    /// Device supply
    pub vdd: VddGenerator<'s, VC, VO>,
    /// Programming supply
    pub vpp: VppGenerator<'s, PC, R>,
}

impl<'s, VC, VO, PC, R> Generators<'s, VC, VO, PC, R>
where
    VC: OutputPin,
    VO: OutputPin,
    PC: OutputPin,
    R: LineDriver,
{
    /// Bundle the two generators
    pub fn new(vdd: VddGenerator<'s, VC, VO>, vpp: VppGenerator<'s, PC, R>) -> Self {
        Self { vdd, vpp }
    }

    fn control(&self, rail: Rail) -> &RailControl<'s> {
        match rail {
            Rail::Vdd => self.vdd.rail(),
            Rail::Vpp => self.vpp.rail(),
        }
    }
}

impl<VC, VO, PC, R> Supplies for Generators<'_, VC, VO, PC, R>
where
    VC: OutputPin,
    VO: OutputPin,
    PC: OutputPin,
    R: LineDriver,
{
    fn start(&mut self, rail: Rail, volts: f32) -> Result<()> {
        self.control(rail).start(volts);
        Ok(())
    }

    fn set_voltage(&mut self, rail: Rail, volts: f32) -> Result<()> {
        self.control(rail).set_v(volts);
        Ok(())
    }

    fn stop(&mut self, rail: Rail) -> Result<()> {
        self.control(rail).stop();
        Ok(())
    }

    fn status(&self, rail: Rail) -> RegulatorStatus {
        self.control(rail).status()
    }

    fn wait_settled(&mut self, rail: Rail, delay: &mut dyn DelayNs) -> Result<()> {
        self.control(rail).wait_settled(delay)
    }

    fn set_output(&mut self, rail: Rail, on: bool) -> Result<()> {
        match rail {
            Rail::Vdd => self.vdd.set_output(on),
            Rail::Vpp => self.vpp.set_output(on),
        }
    }

    fn is_output_on(&self, rail: Rail) -> bool {
        match rail {
            Rail::Vdd => self.vdd.is_on(),
            Rail::Vpp => self.vpp.is_on(),
        }
    }

    fn set_vdd_on_vpp(&mut self, on: bool) -> Result<()> {
        self.vdd.set_on_vpp(on)
    }

    fn is_vdd_on_vpp(&self) -> bool {
        self.vdd.is_on_vpp()
    }

    fn set_vpp_route(&mut self, route: VppRoute, on: bool) -> Result<()> {
        self.vpp.set_route(route, on)
    }

    fn is_vpp_routed(&self, route: VppRoute) -> bool {
        self.vpp.is_routed(route)
    }

    fn calibration(&self, rail: Rail) -> f32 {
        self.control(rail).calibration()
    }

    fn set_calibration(&mut self, rail: Rail, offset: f32) -> Result<()> {
        self.control(rail).set_calibration(offset);
        Ok(())
    }

    fn begin_calibration(&mut self, rail: Rail) -> Result<()> {
        let control = *self.control(rail);
        control.set_calibration(0.0);
        control.start(control.config().nominal);
        self.set_output(rail, true)
    }

    fn finish_calibration(
        &mut self,
        rail: Rail,
        measured: f32,
        delay: &mut dyn DelayNs,
    ) -> Result<f32> {
        let control = *self.control(rail);
        let offset = measured - control.fresh_measurement(delay)?;
        control.set_calibration(offset);
        log::info!("generator: {:?} calibration offset {:+.3} V", rail, offset);
        self.set_output(rail, false)?;
        Ok(offset)
    }
}
