//! Regulator loop (Context A)
//!
//! Ticks both DC-DC converters at a fixed period. On the board this runs on
//! its own core or a timer interrupt; in the simulator on a std thread. The
//! only thing it shares with the dispatcher is [`Shared`].

use crate::error::Result;
use crate::hal::{AdcChannel, DelayNs, Monotonic, SetDutyCycle};
use crate::regulator::{Dc2Dc, Rail};
use crate::shared::Shared;

/// Default control period
pub const TICK_PERIOD_US: u32 = 200;

/// Both regulators and their tick schedule
pub struct RegulatorLoop<'s, VP, VA, PP, PA> {
    shared: &'s Shared,
    vdd: Dc2Dc<VP, VA>,
    vpp: Dc2Dc<PP, PA>,
    period_us: u32,
    ticks: u64,
    overruns: u64,
}

impl<'s, VP, VA, PP, PA> RegulatorLoop<'s, VP, VA, PP, PA>
where
    VP: SetDutyCycle,
    VA: AdcChannel,
    PP: SetDutyCycle,
    PA: AdcChannel,
{
    /// Loop over the VDD and VPP converters at [`TICK_PERIOD_US`]
    pub fn new(shared: &'s Shared, vdd: Dc2Dc<VP, VA>, vpp: Dc2Dc<PP, PA>) -> Self {
        Self {
            shared,
            vdd,
            vpp,
            period_us: TICK_PERIOD_US,
            ticks: 0,
            overruns: 0,
        }
    }

    /// Change the control period
    pub fn with_period(mut self, period_us: u32) -> Self {
        self.period_us = period_us.max(1);
        self
    }

    /// Control period in microseconds
    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks that ended past their deadline
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// One period for both rails
    ///
    /// A failing rail does not keep the other from being ticked; the first
    /// error is returned after both ran.
    pub fn tick(&mut self) -> Result<()> {
        self.ticks += 1;
        let vdd = self.vdd.tick(self.shared, Rail::Vdd);
        let vpp = self.vpp.tick(self.shared, Rail::Vpp);
        vdd.and(vpp)
    }

    /// Tick on schedule while `keep_running` says so
    ///
    /// Deadlines are absolute, so a slow tick shortens the next wait instead
    /// of shifting the schedule. A tick that ends past its deadline restarts
    /// the schedule from now.
    pub fn run(
        &mut self,
        clock: &impl Monotonic,
        delay: &mut impl DelayNs,
        keep_running: impl Fn() -> bool,
    ) {
        log::debug!("scheduler: regulator loop at {} us", self.period_us);
        let period = self.period_us as u64;
        let mut deadline = clock.now_us() + period;
        while keep_running() {
            if let Err(e) = self.tick() {
                // The regulator already latched the fault and raised abort
                log::trace!("scheduler: tick failed: {}", e);
            }
            let now = clock.now_us();
            if now < deadline {
                delay.delay_us((deadline - now) as u32);
                deadline += period;
            } else {
                self.overruns += 1;
                deadline = now + period;
            }
        }
        log::debug!("scheduler: stopped after {} ticks", self.ticks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock::{MockPwm, PlantAdc};
    use crate::regulator::{Fault, Phase, RegulatorConfig};
    use std::cell::Cell;
    use std::rc::Rc;

    fn plant(config: &RegulatorConfig, gain: f32) -> (MockPwm, PlantAdc<'static>) {
        let pwm = MockPwm::new(1000);
        let adc = PlantAdc::new(&pwm, gain, config.divider, config.adc_vref);
        (pwm, adc)
    }

    fn config(base: RegulatorConfig) -> RegulatorConfig {
        RegulatorConfig {
            oversample: 1,
            ..base
        }
    }

    /// Clock advanced only by [`StepDelay`]
    struct StepClock(Rc<Cell<u64>>);

    impl Monotonic for StepClock {
        fn now_us(&self) -> u64 {
            self.0.get()
        }
    }

    struct StepDelay(Rc<Cell<u64>>);

    impl DelayNs for StepDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.0.set(self.0.get() + (ns as u64).div_ceil(1000));
        }
    }

    #[test]
    fn test_both_rails_settle() {
        let shared = Shared::new();
        let (vdd_cfg, vpp_cfg) = (config(RegulatorConfig::vdd()), config(RegulatorConfig::vpp()));
        let (vdd_pwm, vdd_adc) = plant(&vdd_cfg, 0.2);
        let (vpp_pwm, vpp_adc) = plant(&vpp_cfg, 0.3);
        let mut sched = RegulatorLoop::new(
            &shared,
            Dc2Dc::new(vdd_cfg, vdd_pwm, vdd_adc),
            Dc2Dc::new(vpp_cfg, vpp_pwm, vpp_adc),
        );

        shared.with(|s| {
            s.vdd.start(5.0);
            s.vpp.start(12.0);
        });
        for _ in 0..500 {
            sched.tick().unwrap();
        }
        assert_eq!(shared.status(Rail::Vdd).phase, Phase::Settled);
        assert_eq!(shared.status(Rail::Vpp).phase, Phase::Settled);
        assert!((shared.status(Rail::Vpp).measured - 12.0).abs() <= 12.0 * 0.05);
        assert_eq!(sched.ticks(), 500);
    }

    #[test]
    fn test_failing_rail_does_not_stall_the_other() {
        let shared = Shared::new();
        let (vdd_cfg, vpp_cfg) = (config(RegulatorConfig::vdd()), config(RegulatorConfig::vpp()));
        let (vdd_pwm, vdd_adc) = plant(&vdd_cfg, 0.2);
        let (vpp_pwm, vpp_adc) = plant(&vpp_cfg, 0.3);
        vdd_adc.failure().set(true);
        let mut sched = RegulatorLoop::new(
            &shared,
            Dc2Dc::new(vdd_cfg, vdd_pwm, vdd_adc),
            Dc2Dc::new(vpp_cfg, vpp_pwm.clone(), vpp_adc),
        );

        shared.with(|s| {
            s.vdd.start(5.0);
            s.vpp.start(12.0);
        });
        assert_eq!(sched.tick(), Err(Error::Hardware));
        assert_eq!(shared.status(Rail::Vdd).fault, Some(Fault::Hardware));
        assert!(vpp_pwm.raw() > 0);
        assert!(shared.is_aborted());
    }

    #[test]
    fn test_run_keeps_period() {
        let shared = Shared::new();
        let (vdd_cfg, vpp_cfg) = (config(RegulatorConfig::vdd()), config(RegulatorConfig::vpp()));
        let (vdd_pwm, vdd_adc) = plant(&vdd_cfg, 0.2);
        let (vpp_pwm, vpp_adc) = plant(&vpp_cfg, 0.3);
        let mut sched = RegulatorLoop::new(
            &shared,
            Dc2Dc::new(vdd_cfg, vdd_pwm, vdd_adc),
            Dc2Dc::new(vpp_cfg, vpp_pwm, vpp_adc),
        );

        let now = Rc::new(Cell::new(0));
        let clock = StepClock(now.clone());
        let mut delay = StepDelay(now.clone());
        sched.run(&clock, &mut delay, || now.get() < 10 * TICK_PERIOD_US as u64);
        assert_eq!(sched.ticks(), 10);
        assert_eq!(sched.overruns(), 0);
        assert_eq!(now.get(), 2000);
    }
}
