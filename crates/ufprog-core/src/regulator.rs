//! Closed-loop DC-DC regulation (Dc2Dc)
//!
//! Each rail is a PWM-driven converter whose output is read back through a
//! resistor divider into an ADC channel. The control law is a dual-step
//! integrator: a coarse step while the error is large, a fine step once it
//! is close, with duty clamped to the configured window.
//!
//! ## State machine
//!
//! ```text
//!            start / set_v            |error| <= tolerance
//!   Idle ----------------> Regulating --------------------> Settled
//!    ^                          ^                              |
//!    |                          +------------------------------+
//!    |                               |error| > tolerance
//!    +--- stop, timeout, ADC failure (duty forced to 0) -------+
//! ```
//!
//! The commanded part of [`RegulatorState`] is written by the dispatcher
//! context through [`Shared`]; only [`Dc2Dc::tick`] writes the measured
//! part.

use crate::error::{Error, Result};
use crate::hal::{AdcChannel, HwResult, SetDutyCycle};
use crate::shared::Shared;

/// One of the two supply rails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum Rail {
    /// Device supply voltage
    Vdd,
    /// Programming voltage
    Vpp,
}

/// Regulation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    /// Not regulating, duty 0
    Idle,
    /// Converging on the target
    Regulating,
    /// Within tolerance on the last tick
    Settled,
}

/// Latched reason the loop stopped on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum Fault {
    /// Settle tick bound exceeded
    Timeout,
    /// ADC or PWM access failed
    Hardware,
}

impl Fault {
    /// Error reported to callers waiting on the rail
    pub fn error(self) -> Error {
        match self {
            Self::Timeout => Error::RegulationTimeout,
            Self::Hardware => Error::Hardware,
        }
    }
}

/// Static tuning of one regulator
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct RegulatorConfig {
    /// PWM carrier frequency, applied by the board when it sets up the slice
    pub pwm_freq_hz: u32,
    /// ADC reference voltage
    pub adc_vref: f32,
    /// Divider ratio from rail to ADC pin (Vrail / Vpin)
    pub divider: f32,
    /// Lowest duty, percent
    pub min_duty: f32,
    /// Highest duty, percent
    pub max_duty: f32,
    /// Duty change per tick near the target, percent
    pub slow_step: f32,
    /// Duty change per tick far from the target, percent
    pub fast_step: f32,
    /// Error above `target * to_fast` uses the fast step
    pub to_fast: f32,
    /// Error within `target * tolerance` counts as settled
    pub tolerance: f32,
    /// Consecutive unsettled ticks before the loop gives up
    pub settle_ticks: u32,
    /// ADC conversions averaged per measurement
    pub oversample: u8,
}

impl RegulatorConfig {
    /// VDD rail of the reference board (470k/330k divider)
    pub fn vdd() -> Self {
        Self {
            divider: (470.0 + 330.0) / 330.0,
            ..Self::base()
        }
    }

    /// VPP rail of the reference board (3k9/470 divider)
    pub fn vpp() -> Self {
        Self {
            divider: (3900.0 + 470.0) / 470.0,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            pwm_freq_hz: 40_000,
            adc_vref: 3.3,
            divider: 1.0,
            min_duty: 0.0,
            max_duty: 95.0,
            slow_step: 0.1,
            fast_step: 1.0,
            to_fast: 0.1,
            tolerance: 0.05,
            settle_ticks: 5000,
            oversample: 16,
        }
    }

    /// Convert an averaged raw reading to rail volts
    pub fn volts(&self, raw: f32, full_scale: u32, calibration: f32) -> f32 {
        raw * self.adc_vref / full_scale as f32 * self.divider + calibration
    }

    /// One step of the control law
    pub fn correct(&self, target: f32, measured: f32, duty: f32) -> Correction {
        let error = target - measured;
        let magnitude = if error < 0.0 { -error } else { error };
        let step = if magnitude > target * self.to_fast {
            self.fast_step
        } else {
            self.slow_step
        };
        let next = if error > 0.0 {
            duty + step
        } else if error < 0.0 {
            duty - step
        } else {
            duty
        };
        Correction {
            duty: next.clamp(self.min_duty, self.max_duty),
            settled: magnitude <= target * self.tolerance,
        }
    }
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self::vdd()
    }
}

/// Result of [`RegulatorConfig::correct`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    /// Duty for the next period, percent
    pub duty: f32,
    /// Measurement was within tolerance
    pub settled: bool,
}

/// Live state of one regulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegulatorState {
    /// Commanded voltage
    pub target: f32,
    /// Loop is commanded to run
    pub running: bool,
    /// Bumped on every command, so a tick can detect it raced one
    pub epoch: u32,
    /// Last measured voltage
    pub measured: f32,
    /// `measured` was sampled after the last command
    pub fresh: bool,
    /// Current duty, percent
    pub duty: f32,
    /// Current phase
    pub phase: Phase,
    /// Latched fault, cleared by the next start or set_v
    pub fault: Option<Fault>,
    /// Consecutive ticks outside tolerance
    pub unsettled_ticks: u32,
}

impl RegulatorState {
    /// Idle, zero target
    pub const fn new() -> Self {
        Self {
            target: 0.0,
            running: false,
            epoch: 0,
            measured: 0.0,
            fresh: false,
            duty: 0.0,
            phase: Phase::Idle,
            fault: None,
            unsettled_ticks: 0,
        }
    }

    /// Set the target and begin regulating
    pub fn start(&mut self, target: f32) {
        self.set_v(target);
        self.running = true;
        self.phase = Phase::Regulating;
    }

    /// Change the target; keeps the loop running if it was
    ///
    /// Negative (and NaN) targets clamp to 0.
    pub fn set_v(&mut self, target: f32) {
        self.target = if target > 0.0 { target } else { 0.0 };
        self.fault = None;
        self.unsettled_ticks = 0;
        if self.running {
            self.phase = Phase::Regulating;
        }
        self.invalidate();
    }

    /// Stop regulating; duty drops to 0 on the next tick
    pub fn stop(&mut self) {
        self.running = false;
        self.phase = Phase::Idle;
        self.duty = 0.0;
        self.unsettled_ticks = 0;
        self.invalidate();
    }

    /// Drop any tick in flight and mark `measured` stale
    pub fn invalidate(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.fresh = false;
    }

    /// Stop and latch a fault
    pub fn fail(&mut self, fault: Fault) {
        self.stop();
        self.fault = Some(fault);
    }

    /// Read-only copy for the protocol layer
    pub fn status(&self) -> RegulatorStatus {
        RegulatorStatus {
            phase: self.phase,
            fault: self.fault,
            target: self.target,
            measured: self.measured,
            duty: self.duty,
        }
    }
}

impl Default for RegulatorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a regulator, as reported to the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegulatorStatus {
    /// Current phase
    pub phase: Phase,
    /// Latched fault, if the loop stopped on its own
    pub fault: Option<Fault>,
    /// Commanded voltage
    pub target: f32,
    /// Last measured voltage
    pub measured: f32,
    /// Current duty, percent
    pub duty: f32,
}

/// PWM + ADC pair of one rail, ticked from the regulator context
pub struct Dc2Dc<P, A> {
    config: RegulatorConfig,
    pwm: P,
    adc: A,
    applied: Option<f32>,
}

impl<P: SetDutyCycle, A: AdcChannel> Dc2Dc<P, A> {
    /// Bind a PWM output and an ADC channel
    pub fn new(config: RegulatorConfig, pwm: P, adc: A) -> Self {
        Self {
            config,
            pwm,
            adc,
            applied: None,
        }
    }

    /// Tuning in use
    pub fn config(&self) -> &RegulatorConfig {
        &self.config
    }

    /// Averaged rail voltage
    pub fn measure(&mut self, calibration: f32) -> Result<f32> {
        let samples = self.config.oversample.max(1) as u32;
        let mut sum = 0u32;
        for _ in 0..samples {
            sum += self.adc.read_raw().hw()? as u32;
        }
        let raw = sum as f32 / samples as f32;
        Ok(self.config.volts(raw, self.adc.full_scale(), calibration))
    }

    /// Program the PWM with `duty` percent
    pub fn apply(&mut self, duty: f32) -> Result<()> {
        if self.applied == Some(duty) {
            return Ok(());
        }
        let max = self.pwm.max_duty_cycle() as f32;
        let raw = (duty.clamp(0.0, 100.0) * max / 100.0 + 0.5) as u16;
        self.pwm.set_duty_cycle(raw).hw()?;
        self.applied = Some(duty);
        Ok(())
    }

    /// One control period for `rail`
    ///
    /// The ADC is sampled outside the shared lock. If a command arrived in
    /// the meantime the result is dropped and the next tick starts over.
    pub fn tick(&mut self, shared: &Shared, rail: Rail) -> Result<()> {
        let (snapshot, calibration) =
            shared.with(|s| (*s.rail(rail), s.calibration.get(rail)));

        let measured = match self.measure(calibration) {
            Ok(volts) => volts,
            Err(e) => {
                log::error!("dc2dc: {:?} ADC read failed, forcing idle", rail);
                shared.with(|s| s.rail_mut(rail).fail(Fault::Hardware));
                shared.abort();
                if let Err(pwm) = self.apply(0.0) {
                    log::warn!("dc2dc: {:?} PWM off failed too: {}", rail, pwm);
                }
                return Err(e);
            }
        };

        let config = self.config;
        let duty = shared.with(|s| {
            let state = s.rail_mut(rail);
            if state.epoch != snapshot.epoch {
                return None;
            }
            state.measured = measured;
            state.fresh = true;
            if !state.running {
                state.duty = 0.0;
                return Some(0.0);
            }
            let correction = config.correct(state.target, measured, state.duty);
            state.duty = correction.duty;
            if correction.settled {
                state.phase = Phase::Settled;
                state.unsettled_ticks = 0;
            } else {
                state.phase = Phase::Regulating;
                state.unsettled_ticks += 1;
                if state.unsettled_ticks > config.settle_ticks {
                    log::warn!(
                        "dc2dc: {:?} did not settle at {:.2} V (measured {:.2} V)",
                        rail,
                        state.target,
                        measured
                    );
                    state.fail(Fault::Timeout);
                }
            }
            Some(state.duty)
        });

        match duty {
            Some(duty) => self.apply(duty),
            None => {
                log::trace!("dc2dc: {:?} tick raced a command, dropped", rail);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPwm, PlantAdc};

    fn config() -> RegulatorConfig {
        RegulatorConfig {
            oversample: 1,
            ..RegulatorConfig::vdd()
        }
    }

    #[test]
    fn test_fast_step_far_from_target() {
        let c = config();
        let up = c.correct(5.0, 2.0, 10.0);
        assert_eq!(up.duty, 11.0);
        assert!(!up.settled);

        let down = c.correct(5.0, 8.0, 10.0);
        assert_eq!(down.duty, 9.0);
    }

    #[test]
    fn test_slow_step_near_target() {
        let c = config();
        let near = c.correct(5.0, 4.8, 20.0);
        assert!((near.duty - 20.1).abs() < 1e-4);
        assert!(near.settled);

        // Outside tolerance but under the fast threshold
        let mid = c.correct(5.0, 5.4, 20.0);
        assert!((mid.duty - 19.9).abs() < 1e-4);
        assert!(!mid.settled);
    }

    #[test]
    fn test_zero_error_holds_duty() {
        let c = config();
        assert_eq!(c.correct(5.0, 5.0, 30.0).duty, 30.0);
    }

    #[test]
    fn test_duty_clamped() {
        let c = config();
        assert_eq!(c.correct(12.0, 0.0, 94.5).duty, 95.0);
        assert_eq!(c.correct(5.0, 12.0, 0.5).duty, 0.0);
    }

    #[test]
    fn test_negative_target_clamps_to_zero() {
        let mut state = RegulatorState::new();
        state.set_v(-3.0);
        assert_eq!(state.target, 0.0);
    }

    #[test]
    fn test_converges_and_settles() {
        let shared = Shared::new();
        let pwm = MockPwm::new(1000);
        let adc = PlantAdc::new(&pwm, 0.2, config().divider, config().adc_vref);
        let mut dc2dc = Dc2Dc::new(config(), pwm.clone(), adc);

        shared.with(|s| s.vdd.start(5.0));
        for _ in 0..200 {
            dc2dc.tick(&shared, Rail::Vdd).unwrap();
        }
        let status = shared.status(Rail::Vdd);
        assert_eq!(status.phase, Phase::Settled);
        assert!((status.measured - 5.0).abs() <= 5.0 * 0.05);
        assert!(pwm.raw() > 0);
    }

    #[test]
    fn test_set_v_twice_matches_once() {
        let run = |times: usize| {
            let shared = Shared::new();
            let pwm = MockPwm::new(1000);
            let adc = PlantAdc::new(&pwm, 0.2, config().divider, config().adc_vref);
            let mut dc2dc = Dc2Dc::new(config(), pwm, adc);
            shared.with(|s| s.vdd.start(3.0));
            for _ in 0..times {
                shared.with(|s| s.vdd.set_v(4.0));
            }
            for _ in 0..300 {
                dc2dc.tick(&shared, Rail::Vdd).unwrap();
            }
            shared.status(Rail::Vdd)
        };
        let once = run(1);
        let twice = run(2);
        assert_eq!(once.phase, Phase::Settled);
        assert_eq!(once.duty, twice.duty);
        assert_eq!(once.measured, twice.measured);
    }

    #[test]
    fn test_timeout_forces_idle() {
        let shared = Shared::new();
        let pwm = MockPwm::new(1000);
        // Plant can never exceed 95% * 0.01 V
        let adc = PlantAdc::new(&pwm, 0.01, config().divider, config().adc_vref);
        let cfg = RegulatorConfig {
            settle_ticks: 10,
            ..config()
        };
        let mut dc2dc = Dc2Dc::new(cfg, pwm.clone(), adc);

        shared.with(|s| s.vdd.start(5.0));
        for _ in 0..10 {
            dc2dc.tick(&shared, Rail::Vdd).unwrap();
        }
        assert_eq!(shared.status(Rail::Vdd).phase, Phase::Regulating);

        dc2dc.tick(&shared, Rail::Vdd).unwrap();
        let status = shared.status(Rail::Vdd);
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.fault, Some(Fault::Timeout));
        assert_eq!(status.duty, 0.0);
        assert_eq!(pwm.raw(), 0);
    }

    #[test]
    fn test_stop_zeroes_duty() {
        let shared = Shared::new();
        let pwm = MockPwm::new(1000);
        let adc = PlantAdc::new(&pwm, 0.2, config().divider, config().adc_vref);
        let mut dc2dc = Dc2Dc::new(config(), pwm.clone(), adc);

        shared.with(|s| s.vdd.start(5.0));
        for _ in 0..5 {
            dc2dc.tick(&shared, Rail::Vdd).unwrap();
        }
        assert!(pwm.raw() > 0);

        shared.with(|s| s.vdd.stop());
        dc2dc.tick(&shared, Rail::Vdd).unwrap();
        assert_eq!(pwm.raw(), 0);
        assert_eq!(shared.status(Rail::Vdd).phase, Phase::Idle);
    }

    #[test]
    fn test_tick_racing_stop_is_dropped() {
        let shared = Shared::new();
        let pwm = MockPwm::new(1000);
        let adc = PlantAdc::new(&pwm, 0.2, config().divider, config().adc_vref)
            .on_read(|| shared.with(|s| s.vdd.stop()));
        let mut dc2dc = Dc2Dc::new(config(), pwm.clone(), adc);

        shared.with(|s| s.vdd.start(5.0));
        dc2dc.tick(&shared, Rail::Vdd).unwrap();

        // The stop landed mid-tick; its result must not be overwritten
        let status = shared.status(Rail::Vdd);
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.duty, 0.0);
        assert_eq!(pwm.raw(), 0);
    }

    #[test]
    fn test_adc_failure_aborts() {
        let shared = Shared::new();
        let pwm = MockPwm::new(1000);
        let adc = PlantAdc::new(&pwm, 0.2, config().divider, config().adc_vref);
        let fail = adc.failure();
        let mut dc2dc = Dc2Dc::new(config(), pwm.clone(), adc);

        shared.with(|s| s.vdd.start(5.0));
        dc2dc.tick(&shared, Rail::Vdd).unwrap();
        fail.set(true);
        assert_eq!(dc2dc.tick(&shared, Rail::Vdd), Err(Error::Hardware));

        let status = shared.status(Rail::Vdd);
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.fault, Some(Fault::Hardware));
        assert_eq!(pwm.raw(), 0);
        assert!(shared.is_aborted());
    }

    #[test]
    fn test_adc_failure_reported_when_pwm_fails_too() {
        let shared = Shared::new();
        let pwm = MockPwm::new(1000);
        let adc = PlantAdc::new(&pwm, 0.2, config().divider, config().adc_vref);
        let adc_fail = adc.failure();
        let mut dc2dc = Dc2Dc::new(config(), pwm.clone(), adc);

        shared.with(|s| s.vdd.start(5.0));
        dc2dc.tick(&shared, Rail::Vdd).unwrap();
        let writes = pwm.writes();
        adc_fail.set(true);
        pwm.failure().set(true);

        assert_eq!(dc2dc.tick(&shared, Rail::Vdd), Err(Error::Hardware));
        // Still tried to switch the converter off
        assert_eq!(pwm.writes(), writes + 1);
        assert_eq!(shared.status(Rail::Vdd).fault, Some(Fault::Hardware));
        assert!(shared.is_aborted());
    }

    #[test]
    fn test_calibration_offset_applied() {
        let c = config();
        let raw = 1000.0;
        let plain = c.volts(raw, 4096, 0.0);
        assert!((c.volts(raw, 4096, 0.25) - plain - 0.25).abs() < 1e-5);
    }
}
