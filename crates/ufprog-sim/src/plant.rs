//! DC-DC converter plant behind the regulator's PWM and ADC
//!
//! The converter is modelled as ideal: output voltage follows the PWM duty
//! linearly up to `full_scale` volts at 100 %. The ADC sees the output
//! through the rail's divider, plus a fixed measurement error that
//! calibration is meant to cancel.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use embedded_hal::pwm::{self, ErrorType, SetDutyCycle};
use serde::{Deserialize, Serialize};
use ufprog_core::hal::AdcChannel;
use ufprog_core::regulator::RegulatorConfig;

/// PWM counts per period
const PWM_TOP: u16 = 1000;

/// Electrical model of one converter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlantConfig {
    /// Output voltage at 100 % duty
    pub full_scale: f32,
    /// Volts added to what the ADC sees
    pub adc_error: f32,
}

impl PlantConfig {
    /// VDD converter: 5 V at half duty
    pub fn vdd() -> Self {
        Self {
            full_scale: 10.0,
            adc_error: 0.0,
        }
    }

    /// VPP converter: 12 V at 60 % duty
    pub fn vpp() -> Self {
        Self {
            full_scale: 20.0,
            adc_error: 0.0,
        }
    }
}

#[derive(Debug)]
struct PlantState {
    config: PlantConfig,
    duty: AtomicU16,
    adc_failure: AtomicBool,
}

/// Shared handle on one converter
#[derive(Debug, Clone)]
pub struct Plant {
    state: Arc<PlantState>,
}

impl Plant {
    /// Converter at zero duty
    pub fn new(config: PlantConfig) -> Self {
        Self {
            state: Arc::new(PlantState {
                config,
                duty: AtomicU16::new(0),
                adc_failure: AtomicBool::new(false),
            }),
        }
    }

    /// Output voltage right now
    pub fn volts(&self) -> f32 {
        let duty = self.state.duty.load(Ordering::Relaxed) as f32 / PWM_TOP as f32;
        duty * self.state.config.full_scale
    }

    /// Duty in percent
    pub fn duty(&self) -> f32 {
        self.state.duty.load(Ordering::Relaxed) as f32 * 100.0 / PWM_TOP as f32
    }

    /// Make every ADC conversion fail until cleared
    pub fn fail_adc(&self, fail: bool) {
        self.state.adc_failure.store(fail, Ordering::Relaxed);
    }

    /// PWM output driving this converter
    pub fn pwm(&self) -> SimPwm {
        SimPwm {
            plant: self.clone(),
        }
    }

    /// ADC channel reading this converter through `regulator`'s divider
    pub fn adc(&self, regulator: &RegulatorConfig) -> SimAdc {
        SimAdc {
            plant: self.clone(),
            divider: regulator.divider,
            vref: regulator.adc_vref,
        }
    }
}

/// PWM slice of the simulated MCU
pub struct SimPwm {
    plant: Plant,
}

impl ErrorType for SimPwm {
    type Error = pwm::ErrorKind;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        PWM_TOP
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.plant
            .state
            .duty
            .store(duty.min(PWM_TOP), Ordering::Relaxed);
        Ok(())
    }
}

/// Conversion refused by an injected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcFault;

/// 12-bit ADC channel of the simulated MCU
pub struct SimAdc {
    plant: Plant,
    divider: f32,
    vref: f32,
}

impl AdcChannel for SimAdc {
    type Error = AdcFault;

    fn read_raw(&mut self) -> Result<u16, AdcFault> {
        let state = &self.plant.state;
        if state.adc_failure.load(Ordering::Relaxed) {
            return Err(AdcFault);
        }
        let volts = self.plant.volts() + state.config.adc_error;
        let counts = volts / self.divider / self.vref * self.full_scale() as f32;
        Ok(counts.round().clamp(0.0, (self.full_scale() - 1) as f32) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_to_volts() {
        let plant = Plant::new(PlantConfig::vdd());
        plant.pwm().set_duty_cycle(500).unwrap();
        assert!((plant.volts() - 5.0).abs() < 1e-4);
        assert!((plant.duty() - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_adc_through_divider() {
        let plant = Plant::new(PlantConfig::vpp());
        let regulator = RegulatorConfig::vpp();
        plant.pwm().set_duty_cycle(600).unwrap();
        let raw = plant.adc(&regulator).read_raw().unwrap();
        let back = regulator.volts(raw as f32, 4096, 0.0);
        assert!((back - 12.0).abs() < 0.05);
    }

    #[test]
    fn test_adc_failure() {
        let plant = Plant::new(PlantConfig::vdd());
        plant.fail_adc(true);
        assert_eq!(plant.adc(&RegulatorConfig::vdd()).read_raw(), Err(AdcFault));
    }
}
