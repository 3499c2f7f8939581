//! Board configuration file
//!
//! A TOML file describing the simulated board. Every key is optional: the
//! file is merged over the reference board, so a file holding only
//! `[vpp.plant] adc_error = 0.3` is complete.
//!
//! ```toml
//! tick_period_us = 200
//! frame_timeout_ms = 50
//!
//! [vpp.regulator]
//! fast_step = 2.0
//!
//! [vpp.plant]
//! adc_error = 0.3
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use ufprog_core::generator::GeneratorConfig;
use ufprog_core::regulator::RegulatorConfig;
use ufprog_core::scheduler::TICK_PERIOD_US;

use crate::error::{Result, SimError};
use crate::plant::PlantConfig;

/// Everything about one rail
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RailConfig {
    /// Control loop tuning and ADC divider
    pub regulator: RegulatorConfig,
    /// Nominal voltage and settle wait
    pub generator: GeneratorConfig,
    /// Simulated converter
    pub plant: PlantConfig,
}

/// Simulated board
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Device supply
    pub vdd: RailConfig,
    /// Programming supply
    pub vpp: RailConfig,
    /// Regulator loop period
    pub tick_period_us: u32,
    /// Read timeout of the command transport, also the frame payload timeout
    pub frame_timeout_ms: u32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            vdd: RailConfig {
                regulator: RegulatorConfig::vdd(),
                generator: GeneratorConfig::vdd(),
                plant: PlantConfig::vdd(),
            },
            vpp: RailConfig {
                regulator: RegulatorConfig::vpp(),
                generator: GeneratorConfig::vpp(),
                plant: PlantConfig::vpp(),
            },
            tick_period_us: TICK_PERIOD_US,
            frame_timeout_ms: 50,
        }
    }
}

impl BoardConfig {
    /// Parse a TOML document over the defaults
    pub fn from_toml(text: &str) -> Result<Self> {
        let overrides: toml::Value =
            toml::from_str(text).map_err(|e| SimError::Config(e.to_string()))?;
        let mut merged =
            toml::Value::try_from(Self::default()).map_err(|e| SimError::Config(e.to_string()))?;
        merge(&mut merged, overrides);
        let config: Self = merged
            .try_into()
            .map_err(|e: toml::de::Error| SimError::Config(e.to_string()))?;
        log::debug!("config: {:?}", config);
        Ok(config)
    }

    /// Load a TOML file over the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    /// Configuration of `rail`
    pub fn rail(&self, rail: ufprog_core::regulator::Rail) -> &RailConfig {
        match rail {
            ufprog_core::regulator::Rail::Vdd => &self.vdd,
            ufprog_core::regulator::Rail::Vpp => &self.vpp,
        }
    }
}

fn merge(base: &mut toml::Value, overrides: toml::Value) {
    match (base, overrides) {
        (toml::Value::Table(base), toml::Value::Table(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_reference_board() {
        assert_eq!(BoardConfig::from_toml("").unwrap(), BoardConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = BoardConfig::from_toml(
            "frame_timeout_ms = 80\n[vpp.plant]\nadc_error = 0.3\n[vpp.regulator]\nfast_step = 2.0\n",
        )
        .unwrap();
        assert_eq!(config.frame_timeout_ms, 80);
        assert_eq!(config.vpp.plant.adc_error, 0.3);
        assert_eq!(config.vpp.plant.full_scale, 20.0);
        assert_eq!(config.vpp.regulator.fast_step, 2.0);
        assert_eq!(config.vpp.regulator.divider, RegulatorConfig::vpp().divider);
        assert_eq!(config.vdd, BoardConfig::default().vdd);
    }

    #[test]
    fn test_bad_type_is_rejected() {
        let err = BoardConfig::from_toml("tick_period_us = \"fast\"").unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[vdd.generator]\nnominal = 3.3").unwrap();
        let config = BoardConfig::load(file.path()).unwrap();
        assert_eq!(config.vdd.generator.nominal, 3.3);
    }
}
