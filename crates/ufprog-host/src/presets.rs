//! Device presets
//!
//! A preset names a part and fills in a [`DeviceConfig`]: family defaults
//! first, then whatever the preset overrides. Presets live in RON files, one
//! group of related parts per file:
//!
//! ```ron
//! (
//!     group: "EPROM",
//!     devices: [
//!         (name: "27C256", family: Eprom, size: KiB(32)),
//!         (name: "2764", family: Eprom, size: KiB(8), twp_us: Some(50000), vpp: Some(21.0)),
//!     ],
//! )
//! ```
//!
//! The files under `devices/` are compiled in and available through
//! [`PresetDb::builtin`].

use std::fs;
use std::path::Path;

use serde::Deserialize;
use ufprog_core::device::{DeviceConfig, DeviceFlags, Family};

use crate::error::{HostError, Result};

const BUILTIN: &[(&str, &str)] = &[
    ("sram.ron", include_str!("../devices/sram.ron")),
    ("eprom.ron", include_str!("../devices/eprom.ron")),
    ("eeprom.ron", include_str!("../devices/eeprom.ron")),
    ("flash.ron", include_str!("../devices/flash.ron")),
    ("serial.ron", include_str!("../devices/serial.ron")),
];

/// Size in cells, with readable units
///
/// For 16-bit devices a cell is one word, so `KiB(64)` is 64 Ki words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Size {
    /// Cells
    B(u32),
    /// Kibi-cells
    KiB(u32),
    /// Mebi-cells
    MiB(u32),
}

impl Size {
    /// Number of cells
    pub fn cells(self) -> u32 {
        match self {
            Size::B(n) => n,
            Size::KiB(n) => n * 1024,
            Size::MiB(n) => n * 1024 * 1024,
        }
    }
}

/// One algorithm switch, by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Flag {
    /// Leave erased-value cells alone
    SkipFf,
    /// VPP on around program pulses
    ProgWithVpp,
    /// OE pin is the VPP pin
    VppOePin,
    /// WE line drives PGM/CE
    PgmCePin,
    /// Active-high program pulse
    PgmPositive,
    /// 16-bit data bus
    Is16Bit,
    /// Fast program timings
    FastMode,
}

impl Flag {
    fn bits(self) -> DeviceFlags {
        match self {
            Flag::SkipFf => DeviceFlags::SKIP_FF,
            Flag::ProgWithVpp => DeviceFlags::PROG_WITH_VPP,
            Flag::VppOePin => DeviceFlags::VPP_OE_PIN,
            Flag::PgmCePin => DeviceFlags::PGM_CE_PIN,
            Flag::PgmPositive => DeviceFlags::PGM_POSITIVE,
            Flag::Is16Bit => DeviceFlags::IS_16BIT,
            Flag::FastMode => DeviceFlags::FAST_MODE,
        }
    }
}

/// A named part
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Preset {
    /// Part number
    pub name: String,
    /// Algorithm family
    pub family: Family,
    /// Size in cells
    pub size: Size,
    /// Sector erase size (SPI flash only)
    #[serde(default)]
    pub sector_size: Option<Size>,
    /// Flags added to the family defaults
    #[serde(default)]
    pub flags: Vec<Flag>,
    /// Manufacturer and device ID, if the part has one
    #[serde(default)]
    pub id: Option<(u16, u16)>,
    /// Program pulse override, microseconds
    #[serde(default)]
    pub twp_us: Option<u32>,
    /// Write cycle override, microseconds
    #[serde(default)]
    pub twc_us: Option<u32>,
    /// VDD override while reading
    #[serde(default)]
    pub vdd_read: Option<f32>,
    /// VDD override while programming
    #[serde(default)]
    pub vdd_program: Option<f32>,
    /// VPP override
    #[serde(default)]
    pub vpp: Option<f32>,
}

impl Preset {
    /// Configuration to send to the board
    pub fn config(&self) -> DeviceConfig {
        let mut config = DeviceConfig::new(self.family, self.size.cells());
        if let Some(sector_size) = self.sector_size {
            config.sector_size = sector_size.cells();
        }
        for flag in &self.flags {
            config.flags |= flag.bits();
        }
        if let Some(twp_us) = self.twp_us {
            config.twp_us = twp_us;
        }
        if let Some(twc_us) = self.twc_us {
            config.twc_us = twc_us;
        }
        if let Some(volts) = self.vdd_read {
            config.vdd_read = volts;
        }
        if let Some(volts) = self.vdd_program {
            config.vdd_program = volts;
        }
        if let Some(volts) = self.vpp {
            config.vpp = volts;
        }
        config
    }
}

#[derive(Debug, Deserialize)]
struct PresetFile {
    group: String,
    devices: Vec<Preset>,
}

/// A set of presets, grouped the way the files group them
#[derive(Debug, Clone, Default)]
pub struct PresetDb {
    groups: Vec<(String, Vec<Preset>)>,
}

impl PresetDb {
    /// Presets shipped with the crate
    pub fn builtin() -> Result<Self> {
        let mut db = Self::default();
        for (file, content) in BUILTIN {
            db.add(file, content)?;
        }
        Ok(db)
    }

    /// Add every `.ron` file in `dir`; returns the number of presets added
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "ron") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut count = 0;
        for path in paths {
            count += self.load_file(&path)?;
        }
        Ok(count)
    }

    /// Add the presets in one file; returns how many it held
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path)?;
        self.add(&path.display().to_string(), &content)
    }

    fn add(&mut self, origin: &str, content: &str) -> Result<usize> {
        let file: PresetFile = ron::from_str(content)
            .map_err(|e| HostError::Preset(format!("{}: {}", origin, e)))?;
        for preset in &file.devices {
            preset
                .config()
                .validate()
                .map_err(|e| HostError::Preset(format!("{}: {}: {}", origin, preset.name, e)))?;
        }
        log::debug!(
            "presets: {} devices in group {} from {}",
            file.devices.len(),
            file.group,
            origin
        );
        let count = file.devices.len();
        self.groups.push((file.group, file.devices));
        Ok(count)
    }

    /// Case-insensitive lookup; later files override earlier ones
    pub fn find(&self, name: &str) -> Option<&Preset> {
        self.iter()
            .filter(|(_, p)| p.name.eq_ignore_ascii_case(name))
            .map(|(_, p)| p)
            .last()
    }

    /// Every preset with its group name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Preset)> {
        self.groups
            .iter()
            .flat_map(|(group, presets)| presets.iter().map(move |p| (group.as_str(), p)))
    }

    /// Number of presets
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, p)| p.len()).sum()
    }

    /// True when no preset is loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
