//! Parallel-bus memories: SRAM, EPROM, 28C EEPROM and 28F flash

use ufprog_core::generator::VppRoute;

use super::{Chip, Drive};
use crate::socket::Pins;

/// Status byte of an I28F-style part after a successful write
const STATUS_READY: u16 = 0x80;

/// How a parallel part reacts to write cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelKind {
    /// Every write cycle stores its data
    Sram,
    /// Program pulses with VPP up clear bits
    Eprom,
    /// Like [`ParallelKind::Eprom`]; a pulse with VPP on A9 erases the part
    Eprom27E,
    /// Byte writes guarded by software data protection
    Eeprom28C {
        /// The two command addresses (0x1555/0x0AAA or 0x5555/0x2AAA)
        unlock: (u32, u32),
    },
    /// Command-driven flash
    Flash28F {
        /// Program and erase only happen with VPP up
        needs_vpp: bool,
        /// Reads return a status byte after program and erase
        status: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Program,
    EraseSetup,
    Id,
    Status,
}

/// Byte- or word-wide memory on the address, data and control lines
pub struct ParallelChip {
    kind: ParallelKind,
    wide: bool,
    mem: Vec<u16>,
    id: (u16, u16),
    positive_pulse: bool,
    protected: bool,
    armed: bool,
    held: Vec<(u32, u16)>,
    mode: Mode,
    write_cycles: u32,
    last: Pins,
}

impl ParallelChip {
    /// Erased part of `cells` cells
    pub fn new(kind: ParallelKind, cells: usize) -> Self {
        Self {
            kind,
            wide: false,
            mem: vec![0xFFFF; cells],
            id: (0xFF, 0xFF),
            positive_pulse: false,
            protected: false,
            armed: false,
            held: Vec::new(),
            mode: Mode::Read,
            write_cycles: 0,
            last: Pins::default(),
        }
    }

    /// 6116 / 62256 style SRAM
    pub fn sram(cells: usize) -> Self {
        Self::new(ParallelKind::Sram, cells)
    }

    /// 27xx EPROM
    pub fn eprom(cells: usize) -> Self {
        Self::new(ParallelKind::Eprom, cells)
    }

    /// 28C64 EEPROM
    pub fn eeprom_28c64() -> Self {
        Self::new(
            ParallelKind::Eeprom28C {
                unlock: (0x1555, 0x0AAA),
            },
            0x2000,
        )
    }

    /// 28C256 EEPROM
    pub fn eeprom_28c256() -> Self {
        Self::new(
            ParallelKind::Eeprom28C {
                unlock: (0x5555, 0x2AAA),
            },
            0x8000,
        )
    }

    /// Intel 28F flash (12 V program and erase)
    pub fn flash_28f(cells: usize) -> Self {
        Self::new(
            ParallelKind::Flash28F {
                needs_vpp: true,
                status: false,
            },
            cells,
        )
    }

    /// Manufacturer and device ID shown in signature mode
    pub fn with_id(mut self, manufacturer: u16, device: u16) -> Self {
        self.id = (manufacturer, device);
        self
    }

    /// 16-bit data bus
    pub fn wide(mut self) -> Self {
        self.wide = true;
        self
    }

    /// Program pulse is WE released instead of asserted
    pub fn positive_pulse(mut self) -> Self {
        self.positive_pulse = true;
        self
    }

    /// Start with software data protection enabled
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    /// Preload cells from `data`, starting at cell 0
    pub fn with_contents(mut self, data: &[u8]) -> Self {
        let bytes = self.cell_bytes();
        for (cell, chunk) in self.mem.iter_mut().zip(data.chunks(bytes)) {
            *cell = match chunk {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                [b, ..] => *b as u16,
                [] => 0xFFFF,
            };
        }
        self
    }

    /// Value of one cell
    pub fn cell(&self, addr: u32) -> u16 {
        self.mem.get(addr as usize).copied().unwrap_or(0xFFFF) & self.mask()
    }

    /// Whether software data protection is on
    pub fn is_protected(&self) -> bool {
        self.protected
    }

    /// Write cycles seen so far, commands included
    pub fn write_cycles(&self) -> u32 {
        self.write_cycles
    }

    fn cell_bytes(&self) -> usize {
        if self.wide {
            2
        } else {
            1
        }
    }

    fn mask(&self) -> u16 {
        if self.wide {
            0xFFFF
        } else {
            0x00FF
        }
    }

    fn store(&mut self, addr: u32, data: u16, and: bool) {
        let mask = self.mask();
        if let Some(cell) = self.mem.get_mut(addr as usize) {
            *cell = if and { *cell & mask & data } else { data };
        }
    }

    fn erase(&mut self) {
        let erased = self.mask();
        self.mem.fill(erased);
    }

    fn write_cycle(&mut self, pins: &Pins) {
        self.write_cycles += 1;
        let addr = pins.address;
        let data = pins.data & self.mask();
        match self.kind {
            ParallelKind::Sram => self.store(addr, data, false),
            ParallelKind::Eprom | ParallelKind::Eprom27E => {
                if pins.routed(VppRoute::A9) {
                    if self.kind == ParallelKind::Eprom27E {
                        log::debug!("sim: 27E erased");
                        self.erase();
                    }
                } else if pins.vpp {
                    self.store(addr, data, true);
                }
            }
            ParallelKind::Eeprom28C { unlock } => self.sdp_cycle(unlock, addr, data),
            ParallelKind::Flash28F { needs_vpp, status } => {
                let vpp_ok = !needs_vpp || pins.vpp;
                self.flash_cycle(vpp_ok, status, addr, data)
            }
        }
    }

    fn sdp_cycle(&mut self, (a, b): (u32, u32), addr: u32, data: u16) {
        let protect: [(u32, u16); 3] = [(a, 0xAA), (b, 0x55), (a, 0xA0)];
        let unprotect: [(u32, u16); 6] = [(a, 0xAA), (b, 0x55), (a, 0x80), (a, 0xAA), (b, 0x55), (a, 0x20)];
        self.held.push((addr, data));
        if self.held == protect {
            self.protected = true;
            self.armed = true;
            self.held.clear();
        } else if self.held == unprotect {
            self.protected = false;
            self.held.clear();
        } else if !(protect.starts_with(&self.held) || unprotect.starts_with(&self.held)) {
            // Not a command after all; the held cycles were data
            for (addr, data) in std::mem::take(&mut self.held) {
                if !self.protected || self.armed {
                    self.store(addr, data, false);
                    self.armed = false;
                }
            }
        }
    }

    fn flash_cycle(&mut self, vpp_ok: bool, status: bool, addr: u32, data: u16) {
        let done = if status { Mode::Status } else { Mode::Read };
        self.mode = match self.mode {
            Mode::Program => {
                if vpp_ok {
                    self.store(addr, data, true);
                }
                done
            }
            Mode::EraseSetup => {
                if matches!(data, 0x20 | 0x30 | 0xD0) && vpp_ok {
                    self.erase();
                }
                done
            }
            _ => match data {
                0x10 | 0x40 => Mode::Program,
                0x20 | 0x30 => Mode::EraseSetup,
                0x90 => Mode::Id,
                0x70 => Mode::Status,
                _ => Mode::Read,
            },
        };
    }
}

impl Chip for ParallelChip {
    fn update(&mut self, pins: &Pins) {
        let last = self.last;
        self.last = *pins;
        if pins.we == last.we {
            return;
        }
        let pulse_end = if self.positive_pulse { pins.we } else { !pins.we };
        if pulse_end && pins.ce && !pins.oe {
            self.write_cycle(pins);
        }
    }

    fn output(&self, pins: &Pins) -> Option<Drive> {
        if !(pins.vdd && pins.ce && pins.oe) {
            return None;
        }
        let signature = self.kind != ParallelKind::Sram
            && (pins.routed(VppRoute::A9) || self.mode == Mode::Id);
        let value = match pins.address {
            0 if signature => self.id.0,
            1 if signature => self.id.1,
            _ if self.mode == Mode::Status => STATUS_READY,
            addr => self.cell(addr),
        };
        Some(Drive {
            mask: self.mask(),
            value: value & self.mask(),
        })
    }

    fn contents(&self) -> Vec<u8> {
        let mask = self.mask();
        self.mem
            .iter()
            .flat_map(|cell| {
                let cell = cell & mask;
                if self.wide {
                    cell.to_be_bytes().to_vec()
                } else {
                    vec![cell as u8]
                }
            })
            .collect()
    }
}
