//! 25-series SPI flash on the socket lines
//!
//! Wiring: CS on CE (asserted selects), SCK on WE (released is high), MOSI
//! on D0, MISO on D1.

use super::{Chip, Drive};
use crate::socket::Pins;

const MISO: u16 = 1 << 1;

const SR_WIP: u8 = 0x01;
const SR_WEL: u8 = 0x02;
const SR_BP: u8 = 0x1C;

/// Geometry and identity of a simulated flash
#[derive(Debug, Clone)]
pub struct SpiChipConfig {
    /// JEDEC manufacturer ID
    pub manufacturer_id: u8,
    /// JEDEC device ID
    pub device_id: u16,
    /// Size in bytes
    pub size: usize,
    /// Smallest erase unit
    pub sector_size: usize,
    /// Page program wrap size
    pub page_size: usize,
    /// Status reads reporting busy after a write or erase
    pub busy_polls: u32,
}

impl Default for SpiChipConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: 0xEF, // Winbond
            device_id: 0x4014,     // W25Q80
            size: 1024 * 1024,
            page_size: 256,
            sector_size: 4096,
            busy_polls: 2,
        }
    }
}

/// Simulated 25-series flash
pub struct SpiChip {
    config: SpiChipConfig,
    mem: Vec<u8>,
    status: u8,
    busy_left: u32,
    /// Bytes clocked in since CS was asserted
    frame: Vec<u8>,
    shift_in: u8,
    bits_in: u8,
    out_byte: u8,
    miso: bool,
    opcodes: Vec<u8>,
    last: Pins,
}

impl SpiChip {
    /// Erased flash
    pub fn new(config: SpiChipConfig) -> Self {
        let mem = vec![0xFF; config.size];
        Self {
            config,
            mem,
            status: 0,
            busy_left: 0,
            frame: Vec::new(),
            shift_in: 0,
            bits_in: 0,
            out_byte: 0,
            miso: true,
            opcodes: Vec::new(),
            last: Pins::default(),
        }
    }

    /// Preload from `data`
    pub fn with_contents(mut self, data: &[u8]) -> Self {
        let len = data.len().min(self.mem.len());
        self.mem[..len].copy_from_slice(&data[..len]);
        self
    }

    /// Set the block protect bits
    pub fn protected(mut self) -> Self {
        self.status |= SR_BP;
        self
    }

    /// Status register
    pub fn status(&self) -> u8 {
        self.status
    }

    /// First byte of every transaction so far
    pub fn opcodes(&self) -> &[u8] {
        &self.opcodes
    }

    fn frame_address(frame: &[u8]) -> Option<usize> {
        match frame {
            [_, a2, a1, a0, ..] => Some(u32::from_be_bytes([0, *a2, *a1, *a0]) as usize),
            _ => None,
        }
    }

    /// Byte shifted out while the `position`-th frame byte is shifted in
    fn next_out_byte(&mut self, position: usize) -> u8 {
        match self.frame.first() {
            Some(0x05) => {
                if self.busy_left > 0 {
                    self.busy_left -= 1;
                    if self.busy_left == 0 {
                        self.status &= !SR_WIP;
                    }
                    self.status | SR_WIP
                } else {
                    self.status
                }
            }
            Some(0x9F) => {
                let [hi, lo] = self.config.device_id.to_be_bytes();
                [self.config.manufacturer_id, hi, lo]
                    .get(position - 1)
                    .copied()
                    .unwrap_or(0xFF)
            }
            Some(0x03) if position >= 4 => match Self::frame_address(&self.frame) {
                Some(addr) => self.mem.get(addr + position - 4).copied().unwrap_or(0xFF),
                None => 0xFF,
            },
            _ => 0xFF,
        }
    }

    fn sck_rising(&mut self, mosi: bool) {
        self.shift_in = self.shift_in << 1 | mosi as u8;
        self.bits_in += 1;
        if self.bits_in == 8 {
            if self.frame.is_empty() {
                self.opcodes.push(self.shift_in);
            }
            self.frame.push(self.shift_in);
            self.bits_in = 0;
            self.shift_in = 0;
        }
    }

    fn sck_falling(&mut self) {
        if self.frame.is_empty() {
            return;
        }
        if self.bits_in == 0 {
            self.out_byte = self.next_out_byte(self.frame.len());
        }
        self.miso = self.out_byte >> (7 - self.bits_in) & 1 != 0;
    }

    /// CS released: run the write-type command that was clocked in
    fn finish(&mut self) {
        let frame = std::mem::take(&mut self.frame);
        let Some(&opcode) = frame.first() else {
            return;
        };
        if opcode == 0x06 {
            self.status |= SR_WEL;
            return;
        }
        if !matches!(opcode, 0x01 | 0x02 | 0x20 | 0xC7) {
            return;
        }
        let enabled = self.status & SR_WEL != 0;
        self.status &= !SR_WEL;
        if !enabled || self.busy_left > 0 {
            return;
        }
        let protected = self.status & SR_BP != 0;
        match (opcode, Self::frame_address(&frame)) {
            (0x01, _) if frame.len() == 2 => self.status = frame[1] & SR_BP,
            (0x02, Some(addr)) if !protected => {
                let page = self.config.page_size.max(1);
                let base = addr - addr % page;
                for (i, byte) in frame[4..].iter().enumerate() {
                    let target = base + (addr % page + i) % page;
                    if let Some(cell) = self.mem.get_mut(target) {
                        *cell &= byte;
                    }
                }
            }
            (0x20, Some(addr)) if !protected => {
                let sector = self.config.sector_size.max(1);
                let start = addr - addr % sector;
                let end = (start + sector).min(self.mem.len());
                if start < end {
                    self.mem[start..end].fill(0xFF);
                }
            }
            (0xC7, _) if !protected => self.mem.fill(0xFF),
            _ => return,
        }
        if self.config.busy_polls > 0 {
            self.busy_left = self.config.busy_polls;
            self.status |= SR_WIP;
        }
    }
}

impl Chip for SpiChip {
    fn update(&mut self, pins: &Pins) {
        let last = self.last;
        self.last = *pins;
        if !pins.vdd {
            return;
        }
        match (last.ce, pins.ce) {
            (false, true) => {
                self.frame.clear();
                self.bits_in = 0;
                self.shift_in = 0;
            }
            (true, false) => self.finish(),
            _ => {}
        }
        if pins.ce && last.ce && pins.we != last.we {
            if pins.we {
                self.sck_falling();
            } else {
                self.sck_rising(pins.data & 1 != 0);
            }
        }
    }

    fn output(&self, pins: &Pins) -> Option<Drive> {
        if !(pins.vdd && pins.ce) {
            return None;
        }
        Some(Drive {
            mask: MISO,
            value: if self.miso { MISO } else { 0 },
        })
    }

    fn contents(&self) -> Vec<u8> {
        self.mem.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Master {
        pins: Pins,
    }

    impl Master {
        fn new() -> Self {
            Self {
                pins: Pins {
                    vdd: true,
                    ..Pins::default()
                },
            }
        }

        fn set(&mut self, chip: &mut SpiChip, f: impl FnOnce(&mut Pins)) {
            f(&mut self.pins);
            chip.update(&self.pins);
        }

        fn transfer(&mut self, chip: &mut SpiChip, out: &[u8], read: usize) -> Vec<u8> {
            self.set(chip, |p| p.ce = true);
            for &byte in out {
                for i in (0..8).rev() {
                    self.set(chip, |p| p.we = true);
                    self.set(chip, |p| p.data = (byte >> i & 1) as u16);
                    self.set(chip, |p| p.we = false);
                }
            }
            let mut input = Vec::new();
            for _ in 0..read {
                let mut byte = 0u8;
                for _ in 0..8 {
                    self.set(chip, |p| p.we = true);
                    self.set(chip, |p| p.we = false);
                    let miso = chip.output(&self.pins).map(|d| d.value & MISO != 0);
                    byte = byte << 1 | miso.unwrap_or(true) as u8;
                }
                input.push(byte);
            }
            self.set(chip, |p| p.ce = false);
            input
        }
    }

    #[test]
    fn test_rdid() {
        let mut chip = SpiChip::new(SpiChipConfig::default());
        let mut m = Master::new();
        assert_eq!(m.transfer(&mut chip, &[0x9F], 3), [0xEF, 0x40, 0x14]);
    }

    #[test]
    fn test_program_needs_wren_and_reports_busy() {
        let mut chip = SpiChip::new(SpiChipConfig::default());
        let mut m = Master::new();
        m.transfer(&mut chip, &[0x02, 0, 0, 0x10, 0x12], 0);
        assert_eq!(chip.contents()[0x10], 0xFF);

        m.transfer(&mut chip, &[0x06], 0);
        m.transfer(&mut chip, &[0x02, 0, 0, 0x10, 0x12, 0x34], 0);
        assert_eq!(m.transfer(&mut chip, &[0x05], 1), [SR_WIP]);
        assert_eq!(m.transfer(&mut chip, &[0x05], 1), [SR_WIP]);
        assert_eq!(m.transfer(&mut chip, &[0x05], 1), [0]);
        assert_eq!(m.transfer(&mut chip, &[0x03, 0, 0, 0x10], 2), [0x12, 0x34]);
    }

    #[test]
    fn test_protected_part_ignores_erase() {
        let mut chip = SpiChip::new(SpiChipConfig::default())
            .with_contents(&[0])
            .protected();
        let mut m = Master::new();
        m.transfer(&mut chip, &[0x06], 0);
        m.transfer(&mut chip, &[0xC7], 0);
        assert_eq!(chip.contents()[0], 0);

        m.transfer(&mut chip, &[0x06], 0);
        m.transfer(&mut chip, &[0x01, 0x00], 0);
        assert_eq!(chip.status() & SR_BP, 0);
    }
}
