//! 24Cxx I2C EEPROM on the socket lines
//!
//! SCL is WE (released is high). SDA is D0, open drain: the line is low if
//! either side pulls it low.

use super::{Chip, Drive};
use crate::socket::Pins;

const SDA: u16 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// Master is sending; `bit` counts rising SCL edges, 9 is the ACK
    Receive,
    /// Chip is sending
    Transmit,
}

/// Simulated 24Cxx EEPROM
pub struct I2cChip {
    mem: Vec<u8>,
    addr_bytes: usize,
    page_size: usize,
    busy_polls: u32,
    busy_left: u32,
    write_cycles: u32,
    state: State,
    after_ack: State,
    bit: u8,
    shift: u8,
    received: usize,
    pointer: usize,
    pending: Vec<(usize, u8)>,
    out_byte: u8,
    master_ack: bool,
    pull_low: bool,
    last: Pins,
}

impl I2cChip {
    /// Erased part of `size` bytes with `addr_bytes` word address bytes
    pub fn new(size: usize, addr_bytes: usize) -> Self {
        Self {
            mem: vec![0xFF; size],
            addr_bytes,
            page_size: 16,
            busy_polls: 3,
            busy_left: 0,
            write_cycles: 0,
            state: State::Idle,
            after_ack: State::Idle,
            bit: 0,
            shift: 0,
            received: 0,
            pointer: 0,
            pending: Vec::new(),
            out_byte: 0xFF,
            master_ack: false,
            pull_low: false,
            last: Pins::default(),
        }
    }

    /// 24C02: 256 bytes, one address byte
    pub fn c24c02() -> Self {
        Self::new(256, 1)
    }

    /// 24C256: 32 KiB, two address bytes, 64-byte pages
    pub fn c24c256() -> Self {
        Self::new(32 * 1024, 2).with_page_size(64)
    }

    /// Write page size; writes wrap inside a page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Address selections answered with NACK after each write
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Write transactions committed so far
    pub fn write_cycles(&self) -> u32 {
        self.write_cycles
    }

    fn sda(&self, pins: &Pins) -> bool {
        pins.data & SDA != 0 && !self.pull_low
    }

    fn start(&mut self) {
        self.state = State::Receive;
        self.after_ack = State::Receive;
        self.bit = 0;
        self.shift = 0;
        self.received = 0;
        self.pull_low = false;
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
        self.state = State::Idle;
        self.pull_low = false;
    }

    /// Take one byte from the master; returns the ACK
    fn receive(&mut self, byte: u8) -> bool {
        let index = self.received;
        self.received += 1;
        if index == 0 {
            if byte & 0xF0 != 0xA0 {
                return false;
            }
            if self.busy_left > 0 {
                self.busy_left -= 1;
                return false;
            }
            let block = ((byte >> 1) & 0x07) as usize;
            let shift = 8 * self.addr_bytes;
            if byte & 1 != 0 {
                self.after_ack = State::Transmit;
            } else {
                self.pointer = block << shift | self.pointer & ((1 << shift) - 1);
            }
            return true;
        }
        if index <= self.addr_bytes {
            let shift = 8 * (self.addr_bytes - index);
            self.pointer = self.pointer & !(0xFF << shift) | (byte as usize) << shift;
            return true;
        }
        // Data byte: wraps inside the page, lands at STOP
        let page = self.page_size;
        self.pending.push((self.pointer, byte));
        self.pointer = self.pointer - self.pointer % page + (self.pointer + 1) % page;
        true
    }

    fn load(&mut self) {
        self.out_byte = self.mem.get(self.pointer).copied().unwrap_or(0xFF);
        self.pointer = (self.pointer + 1) % self.mem.len().max(1);
        self.pull_low = self.out_byte & 0x80 == 0;
    }

    fn scl_rising(&mut self, sda: bool) {
        match self.state {
            State::Idle => {}
            State::Receive => {
                if self.bit < 8 {
                    self.shift = self.shift << 1 | sda as u8;
                }
                self.bit += 1;
            }
            State::Transmit => {
                if self.bit == 8 {
                    self.master_ack = !sda;
                }
                self.bit += 1;
            }
        }
    }

    fn scl_falling(&mut self) {
        match (self.state, self.bit) {
            (State::Idle, _) | (_, 0) => {}
            (State::Receive, 8) => {
                let ack = self.receive(self.shift);
                self.shift = 0;
                self.pull_low = ack;
                if !ack {
                    self.after_ack = State::Idle;
                }
            }
            (State::Receive, _) if self.bit >= 9 => {
                self.bit = 0;
                self.pull_low = false;
                self.state = self.after_ack;
                if self.state == State::Transmit {
                    self.load();
                }
            }
            (State::Transmit, 8) => self.pull_low = false,
            (State::Transmit, 9) => {
                self.bit = 0;
                if self.master_ack {
                    self.load();
                } else {
                    self.state = State::Idle;
                }
            }
            (State::Transmit, bit) => self.pull_low = self.out_byte >> (7 - bit) & 1 == 0,
            _ => {}
        }
    }
}

impl Chip for I2cChip {
    fn update(&mut self, pins: &Pins) {
        let last = self.last;
        self.last = *pins;
        if !pins.vdd {
            self.state = State::Idle;
            self.pull_low = false;
            return;
        }
        let scl = !pins.we;
        let was_scl = !last.we;
        if scl != was_scl {
            if scl {
                self.scl_rising(self.sda(pins));
            } else {
                self.scl_falling();
            }
            return;
        }
        // SDA edge with SCL high: START or STOP
        let sda = pins.data & SDA != 0;
        let was_sda = last.data & SDA != 0;
        if scl && sda != was_sda {
            if sda {
                self.stop();
            } else {
                self.start();
            }
        }
    }

    fn output(&self, pins: &Pins) -> Option<Drive> {
        if !pins.vdd || !self.pull_low {
            return None;
        }
        Some(Drive {
            mask: SDA,
            value: 0,
        })
    }

    fn contents(&self) -> Vec<u8> {
        self.mem.clone()
    }
}
