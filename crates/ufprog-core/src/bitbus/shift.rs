//! 74HC595 / 74HC165 shift-register chains

use super::LineDriver;
use crate::error::{Error, Result};
use crate::hal::{DelayNs, HwResult, InputPin, OutputPin};

/// Cascaded serial-in/parallel-out chain (74HC595)
///
/// Register `k` output `Qj` is physical position `8k + j`. Register 0 takes
/// the MCU's serial line and feeds register 1 through its `Q7'` output, so a
/// full image is shifted highest position first.
pub struct ShiftOut<SER, SRCLK, RCLK, D> {
    ser: SER,
    srclk: SRCLK,
    rclk: RCLK,
    delay: D,
    registers: usize,
    pulse_ns: u32,
}

impl<SER, SRCLK, RCLK, D> ShiftOut<SER, SRCLK, RCLK, D>
where
    SER: OutputPin,
    SRCLK: OutputPin,
    RCLK: OutputPin,
    D: DelayNs,
{
    /// Create a chain of `registers` cascaded 8-bit registers
    pub fn new(ser: SER, srclk: SRCLK, rclk: RCLK, delay: D, registers: usize) -> Self {
        Self {
            ser,
            srclk,
            rclk,
            delay,
            registers,
            pulse_ns: 0,
        }
    }

    /// Minimum clock high/low time; zero skips the delay calls
    pub fn with_pulse_ns(mut self, pulse_ns: u32) -> Self {
        self.pulse_ns = pulse_ns;
        self
    }

    fn pause(&mut self) {
        if self.pulse_ns > 0 {
            self.delay.delay_ns(self.pulse_ns);
        }
    }

    fn pulse_srclk(&mut self) -> Result<()> {
        self.srclk.set_high().hw()?;
        self.pause();
        self.srclk.set_low().hw()?;
        self.pause();
        Ok(())
    }
}

impl<SER, SRCLK, RCLK, D> LineDriver for ShiftOut<SER, SRCLK, RCLK, D>
where
    SER: OutputPin,
    SRCLK: OutputPin,
    RCLK: OutputPin,
    D: DelayNs,
{
    fn lines(&self) -> usize {
        self.registers * 8
    }

    fn drive(&mut self, image: &[u8]) -> Result<()> {
        if image.len() < self.registers {
            return Err(Error::OutOfRange);
        }
        for pos in (0..self.lines()).rev() {
            let bit = image[pos / 8] & (1 << (pos % 8)) != 0;
            self.ser.set_state(bit.into()).hw()?;
            self.pulse_srclk()?;
        }
        // Storage clock moves the whole shift stage to the outputs at once
        self.rclk.set_high().hw()?;
        self.pause();
        self.rclk.set_low().hw()?;
        Ok(())
    }
}

/// Cascaded parallel-in/serial-out chain (74HC165)
///
/// Register 0 drives the MCU's input pin. Each register presents `D7` first,
/// then `D6` down to `D0`, before the next register's bits arrive.
pub struct ShiftIn<PL, CLK, Q7, D> {
    load: PL,
    clk: CLK,
    q7: Q7,
    delay: D,
    registers: usize,
    pulse_ns: u32,
}

impl<PL, CLK, Q7, D> ShiftIn<PL, CLK, Q7, D>
where
    PL: OutputPin,
    CLK: OutputPin,
    Q7: InputPin,
    D: DelayNs,
{
    /// Create a chain of `registers` cascaded 8-bit registers
    ///
    /// `load` is the active-low parallel load (`/PL`) line.
    pub fn new(load: PL, clk: CLK, q7: Q7, delay: D, registers: usize) -> Self {
        Self {
            load,
            clk,
            q7,
            delay,
            registers,
            pulse_ns: 0,
        }
    }

    /// Minimum clock high/low time; zero skips the delay calls
    pub fn with_pulse_ns(mut self, pulse_ns: u32) -> Self {
        self.pulse_ns = pulse_ns;
        self
    }

    fn pause(&mut self) {
        if self.pulse_ns > 0 {
            self.delay.delay_ns(self.pulse_ns);
        }
    }
}

impl<PL, CLK, Q7, D> LineDriver for ShiftIn<PL, CLK, Q7, D>
where
    PL: OutputPin,
    CLK: OutputPin,
    Q7: InputPin,
    D: DelayNs,
{
    fn lines(&self) -> usize {
        self.registers * 8
    }

    fn drive(&mut self, _image: &[u8]) -> Result<()> {
        Err(Error::UnsupportedOperation)
    }

    fn sample(&mut self, image: &mut [u8]) -> Result<()> {
        if image.len() < self.registers {
            return Err(Error::OutOfRange);
        }
        self.clk.set_low().hw()?;
        self.load.set_low().hw()?;
        self.pause();
        self.load.set_high().hw()?;
        for byte in image.iter_mut().take(self.registers) {
            let mut value = 0u8;
            for bit in (0..8).rev() {
                if self.q7.is_high().hw()? {
                    value |= 1 << bit;
                }
                self.clk.set_high().hw()?;
                self.pause();
                self.clk.set_low().hw()?;
                self.pause();
            }
            *byte = value;
        }
        Ok(())
    }
}

/// Output and input chains sharing one position numbering
///
/// Used for the data bus: a 595 chain drives the lines, a 165 chain reads
/// them back.
pub struct Duplex<O, I> {
    output: O,
    input: I,
}

impl<O: LineDriver, I: LineDriver> Duplex<O, I> {
    /// Pair an output driver with an input driver
    pub fn new(output: O, input: I) -> Self {
        Self { output, input }
    }
}

impl<O: LineDriver, I: LineDriver> LineDriver for Duplex<O, I> {
    fn lines(&self) -> usize {
        self.output.lines().min(self.input.lines())
    }

    fn drive(&mut self, image: &[u8]) -> Result<()> {
        self.output.drive(image)
    }

    fn sample(&mut self, image: &mut [u8]) -> Result<()> {
        self.input.sample(image)
    }
}
