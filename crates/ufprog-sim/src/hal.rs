//! Host implementations of the timing seams

use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;
use ufprog_core::hal::Monotonic;

/// Waits shorter than this spin instead of sleeping
const SPIN_LIMIT_NS: u32 = 100_000;

/// Wall-clock delay
///
/// Short waits busy-spin so bit-banged pulses stay short; longer ones hand
/// the thread back to the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimDelay;

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        let wait = Duration::from_nanos(ns as u64);
        if ns < SPIN_LIMIT_NS {
            let start = Instant::now();
            while start.elapsed() < wait {
                std::hint::spin_loop();
            }
        } else {
            std::thread::sleep(wait);
        }
    }
}

/// Microseconds since the clock was created
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    epoch: Instant,
}

impl StdClock {
    /// Clock starting at zero now
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Monotonic for StdClock {
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_waits_at_least() {
        let clock = StdClock::new();
        let start = clock.now_us();
        SimDelay.delay_us(300);
        assert!(clock.now_us() - start >= 300);
    }
}
