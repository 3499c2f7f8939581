//! Hardware seams
//!
//! The core never touches a vendor SDK. Digital lines, PWM and delays use the
//! `embedded-hal` 1.0 traits; the two contracts `embedded-hal` does not cover
//! (an ADC channel and a monotonic microsecond clock) are defined here.

pub use embedded_hal::delay::DelayNs;
pub use embedded_hal::digital::{InputPin, OutputPin, PinState};
pub use embedded_hal::pwm::SetDutyCycle;

use crate::error::{Error, Result};

/// One ADC input channel
pub trait AdcChannel {
    /// Error type returned by the converter
    type Error: core::fmt::Debug;

    /// Number of counts in the converter's full scale (4096 for 12 bits)
    fn full_scale(&self) -> u32 {
        4096
    }

    /// Take one raw conversion
    fn read_raw(&mut self) -> core::result::Result<u16, Self::Error>;
}

/// Free-running microsecond clock
pub trait Monotonic {
    /// Microseconds since an arbitrary epoch; never goes backwards
    fn now_us(&self) -> u64;
}

/// Map a HAL error onto [`Error::Hardware`], logging the original
pub(crate) trait HwResult<T> {
    fn hw(self) -> Result<T>;
}

impl<T, E: core::fmt::Debug> HwResult<T> for core::result::Result<T, E> {
    fn hw(self) -> Result<T> {
        self.map_err(|e| {
            log::warn!("hal: {:?}", e);
            Error::Hardware
        })
    }
}
