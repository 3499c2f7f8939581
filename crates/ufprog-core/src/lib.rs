//! ufprog-core - Firmware core for a universal memory-device programmer
//!
//! This crate holds everything that runs on the programmer board itself:
//! the shift-register bus abstraction, the VDD/VPP regulation loop, the
//! device programming engine and the framed command protocol. It is
//! `no_std` so the same code runs on the microcontroller and inside the
//! host-side simulator.
//!
//! # Execution model
//!
//! Two contexts run side by side:
//!
//! - Context A ticks both voltage regulators ([`scheduler::RegulatorLoop`]).
//! - Context B decodes frames and dispatches them
//!   ([`dispatcher::Dispatcher`]), driving the buses and the device engine.
//!
//! They only meet in [`shared::Shared`].
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc` and serde
//!   derives for configuration types)
//! - `alloc` - Enable heap allocation

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(any(feature = "alloc", test))]
extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod bitbus;
pub mod buffer;
pub mod bus;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod generator;
pub mod hal;
pub mod programmer;
pub mod protocol;
pub mod regulator;
pub mod scheduler;
pub mod shared;

#[cfg(test)]
pub(crate) mod mock;

pub use error::{Error, Result};
