//! State shared between the dispatcher and regulator contexts
//!
//! Everything the two contexts both touch lives in one [`Shared`], normally a
//! `static`. Multi-field state sits behind a critical-section mutex; single
//! flags that are polled from tight loops are plain atomics.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicBool, Ordering};

use crate::error::Error;
use crate::regulator::{Rail, RegulatorState, RegulatorStatus};

/// Per-rail measurement offsets, added to every converted reading
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationData {
    /// VDD offset, volts
    pub vdd: f32,
    /// VPP offset, volts
    pub vpp: f32,
}

impl CalibrationData {
    /// Offset of one rail
    pub fn get(&self, rail: Rail) -> f32 {
        match rail {
            Rail::Vdd => self.vdd,
            Rail::Vpp => self.vpp,
        }
    }

    /// Replace the offset of one rail
    pub fn set(&mut self, rail: Rail, offset: f32) {
        match rail {
            Rail::Vdd => self.vdd = offset,
            Rail::Vpp => self.vpp = offset,
        }
    }
}

/// Fields guarded by the [`Shared`] mutex
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharedState {
    /// VDD regulator
    pub vdd: RegulatorState,
    /// VPP regulator
    pub vpp: RegulatorState,
    /// Measurement offsets
    pub calibration: CalibrationData,
}

impl SharedState {
    /// Regulator of `rail`
    pub fn rail(&self, rail: Rail) -> &RegulatorState {
        match rail {
            Rail::Vdd => &self.vdd,
            Rail::Vpp => &self.vpp,
        }
    }

    /// Regulator of `rail`, mutably
    pub fn rail_mut(&mut self, rail: Rail) -> &mut RegulatorState {
        match rail {
            Rail::Vdd => &mut self.vdd,
            Rail::Vpp => &mut self.vpp,
        }
    }
}

/// Cross-context state of one programmer
pub struct Shared {
    state: Mutex<CriticalSectionRawMutex, RefCell<SharedState>>,
    cancel: AtomicBool,
    abort: AtomicBool,
    session: AtomicBool,
}

impl Shared {
    /// Both rails idle, no calibration, no session
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(SharedState {
                vdd: RegulatorState::new(),
                vpp: RegulatorState::new(),
                calibration: CalibrationData { vdd: 0.0, vpp: 0.0 },
            })),
            cancel: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            session: AtomicBool::new(false),
        }
    }

    /// Run `f` with exclusive access to the guarded state
    ///
    /// `f` runs inside a critical section; keep it short and do not call
    /// `with` again from inside it.
    pub fn with<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Status snapshot of one rail
    pub fn status(&self, rail: Rail) -> RegulatorStatus {
        self.with(|s| s.rail(rail).status())
    }

    /// Current calibration offsets
    pub fn calibration(&self) -> CalibrationData {
        self.with(|s| s.calibration)
    }

    /// Ask the running device operation to stop at its next cell
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Whether a cancel is pending
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Flag a hardware fault; the running device operation stops at its
    /// next cell
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    /// Whether a hardware fault is pending
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Error to stop a running operation with, if any
    pub fn interruption(&self) -> Option<Error> {
        if self.is_aborted() {
            Some(Error::Hardware)
        } else if self.is_cancelled() {
            Some(Error::Cancelled)
        } else {
            None
        }
    }

    /// Whether a device session currently holds the programmer
    pub fn session_active(&self) -> bool {
        self.session.load(Ordering::Acquire)
    }

    /// Take the session lock and clear stale cancel/abort flags
    pub(crate) fn try_begin_session(&self) -> bool {
        let taken = self
            .session
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if taken {
            self.cancel.store(false, Ordering::Release);
            self.abort.store(false, Ordering::Release);
        }
        taken
    }

    pub(crate) fn end_session(&self) {
        self.session.store(false, Ordering::Release);
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}
