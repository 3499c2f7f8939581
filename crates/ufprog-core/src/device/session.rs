//! Device sessions
//!
//! A session is one engine operation from start to finish. At most one can
//! run per [`Shared`]; the lock is a single atomic flag taken in
//! [`Session::begin`] and released when the session is dropped.

use crate::error::{Error, Result};
use crate::shared::Shared;

/// Where the engine is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No device configured yet
    Unconfigured,
    /// Configured, nothing run since
    Configured,
    /// An operation is in progress
    Running,
    /// The last operation succeeded
    Completed,
    /// The last operation failed
    Failed,
    /// The last operation was cancelled
    Cancelled,
}

impl SessionState {
    /// Wire code
    pub fn code(self) -> u8 {
        match self {
            Self::Unconfigured => 0,
            Self::Configured => 1,
            Self::Running => 2,
            Self::Completed => 3,
            Self::Failed => 4,
            Self::Cancelled => 5,
        }
    }

    /// State for a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Unconfigured,
            1 => Self::Configured,
            2 => Self::Running,
            3 => Self::Completed,
            4 => Self::Failed,
            5 => Self::Cancelled,
            _ => return None,
        })
    }

    /// Final state for an operation that returned `result`
    pub fn after<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Completed,
            Err(Error::Cancelled) => Self::Cancelled,
            Err(_) => Self::Failed,
        }
    }
}

/// Exclusive hold on the device engine
#[must_use = "the session ends when dropped"]
pub struct Session<'s> {
    shared: &'s Shared,
}

impl<'s> Session<'s> {
    /// Start a session, or fail with [`Error::SessionBusy`]
    ///
    /// Clears any cancel or abort left over from a previous session.
    pub fn begin(shared: &'s Shared) -> Result<Self> {
        if !shared.try_begin_session() {
            log::warn!("session: busy, rejecting new session");
            return Err(Error::SessionBusy);
        }
        Ok(Self { shared })
    }

    /// Step boundary: stop here if a cancel or a hardware fault is pending
    pub fn checkpoint(&self) -> Result<()> {
        match self.shared.interruption() {
            Some(e) => {
                log::debug!("session: interrupted ({})", e);
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// End the session and return its final state
    pub fn finish<T>(self, result: &Result<T>) -> SessionState {
        SessionState::after(result)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.shared.end_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_session_is_busy() {
        let shared = Shared::new();
        let first = Session::begin(&shared).unwrap();
        assert_eq!(Session::begin(&shared).err(), Some(Error::SessionBusy));
        drop(first);
        assert!(Session::begin(&shared).is_ok());
    }

    #[test]
    fn test_checkpoint_sees_cancel_and_abort() {
        let shared = Shared::new();
        let session = Session::begin(&shared).unwrap();
        assert!(session.checkpoint().is_ok());
        shared.cancel();
        assert_eq!(session.checkpoint(), Err(Error::Cancelled));
        shared.abort();
        assert_eq!(session.checkpoint(), Err(Error::Hardware));
    }

    #[test]
    fn test_finish_maps_result() {
        let shared = Shared::new();
        let ok: Result<()> = Ok(());
        assert_eq!(Session::begin(&shared).unwrap().finish(&ok), SessionState::Completed);
        let cancelled: Result<()> = Err(Error::Cancelled);
        assert_eq!(
            Session::begin(&shared).unwrap().finish(&cancelled),
            SessionState::Cancelled
        );
        let failed: Result<()> = Err(Error::ProgramVerifyFailed { addr: 3 });
        assert_eq!(Session::begin(&shared).unwrap().finish(&failed), SessionState::Failed);
        assert!(!shared.session_active());
    }

    #[test]
    fn test_state_codes() {
        for code in 0..6 {
            assert_eq!(SessionState::from_code(code).unwrap().code(), code);
        }
        assert_eq!(SessionState::from_code(6), None);
    }
}
