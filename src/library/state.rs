//! Scan state machine types.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};

/// Current scan state.
///
/// `Idle → Running → {Committing → Idle, Failed → Idle}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    Committing,
    Failed,
}

impl ScanState {
    /// Whether the move from `self` to `next` is a legal transition.
    pub fn can_move_to(&self, next: ScanState) -> bool {
        use ScanState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Committing)
                | (Running, Failed)
                | (Committing, Idle)
                | (Committing, Failed)
                | (Failed, Idle)
        )
    }
}

/// Observable scan progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStatus {
    pub state: ScanState,
    /// Audio files seen by the running scan
    pub files_seen: u64,
    /// Path of the folder being walked
    pub current_folder: Option<String>,
    /// Error that ended the previous scan
    pub last_error: Option<String>,
}

/// Cooperative cancellation flag shared with a running scan.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Exclusive right to run a scan. Released on drop.
#[derive(Debug)]
pub struct ScanToken {
    _guard: OwnedMutexGuard<()>,
}

/// Hands out at most one [`ScanToken`] at a time.
#[derive(Debug, Clone, Default)]
pub struct ScanGate(Arc<Mutex<()>>);

impl ScanGate {
    /// Take the token, or fail immediately with [`Error::ScanInProgress`].
    pub fn try_acquire(&self) -> Result<ScanToken> {
        self.0
            .clone()
            .try_lock_owned()
            .map(|guard| ScanToken { _guard: guard })
            .map_err(|_| Error::ScanInProgress)
    }

    pub fn is_held(&self) -> bool {
        self.0.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_rejects_second_token() {
        let gate = ScanGate::default();
        let token = gate.try_acquire().unwrap();
        assert!(gate.is_held());
        assert!(matches!(gate.try_acquire(), Err(Error::ScanInProgress)));

        drop(token);
        assert!(!gate.is_held());
        assert!(gate.try_acquire().is_ok());
    }

    #[test]
    fn test_transitions() {
        assert!(ScanState::Idle.can_move_to(ScanState::Running));
        assert!(ScanState::Running.can_move_to(ScanState::Committing));
        assert!(ScanState::Failed.can_move_to(ScanState::Idle));
        assert!(!ScanState::Idle.can_move_to(ScanState::Committing));
        assert!(!ScanState::Running.can_move_to(ScanState::Idle));
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
