//! # Turn Cancellation
//!
//! Each turn gets a fresh `tokio_util::sync::CancellationToken`. It is shared by
//! whoever may interrupt the turn (barge-in, session end, the turn watchdog) and by
//! the turn's pipeline, which checks it between increments and awaits it in
//! `select!`.
//!
//! ## Rust Concepts Used:
//! - **Clone-shared state**: cloning a token does not copy the flag; every clone
//!   observes the same cancellation
//! - **Set-once**: `cancel()` on an already cancelled token does nothing, so several
//!   interrupters never conflict
//! - **`Arc<Mutex<Option<T>>>`**: `ActiveTurnSlot` lets a thread outside the actor
//!   reach the current turn's token without going through the mailbox
//!
//! The token itself does not say which `cancel()` call came first. The session
//! actor is the only writer of turn state, so it gets that answer by checking
//! `is_cancelled()` before cancelling.

use std::sync::{Arc, Mutex};

pub use tokio_util::sync::CancellationToken;

/// The token of the turn a session is currently running, if any.
///
/// Written by the session actor when a turn starts or finishes, read by
/// `SessionRegistry::end` so ending a session can cancel its turn without a
/// round-trip through the actor's mailbox.
#[derive(Debug, Clone, Default)]
pub struct ActiveTurnSlot {
    token: Arc<Mutex<Option<CancellationToken>>>,
}

impl ActiveTurnSlot {
    pub fn set(&self, token: CancellationToken) {
        *self.lock() = Some(token);
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    /// Cancel the active turn, if there is one that is still running.
    /// Returns `true` if the turn was live before this call.
    pub fn cancel(&self) -> bool {
        match self.lock().as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        // A panic while holding this lock cannot leave the Option half-written
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_cancels_current_token_only() {
        let slot = ActiveTurnSlot::default();
        assert!(!slot.cancel());

        let token = CancellationToken::new();
        slot.set(token.clone());
        assert!(slot.cancel());
        assert!(token.is_cancelled());
        assert!(!slot.cancel());

        slot.clear();
        let next = CancellationToken::new();
        assert!(!slot.cancel());
        assert!(!next.is_cancelled());
    }

    #[test]
    fn test_slot_does_not_report_a_token_cancelled_elsewhere() {
        let slot = ActiveTurnSlot::default();
        let token = CancellationToken::new();
        slot.set(token.clone());

        // Barge-in got there first
        token.cancel();
        assert!(!slot.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_cancellation() {
        let token = CancellationToken::new();
        let worker_copy = token.clone();
        token.cancel();
        assert!(worker_copy.is_cancelled());
        assert!(!CancellationToken::new().is_cancelled());
    }
}
