//! Out-of-band disconnect requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag asking a handle to drop its socket.
///
/// The pool keeps a clone for every checked-out handle. Triggering it does
/// not touch the socket directly; the handle notices before its next wire
/// operation and fails that operation with a disconnect error.
#[derive(Debug, Clone, Default)]
pub struct DisconnectSignal {
    flag: Arc<AtomicBool>,
}

impl DisconnectSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests disconnection.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns true once [`trigger`](Self::trigger) has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let signal = DisconnectSignal::new();
        let held_by_pool = signal.clone();
        assert!(!signal.is_triggered());
        held_by_pool.trigger();
        assert!(signal.is_triggered());
    }
}
