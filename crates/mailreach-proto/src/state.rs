//! Protocol state shared by IMAP and POP3 handles.
//!
//! Every handle moves through the same four states:
//!
//! ```text
//! Disconnected ── connect ──→ Connected ── authenticate ──→ Authenticated
//!       ▲                                                     │      ▲
//!       │                                             select  │      │ close
//!       │                                                     ▼      │
//!       └──── I/O error, logout, BYE (from any state) ──── Selected (IMAP)
//! ```
//!
//! Commands declare the states they accept with a [`Requires`] value and are
//! refused before any byte is written when the handle is elsewhere.

use std::fmt;

use crate::{Error, Result};

/// Lifecycle state of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolState {
    /// No usable socket.
    #[default]
    Disconnected,
    /// Greeting received, not yet authenticated.
    Connected,
    /// Credentials accepted.
    Authenticated,
    /// A mailbox is open (IMAP only).
    Selected,
}

impl ProtocolState {
    /// Returns true if a socket is attached.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Returns true once authentication has succeeded.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::Selected)
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
            Self::Authenticated => "Authenticated",
            Self::Selected => "Selected",
        };
        f.write_str(name)
    }
}

/// Set of states in which an operation may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requires {
    states: &'static [ProtocolState],
    label: &'static str,
}

impl Requires {
    /// Any state with a live socket.
    pub const LIVE: Self = Self {
        states: &[
            ProtocolState::Connected,
            ProtocolState::Authenticated,
            ProtocolState::Selected,
        ],
        label: "a live connection",
    };

    /// Connected but not yet authenticated.
    pub const CONNECTED: Self = Self {
        states: &[ProtocolState::Connected],
        label: "Connected",
    };

    /// Authenticated, with or without a selected mailbox.
    pub const AUTHENTICATED: Self = Self {
        states: &[ProtocolState::Authenticated, ProtocolState::Selected],
        label: "Authenticated or Selected",
    };

    /// Exactly Authenticated (POP3 transaction state).
    pub const TRANSACTION: Self = Self {
        states: &[ProtocolState::Authenticated],
        label: "Authenticated",
    };

    /// A mailbox must be selected.
    pub const SELECTED: Self = Self {
        states: &[ProtocolState::Selected],
        label: "Selected",
    };

    /// Returns true if `state` satisfies this requirement.
    #[must_use]
    pub fn allows(self, state: ProtocolState) -> bool {
        self.states.contains(&state)
    }

    /// Fails with [`Error::InvalidState`] unless `state` is acceptable.
    pub fn check(self, operation: &'static str, state: ProtocolState) -> Result<()> {
        if self.allows(state) {
            Ok(())
        } else {
            tracing::debug!(operation, %state, required = self.label, "refusing command");
            Err(Error::InvalidState {
                operation,
                required: self.label,
                actual: state,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(ProtocolState::default(), ProtocolState::Disconnected);
        assert!(!ProtocolState::Disconnected.is_connected());
    }

    #[test]
    fn test_authenticated_predicate() {
        assert!(!ProtocolState::Connected.is_authenticated());
        assert!(ProtocolState::Authenticated.is_authenticated());
        assert!(ProtocolState::Selected.is_authenticated());
    }

    #[test]
    fn test_requirements() {
        assert!(Requires::SELECTED.check("FETCH", ProtocolState::Selected).is_ok());
        assert!(matches!(
            Requires::SELECTED.check("FETCH", ProtocolState::Authenticated),
            Err(Error::InvalidState {
                actual: ProtocolState::Authenticated,
                ..
            })
        ));
        assert!(Requires::AUTHENTICATED.allows(ProtocolState::Selected));
        assert!(!Requires::TRANSACTION.allows(ProtocolState::Selected));
        assert!(!Requires::LIVE.allows(ProtocolState::Disconnected));
        assert!(!Requires::CONNECTED.allows(ProtocolState::Authenticated));
    }
}
