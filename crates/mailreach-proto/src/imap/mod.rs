//! IMAP4rev1 retrieval handle.
//!
//! An [`ImapHandle`] is created from a connected stream, reads the greeting
//! and then moves through the protocol states:
//!
//! ```text
//! Connected ── authenticate() ──→ Authenticated ── select() ──→ Selected
//!     │                               ▲                            │
//!     └── PREAUTH greeting ───────────┘ ◄────────── close() ───────┘
//! ```
//!
//! Authentication walks [`ImapMechanism::CHAIN`]. [`ImapConnector`] bundles
//! connect, STARTTLS and authentication for use with a
//! [`ConnectionPool`](crate::pool::ConnectionPool).

mod auth;
mod capability;
mod connector;
mod handle;
mod response;
mod tag;

use std::fmt;
use std::sync::Arc;

pub use auth::ImapMechanism;
pub use capability::{Capabilities, Capability};
pub use connector::ImapConnector;
pub use handle::{FetchedMessage, ImapHandle, MailboxEvent, SelectedMailbox, StoreMode};
pub use response::{Code, Response, Status, StatusText, Untagged, parse};
pub use tag::TagGenerator;

use crate::auth::GssapiProvider;

/// IMAP-specific handle settings.
#[derive(Clone, Default)]
pub struct ImapOptions {
    /// Try SASL ANONYMOUS before any credentialed mechanism.
    pub enable_anonymous: bool,
    /// Source of GSSAPI contexts. GSSAPI is skipped without one.
    pub gssapi: Option<Arc<dyn GssapiProvider>>,
}

impl fmt::Debug for ImapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapOptions")
            .field("enable_anonymous", &self.enable_anonymous)
            .field("gssapi", &self.gssapi.is_some())
            .finish()
    }
}
