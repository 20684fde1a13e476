//! Decisions delegated to the application.
//!
//! Credentials, certificate trust and timeout handling are answered by the
//! consumer of this crate through [`UserCallbacks`]. The methods are
//! synchronous and may block on user interaction.

use std::fmt;

use crate::tls::CertificateFailure;

/// A user name and password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub user: String,
    /// Secret.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Application hooks consulted during connection setup and I/O.
///
/// Returning `None` from a credential method cancels authentication, which
/// stops the mechanism chain.
pub trait UserCallbacks: Send + Sync {
    /// Asks for credentials for the named SASL mechanism.
    fn user_pass(&self, mechanism: &str) -> Option<Credentials>;

    /// Asks for a bare user name (anonymous trace string).
    fn user(&self, mechanism: &str) -> Option<String>;

    /// Decides whether to continue despite a certificate verification failure.
    ///
    /// `certificate` is the DER encoding of the server's end-entity
    /// certificate.
    fn verify_tls_failure(&self, failure: &CertificateFailure, certificate: &[u8]) -> bool {
        let _ = (failure, certificate);
        false
    }

    /// Decides whether to accept a cipher of `bits` strength.
    fn weak_cipher(&self, bits: u16) -> bool {
        let _ = bits;
        false
    }

    /// Called when a read times out. Returning true aborts the operation.
    fn timeout(&self) -> bool {
        true
    }
}

/// Callbacks answering from fixed credentials and refusing everything else.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    /// Wraps fixed credentials.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(user, password),
        }
    }
}

impl UserCallbacks for StaticCredentials {
    fn user_pass(&self, _mechanism: &str) -> Option<Credentials> {
        Some(self.credentials.clone())
    }

    fn user(&self, _mechanism: &str) -> Option<String> {
        Some(self.credentials.user.clone())
    }
}
