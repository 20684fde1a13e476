//! Error types for the retrieval layer.

use std::time::Duration;

use thiserror::Error;

use crate::state::ProtocolState;
use crate::tls::CertificateFailure;

/// Errors that can occur while talking to a mail server.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying socket.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// TLS negotiation or verification failed.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Authentication did not complete.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Malformed or unexpected server response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server sent BYE or the socket was severed.
    #[error("Server disconnected: {0}")]
    ServerDisconnected(String),

    /// The pool has no free handle and is at its connection cap.
    #[error("Connection pool exhausted")]
    CapacityExhausted,

    /// The POP3 request queue has no room for another request.
    #[error("Request queue is full")]
    QueueFull,

    /// Operation issued in a state that does not allow it.
    #[error("{operation} requires {required}, handle is {actual}")]
    InvalidState {
        /// Command that was refused.
        operation: &'static str,
        /// Human-readable list of acceptable states.
        required: &'static str,
        /// State the handle was in.
        actual: ProtocolState,
    },

    /// Read timed out and the caller chose to abort.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Server refused the command (IMAP NO, POP3 -ERR).
    #[error("Server returned NO: {0}")]
    No(String),

    /// Server rejected the command syntax (IMAP BAD).
    #[error("Server returned BAD: {0}")]
    Bad(String),

    /// The server lacks a capability the command needs.
    #[error("Server does not support {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// Returns true if the error leaves the connection unusable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Tls(_)
                | Self::Protocol(_)
                | Self::ServerDisconnected(_)
                | Self::Timeout(_)
        )
    }
}

/// TLS negotiation failures.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Error reported by rustls while building the client context.
    #[error("{0}")]
    Rustls(#[from] rustls::Error),

    /// The handshake itself failed.
    #[error("Handshake failed: {0}")]
    Handshake(std::io::Error),

    /// Hostname cannot be used as a TLS server name.
    #[error("Invalid server name: {0}")]
    InvalidServerName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// The server completed the handshake without presenting a certificate.
    #[error("Server did not present a certificate")]
    NoPeerCertificate,

    /// Certificate verification failed and the user did not accept it.
    #[error("Certificate rejected: {0}")]
    Untrusted(CertificateFailure),

    /// Negotiated cipher is too weak and the user did not accept it.
    #[error("Weak cipher negotiated ({bits} bits)")]
    WeakCipher {
        /// Symmetric key strength.
        bits: u16,
    },

    /// TLS was required but the server does not offer STARTTLS.
    #[error("Server does not offer STARTTLS")]
    NotOffered,

    /// The stream is already encrypted.
    #[error("Connection is already encrypted")]
    AlreadyEncrypted,
}

/// Authentication chain failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The user declined to supply credentials.
    #[error("{mechanism} authentication cancelled")]
    Cancelled {
        /// Mechanism that asked for credentials.
        mechanism: &'static str,
    },

    /// The server refused the credentials.
    #[error("{mechanism} authentication rejected: {message}")]
    Rejected {
        /// Mechanism that was refused.
        mechanism: &'static str,
        /// Server text accompanying the refusal.
        message: String,
    },

    /// No mechanism in the chain applies to this server.
    #[error("No way to authenticate is known")]
    NoMechanismAvailable,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(Error::Transport(io).is_fatal());
        assert!(Error::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(Error::ServerDisconnected("BYE".into()).is_fatal());
        assert!(!Error::No("mailbox missing".into()).is_fatal());
        assert!(!Error::CapacityExhausted.is_fatal());
        assert!(!Error::Auth(AuthError::NoMechanismAvailable).is_fatal());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::InvalidState {
            operation: "FETCH",
            required: "Selected",
            actual: ProtocolState::Authenticated,
        };
        assert_eq!(
            err.to_string(),
            "FETCH requires Selected, handle is Authenticated"
        );
    }
}
