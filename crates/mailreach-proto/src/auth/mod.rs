//! Authentication mechanism negotiation.
//!
//! Each protocol defines an ordered list of mechanisms, strongest first.
//! [`run_chain`] tries them in order:
//!
//! - [`AuthResult::Unavailable`]: the server or configuration does not allow
//!   the mechanism, move on to the next one.
//! - [`AuthResult::Success`]: stop, the handle is authenticated.
//! - [`AuthResult::Failure`]: credentials were refused or the user
//!   cancelled. Stop without trying weaker mechanisms.
//!
//! Running out of mechanisms yields [`AuthError::NoMechanismAvailable`].

mod gssapi;
pub mod sasl;

use std::fmt;
use std::future::Future;

pub use gssapi::{GssapiContext, GssapiProvider};

use crate::error::AuthError;
use crate::{Error, Result};

/// Outcome of a single mechanism attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Credentials accepted.
    Success,
    /// Credentials refused or the user cancelled.
    Failure(AuthError),
    /// Mechanism not applicable to this server.
    Unavailable,
}

/// One entry of an authentication chain.
pub trait Mechanism<H>: Copy + fmt::Debug {
    /// SASL or command name, for logging.
    fn name(self) -> &'static str;

    /// Tries to authenticate `handle` with this mechanism.
    ///
    /// I/O and protocol errors are returned as `Err` and end the chain.
    fn attempt(self, handle: &mut H) -> impl Future<Output = Result<AuthResult>> + Send;
}

/// Tries `chain` in order and returns the mechanism that succeeded.
pub async fn run_chain<H, M>(handle: &mut H, chain: &[M]) -> Result<M>
where
    M: Mechanism<H>,
{
    for &mechanism in chain {
        match mechanism.attempt(handle).await? {
            AuthResult::Success => {
                tracing::info!(mechanism = mechanism.name(), "authenticated");
                return Ok(mechanism);
            }
            AuthResult::Unavailable => {
                tracing::debug!(mechanism = mechanism.name(), "mechanism unavailable");
            }
            AuthResult::Failure(err) => {
                tracing::warn!(mechanism = mechanism.name(), error = %err, "authentication failed");
                return Err(Error::Auth(err));
            }
        }
    }
    tracing::warn!("no authentication method available");
    Err(Error::Auth(AuthError::NoMechanismAvailable))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    /// Fake handle recording which mechanisms were tried.
    #[derive(Default)]
    struct Probe {
        tried: Vec<&'static str>,
        io_broken: bool,
    }

    #[derive(Debug, Clone, Copy)]
    enum Scripted {
        Strong,
        Medium,
        Weak,
    }

    impl Scripted {
        const CHAIN: [Self; 3] = [Self::Strong, Self::Medium, Self::Weak];
    }

    struct Server {
        offers: &'static [&'static str],
        accepts: bool,
    }

    impl Mechanism<(Probe, Server)> for Scripted {
        fn name(self) -> &'static str {
            match self {
                Self::Strong => "STRONG",
                Self::Medium => "MEDIUM",
                Self::Weak => "WEAK",
            }
        }

        async fn attempt(self, handle: &mut (Probe, Server)) -> Result<AuthResult> {
            let (probe, server) = handle;
            if !server.offers.contains(&self.name()) {
                return Ok(AuthResult::Unavailable);
            }
            if probe.io_broken {
                return Err(Error::ServerDisconnected("gone".into()));
            }
            probe.tried.push(self.name());
            Ok(if server.accepts {
                AuthResult::Success
            } else {
                AuthResult::Failure(AuthError::Rejected {
                    mechanism: self.name(),
                    message: "bad password".into(),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_falls_through_unavailable_mechanisms() {
        let mut handle = (
            Probe::default(),
            Server {
                offers: &["WEAK"],
                accepts: true,
            },
        );
        let used = run_chain(&mut handle, &Scripted::CHAIN).await.unwrap();
        assert_eq!(used.name(), "WEAK");
        assert_eq!(handle.0.tried, vec!["WEAK"]);
    }

    #[tokio::test]
    async fn test_rejection_stops_the_chain() {
        let mut handle = (
            Probe::default(),
            Server {
                offers: &["MEDIUM", "WEAK"],
                accepts: false,
            },
        );
        let err = run_chain(&mut handle, &Scripted::CHAIN).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Auth(AuthError::Rejected {
                mechanism: "MEDIUM",
                ..
            })
        ));
        assert_eq!(handle.0.tried, vec!["MEDIUM"]);
    }

    #[tokio::test]
    async fn test_nothing_applicable() {
        let mut handle = (
            Probe::default(),
            Server {
                offers: &[],
                accepts: true,
            },
        );
        let err = run_chain(&mut handle, &Scripted::CHAIN).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::NoMechanismAvailable)));
    }

    #[tokio::test]
    async fn test_io_error_ends_chain() {
        let mut handle = (
            Probe {
                io_broken: true,
                ..Probe::default()
            },
            Server {
                offers: &["STRONG", "WEAK"],
                accepts: true,
            },
        );
        let err = run_chain(&mut handle, &Scripted::CHAIN).await.unwrap_err();
        assert!(matches!(err, Error::ServerDisconnected(_)));
        assert!(handle.0.tried.is_empty());
    }
}
