//! POP3 authentication mechanisms.

use tokio::io::{AsyncRead, AsyncWrite};

use super::capability::Pop3Capability;
use super::handle::Pop3Handle;
use crate::Result;
use crate::auth::{AuthResult, Mechanism, sasl};
use crate::error::AuthError;

/// POP3 mechanisms, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop3Mechanism {
    /// SASL CRAM-MD5. Not implemented for POP3, always unavailable.
    CramMd5,
    /// APOP digest login (RFC 1939).
    Apop,
    /// USER/PASS.
    User,
}

impl Pop3Mechanism {
    /// The order in which mechanisms are tried.
    pub const CHAIN: [Self; 3] = [Self::CramMd5, Self::Apop, Self::User];
}

impl<S> Mechanism<Pop3Handle<S>> for Pop3Mechanism
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn name(self) -> &'static str {
        match self {
            Self::CramMd5 => "CRAM-MD5",
            Self::Apop => "APOP",
            Self::User => "USER",
        }
    }

    async fn attempt(self, handle: &mut Pop3Handle<S>) -> Result<AuthResult> {
        match self {
            Self::CramMd5 => Ok(AuthResult::Unavailable),
            Self::Apop => apop(handle).await,
            Self::User => user(handle).await,
        }
    }
}

async fn apop<S>(handle: &mut Pop3Handle<S>) -> Result<AuthResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if handle.options().disable_apop {
        return Ok(AuthResult::Unavailable);
    }
    let Some(timestamp) = handle.timestamp().map(str::to_string) else {
        return Ok(AuthResult::Unavailable);
    };
    let Some(creds) = handle.context().callbacks.user_pass("APOP") else {
        return Ok(AuthResult::Failure(AuthError::Cancelled { mechanism: "APOP" }));
    };
    let digest = sasl::apop_digest(&timestamp, &creds.password);
    Ok(match handle.command(&format!("APOP {} {digest}", creds.user)).await? {
        Ok(_) => AuthResult::Success,
        Err(message) => AuthResult::Failure(AuthError::Rejected {
            mechanism: "APOP",
            message,
        }),
    })
}

async fn user<S>(handle: &mut Pop3Handle<S>) -> Result<AuthResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !handle.capabilities().has(&Pop3Capability::User) {
        return Ok(AuthResult::Unavailable);
    }
    let Some(creds) = handle.context().callbacks.user_pass("USER") else {
        return Ok(AuthResult::Failure(AuthError::Cancelled { mechanism: "USER" }));
    };
    // USER is optional in RFC 1939; a refusal means this login style is off.
    if let Err(text) = handle.command(&format!("USER {}", creds.user)).await? {
        tracing::debug!(%text, "USER refused");
        return Ok(AuthResult::Unavailable);
    }
    Ok(match handle.command(&format!("PASS {}", creds.password)).await? {
        Ok(_) => AuthResult::Success,
        Err(message) => AuthResult::Failure(AuthError::Rejected {
            mechanism: "USER",
            message,
        }),
    })
}
