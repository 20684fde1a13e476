//! IMAP authentication mechanisms.

use tokio::io::{AsyncRead, AsyncWrite};

use super::capability::Capability;
use super::handle::{ImapHandle, SaslStep};
use super::response::{Status, StatusText};
use crate::auth::{AuthResult, Mechanism, sasl};
use crate::error::AuthError;
use crate::tls::strip_port;
use crate::Result;

/// IMAP mechanisms, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapMechanism {
    /// SASL ANONYMOUS, only when enabled in [`ImapOptions`](super::ImapOptions).
    Anonymous,
    /// SASL GSSAPI through a consumer-supplied provider.
    Gssapi,
    /// SASL CRAM-MD5.
    CramMd5,
    /// SASL PLAIN.
    Plain,
    /// The LOGIN command.
    Login,
}

impl ImapMechanism {
    /// The order in which mechanisms are tried.
    pub const CHAIN: [Self; 5] = [
        Self::Anonymous,
        Self::Gssapi,
        Self::CramMd5,
        Self::Plain,
        Self::Login,
    ];
}

impl<S> Mechanism<ImapHandle<S>> for ImapMechanism
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn name(self) -> &'static str {
        match self {
            Self::Anonymous => "ANONYMOUS",
            Self::Gssapi => "GSSAPI",
            Self::CramMd5 => "CRAM-MD5",
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }

    async fn attempt(self, handle: &mut ImapHandle<S>) -> Result<AuthResult> {
        match self {
            Self::Anonymous => anonymous(handle).await,
            Self::Gssapi => gssapi(handle).await,
            Self::CramMd5 => cram_md5(handle).await,
            Self::Plain => plain(handle).await,
            Self::Login => login(handle).await,
        }
    }
}

fn finished<S>(handle: &mut ImapHandle<S>, mechanism: &'static str, status: StatusText) -> AuthResult
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if status.status == Status::Ok {
        handle.authenticated_with(&status);
        AuthResult::Success
    } else {
        AuthResult::Failure(AuthError::Rejected {
            mechanism,
            message: status.text,
        })
    }
}

async fn complete<S>(
    handle: &mut ImapHandle<S>,
    mechanism: &'static str,
    tag: &str,
    step: SaslStep,
) -> Result<AuthResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let status = match step {
        SaslStep::Done(status) => status,
        // Single-round mechanism but the server wants more.
        SaslStep::Challenge(_) => handle.sasl_cancel(tag).await?,
    };
    Ok(finished(handle, mechanism, status))
}

async fn anonymous<S>(handle: &mut ImapHandle<S>) -> Result<AuthResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !handle.options().enable_anonymous || !handle.capabilities().has_auth("ANONYMOUS") {
        return Ok(AuthResult::Unavailable);
    }
    let Some(trace) = handle.context().callbacks.user("ANONYMOUS") else {
        return Ok(cancelled("ANONYMOUS"));
    };
    let (tag, step) = handle.sasl_begin("ANONYMOUS", Some(trace.as_bytes())).await?;
    complete(handle, "ANONYMOUS", &tag, step).await
}

async fn gssapi<S>(handle: &mut ImapHandle<S>) -> Result<AuthResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !handle.capabilities().has_auth("GSSAPI") {
        return Ok(AuthResult::Unavailable);
    }
    let Some(provider) = handle.options().gssapi.clone() else {
        return Ok(AuthResult::Unavailable);
    };
    let host = strip_port(&handle.context().host).to_string();
    let started = provider
        .start("imap", &host)
        .and_then(|mut context| context.step(&[]).map(|token| (context, token)));
    let (mut context, first) = match started {
        Ok(started) => started,
        Err(reason) => {
            tracing::debug!(%reason, "no GSSAPI credentials");
            return Ok(AuthResult::Unavailable);
        }
    };

    let (tag, mut step) = handle.sasl_begin("GSSAPI", Some(&first)).await?;
    loop {
        match step {
            SaslStep::Done(status) => return Ok(finished(handle, "GSSAPI", status)),
            SaslStep::Challenge(token) => match context.step(&token) {
                Ok(reply) => step = handle.sasl_continue(&tag, &reply).await?,
                Err(reason) => {
                    handle.sasl_cancel(&tag).await?;
                    return Ok(AuthResult::Failure(AuthError::Rejected {
                        mechanism: "GSSAPI",
                        message: reason,
                    }));
                }
            },
        }
    }
}

async fn cram_md5<S>(handle: &mut ImapHandle<S>) -> Result<AuthResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !handle.capabilities().has_auth("CRAM-MD5") {
        return Ok(AuthResult::Unavailable);
    }
    let Some(creds) = handle.context().callbacks.user_pass("CRAM-MD5") else {
        return Ok(cancelled("CRAM-MD5"));
    };
    let (tag, step) = handle.sasl_begin("CRAM-MD5", None).await?;
    let step = match step {
        SaslStep::Challenge(challenge) => {
            let response = sasl::cram_md5_response(&creds.user, &creds.password, &challenge)?;
            handle.sasl_continue(&tag, response.as_bytes()).await?
        }
        done @ SaslStep::Done(_) => done,
    };
    complete(handle, "CRAM-MD5", &tag, step).await
}

async fn plain<S>(handle: &mut ImapHandle<S>) -> Result<AuthResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !handle.capabilities().has_auth("PLAIN") {
        return Ok(AuthResult::Unavailable);
    }
    let Some(creds) = handle.context().callbacks.user_pass("PLAIN") else {
        return Ok(cancelled("PLAIN"));
    };
    let message = sasl::plain_message(&creds.user, &creds.user, &creds.password);
    let (tag, step) = handle.sasl_begin("PLAIN", Some(&message)).await?;
    complete(handle, "PLAIN", &tag, step).await
}

async fn login<S>(handle: &mut ImapHandle<S>) -> Result<AuthResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if handle.capabilities().has(&Capability::LoginDisabled) {
        return Ok(AuthResult::Unavailable);
    }
    let Some(creds) = handle.context().callbacks.user_pass("LOGIN") else {
        return Ok(cancelled("LOGIN"));
    };
    let status = handle.login(&creds.user, &creds.password).await?;
    Ok(finished(handle, "LOGIN", status))
}

const fn cancelled(mechanism: &'static str) -> AuthResult {
    AuthResult::Failure(AuthError::Cancelled { mechanism })
}
