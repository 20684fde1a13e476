//! Per-handle transport: socket, state and I/O policy.
//!
//! [`Transport`] owns the framed stream of one handle together with its
//! [`ProtocolState`]. Every wire operation goes through it so that the same
//! rules apply to IMAP and POP3:
//!
//! - a triggered [`DisconnectSignal`] drops the socket before the next
//!   operation,
//! - reads are bounded by the I/O timeout and consult
//!   [`UserCallbacks::timeout`] when it expires,
//! - fatal errors force the state to `Disconnected`,
//! - bytes are reported to wire observers.

#![allow(clippy::missing_errors_doc)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use super::{DisconnectSignal, FramedStream};
use crate::callbacks::UserCallbacks;
use crate::observer::{Direction, Observers};
use crate::state::{ProtocolState, Requires};
use crate::{Error, Result};

/// Settings shared by every handle created for one server.
#[derive(Clone)]
pub struct HandleContext {
    /// Hostname used for TLS verification and logging.
    pub host: String,
    /// Bound on each individual read.
    pub io_timeout: Duration,
    /// Application decisions.
    pub callbacks: Arc<dyn UserCallbacks>,
    /// Event receivers.
    pub observers: Observers,
}

impl HandleContext {
    /// Creates a context with no observers and a 60 second I/O timeout.
    #[must_use]
    pub fn new(host: impl Into<String>, callbacks: Arc<dyn UserCallbacks>) -> Self {
        Self {
            host: host.into(),
            io_timeout: Duration::from_secs(60),
            callbacks,
            observers: Observers::new(),
        }
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Sets the observer list.
    #[must_use]
    pub fn observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }
}

impl std::fmt::Debug for HandleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleContext")
            .field("host", &self.host)
            .field("io_timeout", &self.io_timeout)
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

/// Socket plus lifecycle state for a single handle.
pub struct Transport<S> {
    framed: Option<FramedStream<S>>,
    state: ProtocolState,
    signal: DisconnectSignal,
    context: HandleContext,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a freshly connected stream. The state starts as `Connected`.
    pub fn new(stream: S, context: HandleContext) -> Self {
        let transport = Self {
            framed: Some(FramedStream::new(stream)),
            state: ProtocolState::Connected,
            signal: DisconnectSignal::new(),
            context,
        };
        transport
            .context
            .observers
            .state_change(ProtocolState::Disconnected, ProtocolState::Connected);
        transport
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> ProtocolState {
        self.state
    }

    /// Handle settings.
    #[must_use]
    pub const fn context(&self) -> &HandleContext {
        &self.context
    }

    /// Signal that asks this transport to drop its socket.
    #[must_use]
    pub fn signal(&self) -> DisconnectSignal {
        self.signal.clone()
    }

    /// Returns true while a socket is attached and no disconnect was requested.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.framed.is_some() && !self.signal.is_triggered()
    }

    /// Fails unless the current state satisfies `requires`.
    pub fn require(&self, requires: Requires, operation: &'static str) -> Result<()> {
        requires.check(operation, self.state)
    }

    /// Moves to `state`, notifying observers. Entering `Disconnected` drops
    /// the socket.
    pub fn set_state(&mut self, state: ProtocolState) {
        if state == ProtocolState::Disconnected {
            self.framed = None;
        }
        if state != self.state {
            let from = std::mem::replace(&mut self.state, state);
            tracing::debug!(host = %self.context.host, %from, to = %state, "state change");
            self.context.observers.state_change(from, state);
        }
    }

    /// Drops the socket and enters `Disconnected`.
    pub fn disconnect(&mut self) {
        self.set_state(ProtocolState::Disconnected);
    }

    /// Disconnects if `err` is fatal, then hands it back.
    pub fn fail(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            tracing::warn!(host = %self.context.host, error = %err, "dropping connection");
            self.disconnect();
        }
        err
    }

    fn framed(&mut self) -> Result<&mut FramedStream<S>> {
        if self.signal.is_triggered() && self.framed.is_some() {
            tracing::debug!(host = %self.context.host, "disconnect requested");
            self.disconnect();
        }
        self.framed.as_mut().ok_or_else(|| {
            Error::ServerDisconnected("connection is closed".to_string())
        })
    }

    /// Writes and flushes one command.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let framed = self.framed()?;
        let result = framed.write_command(data).await;
        match result {
            Ok(()) => {
                self.context.observers.wire(Direction::Sent, data);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Reads one CRLF-terminated line.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        self.receive(false).await
    }

    /// Reads one IMAP response with its literals.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        self.receive(true).await
    }

    async fn receive(&mut self, with_literals: bool) -> Result<Vec<u8>> {
        let io_timeout = self.context.io_timeout;
        loop {
            let framed = self.framed()?;
            let read = async {
                if with_literals {
                    framed.read_response().await
                } else {
                    framed.read_line().await
                }
            };
            let outcome = tokio::time::timeout(io_timeout, read).await;
            match outcome {
                Ok(Ok(data)) => {
                    self.context.observers.wire(Direction::Received, &data);
                    return Ok(data);
                }
                Ok(Err(e)) => return Err(self.fail(e)),
                Err(_) => {
                    tracing::debug!(host = %self.context.host, ?io_timeout, "read timed out");
                    if self.context.callbacks.timeout() {
                        return Err(self.fail(Error::Timeout(io_timeout)));
                    }
                }
            }
        }
    }

    /// Reads one IMAP response, waiting until `deadline` instead of the
    /// I/O timeout. Returns `None` when the deadline passes first.
    pub async fn read_response_until(
        &mut self,
        deadline: tokio::time::Instant,
    ) -> Result<Option<Vec<u8>>> {
        let framed = self.framed()?;
        let outcome = tokio::time::timeout_at(deadline, framed.read_response()).await;
        match outcome {
            Ok(Ok(data)) => {
                self.context.observers.wire(Direction::Received, &data);
                Ok(Some(data))
            }
            Ok(Err(e)) => Err(self.fail(e)),
            Err(_) => Ok(None),
        }
    }

    /// Detaches the framed stream for an in-place upgrade.
    ///
    /// Input already buffered is a protocol violation at this point (the
    /// server must not send anything before the handshake), so it is
    /// rejected.
    pub fn take_stream(&mut self) -> Result<S> {
        let framed = self.framed()?;
        if framed.has_buffered_input() {
            return Err(self.fail(Error::Protocol(
                "unexpected data before TLS handshake".to_string(),
            )));
        }
        let framed = self.framed.take().ok_or_else(|| {
            Error::ServerDisconnected("connection is closed".to_string())
        })?;
        Ok(framed.into_inner())
    }

    /// Reattaches a stream taken with [`take_stream`](Self::take_stream).
    pub fn restore_stream(&mut self, stream: S) {
        self.framed = Some(FramedStream::new(stream));
    }

    /// Returns the underlying stream, if attached.
    #[must_use]
    pub fn stream(&self) -> Option<&S> {
        self.framed.as_ref().map(FramedStream::get_ref)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use std::sync::Mutex;

    use tokio_test::io::Builder;

    use super::*;
    use crate::callbacks::StaticCredentials;
    use crate::observer::HandleObserver;

    #[derive(Default)]
    struct States(Mutex<Vec<(ProtocolState, ProtocolState)>>);

    impl HandleObserver for States {
        fn on_state_change(&self, from: ProtocolState, to: ProtocolState) {
            self.0.lock().unwrap().push((from, to));
        }
    }

    fn context() -> HandleContext {
        HandleContext::new("mail.example.com", Arc::new(StaticCredentials::new("u", "p")))
    }

    #[tokio::test]
    async fn test_signal_drops_socket_before_io() {
        let mock = Builder::new().build();
        let mut transport = Transport::new(mock, context());
        transport.signal().trigger();

        let err = transport.send(b"NOOP\r\n").await.unwrap_err();
        assert!(matches!(err, Error::ServerDisconnected(_)));
        assert_eq!(transport.state(), ProtocolState::Disconnected);
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_eof_forces_disconnected() {
        let states = Arc::new(States::default());
        let ctx = context().observers(Observers::new().with(states.clone()));
        let mock = Builder::new().build();
        let mut transport = Transport::new(mock, ctx);

        assert!(transport.read_line().await.is_err());
        assert_eq!(transport.state(), ProtocolState::Disconnected);
        assert_eq!(
            *states.0.lock().unwrap(),
            vec![
                (ProtocolState::Disconnected, ProtocolState::Connected),
                (ProtocolState::Connected, ProtocolState::Disconnected),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_and_disconnects() {
        let (client, _server) = tokio::io::duplex(64);
        let ctx = context().io_timeout(Duration::from_secs(5));
        let mut transport = Transport::new(client, ctx);

        let err = transport.read_line().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(5)));
        assert_eq!(transport.state(), ProtocolState::Disconnected);
    }

    #[tokio::test]
    async fn test_precondition_checked_without_io() {
        let mock = Builder::new().build();
        let transport = Transport::new(mock, context());
        let err = transport.require(Requires::SELECTED, "FETCH").unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(transport.state(), ProtocolState::Connected);
    }
}
