//! POP3 connection handle.

#![allow(clippy::missing_errors_doc)]

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::Pop3Options;
use super::auth::Pop3Mechanism;
use super::capability::{Pop3Capabilities, Pop3Capability};
use super::pipeline::{
    FollowUps, PIPELINED_BATCH, PendingRequest, PopCallback, PopEvent, RequestKind, RequestQueue,
};
use crate::auth::run_chain;
use crate::connection::{
    DisconnectSignal, HandleContext, MailStream, Security, TlsUpgrade, Transport,
};
use crate::error::TlsError;
use crate::state::{ProtocolState, Requires};
use crate::{Error, Result};

/// Reply to a single-line command: the `+OK` text or the `-ERR` text.
pub(crate) type Reply = std::result::Result<String, String>;

/// A single POP3 connection.
///
/// Synchronous commands ([`stat`](Self::stat), [`fetch_message`](Self::fetch_message),
/// ...) first answer every queued request, since POP3 replies arrive in
/// command order.
pub struct Pop3Handle<S = MailStream> {
    transport: Transport<S>,
    capabilities: Pop3Capabilities,
    options: Pop3Options,
    timestamp: Option<String>,
    message_count: u32,
    total_size: u64,
    uids: Option<HashMap<u32, String>>,
    queue: RequestQueue,
    last_message: String,
}

impl<S> Pop3Handle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Reads the server greeting from a connected stream.
    pub async fn from_stream(stream: S, context: HandleContext, options: Pop3Options) -> Result<Self> {
        let mut handle = Self {
            transport: Transport::new(stream, context),
            capabilities: Pop3Capabilities::default(),
            queue: RequestQueue::new(options.pipeline_depth.unwrap_or(1)),
            options,
            timestamp: None,
            message_count: 0,
            total_size: 0,
            uids: None,
            last_message: String::new(),
        };

        let line = handle.transport.read_line().await?;
        match handle.parse_reply(&line)? {
            Ok(text) => {
                handle.timestamp = apop_timestamp(&text);
                handle.last_message = text;
            }
            Err(text) => {
                return Err(handle.protocol_error(&format!("server does not welcome us: {text}")));
            }
        }
        tracing::debug!(
            host = %handle.transport.context().host,
            apop = handle.timestamp.is_some(),
            "POP3 greeting received"
        );
        Ok(handle)
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> ProtocolState {
        self.transport.state()
    }

    /// Capabilities known so far.
    #[must_use]
    pub const fn capabilities(&self) -> &Pop3Capabilities {
        &self.capabilities
    }

    /// Text of the last status reply.
    #[must_use]
    pub fn last_message(&self) -> &str {
        &self.last_message
    }

    /// Returns true while the socket is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_open() && self.state().is_connected()
    }

    /// Signal that makes this handle drop its socket.
    #[must_use]
    pub fn disconnect_signal(&self) -> DisconnectSignal {
        self.transport.signal()
    }

    /// Message count from the last STAT.
    #[must_use]
    pub const fn message_count(&self) -> u32 {
        self.message_count
    }

    /// Maildrop size in octets from the last STAT.
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of queued requests whose replies are still unread.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    /// Replies read back per round of pipelined requests.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.queue.batch()
    }

    pub(crate) const fn options(&self) -> &Pop3Options {
        &self.options
    }

    pub(crate) const fn context(&self) -> &HandleContext {
        self.transport.context()
    }

    pub(crate) fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    /// Issues CAPA. A server that refuses it is assumed to allow USER only.
    pub async fn capa(&mut self) -> Result<&Pop3Capabilities> {
        self.transport.require(Requires::LIVE, "CAPA")?;
        self.flush_pending().await?;
        match self.command("CAPA").await? {
            Ok(_) => {
                let lines = self.read_text_lines().await?;
                self.capabilities = Pop3Capabilities::from_lines(lines.iter().map(String::as_str));
            }
            Err(text) => {
                tracing::debug!(%text, "CAPA refused, assuming USER");
                self.capabilities = Pop3Capabilities::legacy();
            }
        }
        Ok(&self.capabilities)
    }

    pub(crate) async fn ensure_capabilities(&mut self) -> Result<()> {
        if self.capabilities.is_empty() {
            self.capa().await?;
        }
        Ok(())
    }

    /// Runs the authentication chain, enters `Authenticated` and reads the
    /// maildrop size.
    pub async fn authenticate(&mut self) -> Result<()> {
        self.transport.require(Requires::CONNECTED, "AUTH")?;
        self.ensure_capabilities().await?;
        run_chain(self, &Pop3Mechanism::CHAIN).await?;
        self.transport.set_state(ProtocolState::Authenticated);

        let (count, size) = self.stat().await?;
        let batch = self.options.pipeline_depth.unwrap_or(
            if self.capabilities.has(&Pop3Capability::Pipelining) {
                PIPELINED_BATCH
            } else {
                1
            },
        );
        self.queue.set_batch(batch);
        tracing::debug!(messages = count, octets = size, batch = self.queue.batch(), "maildrop open");
        Ok(())
    }

    /// Issues STAT and caches the result.
    pub async fn stat(&mut self) -> Result<(u32, u64)> {
        self.transport.require(Requires::TRANSACTION, "STAT")?;
        self.flush_pending().await?;
        let text = self.expect_ok("STAT").await?;
        let Some((count, size)) = parse_stat(&text) else {
            return Err(self.protocol_error(&format!("STAT reply without counts: {text}")));
        };
        self.message_count = count;
        self.total_size = size;
        Ok((count, size))
    }

    /// Unique id of message `msgno`. The UIDL listing is read once and cached.
    pub async fn uid(&mut self, msgno: u32) -> Result<Option<&str>> {
        self.transport.require(Requires::TRANSACTION, "UIDL")?;
        if self.uids.is_none() {
            self.flush_pending().await?;
            self.expect_ok("UIDL").await?;
            let mut uids = HashMap::new();
            for line in self.read_text_lines().await? {
                if let Some((number, uid)) = line.split_once(' ')
                    && let Ok(number) = number.parse::<u32>()
                {
                    uids.insert(number, uid.trim().to_string());
                }
            }
            self.uids = Some(uids);
        }
        Ok(self
            .uids
            .as_ref()
            .and_then(|uids| uids.get(&msgno))
            .map(String::as_str))
    }

    /// Retrieves message `msgno` into `sink` and returns the bytes written.
    ///
    /// The body is always read to its end. A failing sink is reported after
    /// that, leaving the handle usable.
    pub async fn fetch_message<W>(&mut self, msgno: u32, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        self.transport.require(Requires::TRANSACTION, "RETR")?;
        self.flush_pending().await?;
        self.expect_ok(&format!("RETR {msgno}")).await?;

        let mut written = 0u64;
        let mut failure = None;
        while let Some(chunk) = self.read_body_line().await? {
            if failure.is_some() {
                continue;
            }
            match sink.write_all(&chunk).await {
                Ok(()) => written += chunk.len() as u64,
                Err(e) => failure = Some(e),
            }
        }
        if let Some(e) = failure {
            tracing::warn!(msgno, error = %e, "saving message failed");
            return Err(Error::Transport(e));
        }
        Ok(written)
    }

    /// Marks message `msgno` deleted.
    pub async fn delete_message(&mut self, msgno: u32) -> Result<()> {
        self.transport.require(Requires::TRANSACTION, "DELE")?;
        self.flush_pending().await?;
        self.expect_ok(&format!("DELE {msgno}")).await?;
        Ok(())
    }

    /// Writes a RETR or DELE request now and defers reading its reply.
    ///
    /// The reply is read once a batch is complete or on
    /// [`flush_pending`](Self::flush_pending), and delivered to `callback`.
    /// Outside `Authenticated` the request is refused and `callback` is
    /// dropped without being called.
    pub async fn queue<F>(&mut self, kind: RequestKind, msgno: u32, callback: F) -> Result<()>
    where
        F: FnMut(PopEvent<'_>, &mut FollowUps) + Send + 'static,
    {
        self.transport.require(Requires::TRANSACTION, kind.verb())?;
        if self.queue.is_full() {
            self.flush_pending().await?;
        }
        self.submit(PendingRequest {
            kind,
            msgno,
            callback: Box::new(callback),
        })
        .await?;
        if self.queue.batch_ready() {
            self.drain(false).await?;
        }
        Ok(())
    }

    /// Reads the replies of every queued request.
    pub async fn flush_pending(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        self.drain(true).await
    }

    /// Answers pending requests, sends QUIT and closes the connection.
    pub async fn quit(&mut self) -> Result<()> {
        self.transport.require(Requires::LIVE, "QUIT")?;
        let flushed = self.flush_pending().await;
        let result = if self.transport.is_open() {
            self.expect_ok("QUIT").await.map(|_| ())
        } else {
            Ok(())
        };
        self.uids = None;
        self.transport.disconnect();
        flushed.and(result)
    }

    /// Sends one command line and reads its status reply.
    pub(crate) async fn command(&mut self, line: &str) -> Result<Reply> {
        self.transport.send(format!("{line}\r\n").as_bytes()).await?;
        let raw = self.transport.read_line().await?;
        let reply = self.parse_reply(&raw)?;
        match &reply {
            Ok(text) | Err(text) => self.last_message.clone_from(text),
        }
        Ok(reply)
    }

    async fn expect_ok(&mut self, line: &str) -> Result<String> {
        self.command(line).await?.map_err(Error::No)
    }

    async fn submit(&mut self, request: PendingRequest) -> Result<()> {
        if self.queue.is_full() {
            return Err(Error::QueueFull);
        }
        let line = format!("{} {}\r\n", request.kind.verb(), request.msgno);
        self.transport.send(line.as_bytes()).await?;
        self.queue.push(request)
    }

    async fn drain(&mut self, until_empty: bool) -> Result<()> {
        if self.state() != ProtocolState::Authenticated {
            self.queue.discard();
            return Ok(());
        }
        if !self.queue.begin_drain() {
            // An earlier drain was abandoned halfway: replies on the wire no
            // longer line up with the queue.
            let dropped = self.queue.discard();
            self.queue.end_drain();
            tracing::warn!(dropped, "request queue out of step with the server");
            return Err(self.protocol_error("interrupted pipeline"));
        }
        let result = self.drain_rounds(until_empty).await;
        self.queue.end_drain();
        result
    }

    async fn drain_rounds(&mut self, until_empty: bool) -> Result<()> {
        loop {
            // Follow-ups filed during this round wait for the next one.
            let round = self.queue.len();
            for _ in 0..round {
                if self.state() != ProtocolState::Authenticated {
                    let dropped = self.queue.discard();
                    tracing::debug!(dropped, "connection lost, dropping queued requests");
                    return Ok(());
                }
                let Some(request) = self.queue.pop() else {
                    break;
                };
                self.complete(request).await?;
            }
            let more = if until_empty {
                !self.queue.is_empty()
            } else {
                self.queue.batch_ready()
            };
            if !more {
                return Ok(());
            }
        }
    }

    async fn complete(&mut self, request: PendingRequest) -> Result<()> {
        let PendingRequest {
            kind,
            msgno,
            mut callback,
        } = request;
        let mut follow = FollowUps::new(self.queue.room());

        let reply = match self.read_reply().await {
            Ok(reply) => reply,
            Err(e) => return Err(self.abandon(callback, e)),
        };
        match &reply {
            Ok(_) => callback(PopEvent::Status(Ok(())), &mut follow),
            Err(text) => {
                tracing::debug!(verb = kind.verb(), msgno, %text, "request refused");
                callback(PopEvent::Status(Err(text.as_str())), &mut follow);
            }
        }

        if kind == RequestKind::Retr && reply.is_ok() {
            loop {
                match self.read_body_line().await {
                    Ok(Some(chunk)) => callback(PopEvent::Data(&chunk), &mut follow),
                    Ok(None) => break,
                    Err(e) => return Err(self.abandon(callback, e)),
                }
            }
            callback(PopEvent::Done, &mut follow);
        }
        drop(callback);

        for request in follow.into_requests() {
            self.submit(request).await?;
        }
        Ok(())
    }

    /// Reports `err` to the in-flight request and drops the rest unrun.
    fn abandon(&mut self, mut callback: PopCallback, err: Error) -> Error {
        let message = err.to_string();
        callback(PopEvent::Status(Err(&message)), &mut FollowUps::new(0));
        let dropped = self.queue.discard();
        tracing::warn!(
            host = %self.transport.context().host,
            error = %err,
            dropped,
            "pipelined request failed"
        );
        err
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let raw = self.transport.read_line().await?;
        self.parse_reply(&raw)
    }

    /// Reads one line of a multi-line body. `None` at the terminating dot.
    async fn read_body_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = self.transport.read_line().await?;
        if line == b".\r\n" {
            return Ok(None);
        }
        if line.first() == Some(&b'.') {
            line.remove(0);
        }
        if self.options.filter_cr && line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            line.push(b'\n');
        }
        Ok(Some(line))
    }

    async fn read_text_lines(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let raw = self.transport.read_line().await?;
            if raw == b".\r\n" {
                return Ok(lines);
            }
            let body = raw.strip_prefix(b".").unwrap_or(&raw);
            let text = String::from_utf8_lossy(body);
            lines.push(text.trim_end_matches(['\r', '\n']).to_string());
        }
    }

    fn parse_reply(&mut self, raw: &[u8]) -> Result<Reply> {
        parse_status(raw).map_err(|e| self.transport.fail(e))
    }

    fn protocol_error(&mut self, message: &str) -> Error {
        self.transport.fail(Error::Protocol(message.to_string()))
    }
}

impl<S> Pop3Handle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + TlsUpgrade,
{
    /// Upgrades the connection with STLS and re-reads capabilities.
    pub async fn start_tls(&mut self) -> Result<()> {
        self.transport.require(Requires::CONNECTED, "STLS")?;
        if self.transport.stream().is_some_and(TlsUpgrade::is_tls) {
            return Err(TlsError::AlreadyEncrypted.into());
        }
        self.ensure_capabilities().await?;
        if !self.capabilities.has(&Pop3Capability::Stls) {
            return Err(TlsError::NotOffered.into());
        }
        self.expect_ok("STLS").await?;

        let stream = self.transport.take_stream()?;
        let context = self.transport.context().clone();
        match stream
            .upgrade_to_tls(&context.host, context.callbacks.as_ref())
            .await
        {
            Ok(stream) => self.transport.restore_stream(stream),
            Err(e) => {
                self.transport.disconnect();
                return Err(e);
            }
        }

        self.capabilities = Pop3Capabilities::default();
        self.capa().await?;
        Ok(())
    }

    /// Brings a freshly greeted handle to `Authenticated`: STLS as
    /// `security` asks, then the authentication chain and STAT.
    pub async fn establish(&mut self, security: Security) -> Result<()> {
        if self.state() != ProtocolState::Connected {
            return Ok(());
        }
        self.ensure_capabilities().await?;
        if security.wants_starttls() {
            if self.capabilities.has(&Pop3Capability::Stls) {
                self.start_tls().await?;
            } else if security == Security::StartTls {
                tracing::warn!(host = %self.context().host, "server does not offer STLS");
                self.transport.disconnect();
                return Err(TlsError::NotOffered.into());
            } else {
                tracing::info!(host = %self.context().host, "STLS not offered, staying in plaintext");
            }
        }
        self.authenticate().await
    }
}

/// Splits a status line into its `+OK` or `-ERR` text.
fn parse_status(raw: &[u8]) -> Result<Reply> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(text) = line.strip_prefix("+OK") {
        Ok(Ok(text.trim_start().to_string()))
    } else if let Some(text) = line.strip_prefix("-ERR") {
        Ok(Err(text.trim_start().to_string()))
    } else {
        Err(Error::Protocol(format!("unexpected reply: {line}")))
    }
}

/// Extracts the `<...>` APOP timestamp from a greeting.
fn apop_timestamp(greeting: &str) -> Option<String> {
    let start = greeting.find('<')?;
    let end = start + greeting[start..].find('>')?;
    Some(greeting[start..=end].to_string())
}

fn parse_stat(text: &str) -> Option<(u32, u64)> {
    let mut fields = text.split_ascii_whitespace();
    let count = fields.next()?.parse().ok()?;
    let size = fields.next()?.parse().ok()?;
    Some((count, size))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio_test::io::Builder;

    use super::*;
    use crate::callbacks::StaticCredentials;

    fn context() -> HandleContext {
        HandleContext::new("pop.example.com", Arc::new(StaticCredentials::new("u", "p")))
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(parse_status(b"+OK 2 320\r\n").unwrap(), Ok("2 320".to_string()));
        assert_eq!(parse_status(b"-ERR no such message\r\n").unwrap(), Err("no such message".to_string()));
        assert!(matches!(parse_status(b"* OK imap\r\n"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_apop_timestamp() {
        assert_eq!(
            apop_timestamp("POP3 server ready <1896.697170952@dbc.mtview.ca.us>").as_deref(),
            Some("<1896.697170952@dbc.mtview.ca.us>")
        );
        assert_eq!(apop_timestamp("ready"), None);
        assert_eq!(apop_timestamp("ready <unterminated"), None);
    }

    #[test]
    fn test_stat_fields() {
        assert_eq!(parse_stat("2 320"), Some((2, 320)));
        assert_eq!(parse_stat("2"), None);
    }

    #[tokio::test]
    async fn test_err_greeting_is_refused() {
        let mock = Builder::new().read(b"-ERR go away\r\n").build();
        let result = Pop3Handle::from_stream(mock, context(), Pop3Options::default()).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_queue_refused_before_authentication() {
        let mock = Builder::new().read(b"+OK ready\r\n").build();
        let mut handle = Pop3Handle::from_stream(mock, context(), Pop3Options::default())
            .await
            .unwrap();

        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let err = handle
            .queue(RequestKind::Retr, 1, move |_, _| *flag.lock().unwrap() = true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "RETR",
                actual: ProtocolState::Connected,
                ..
            }
        ));
        assert_eq!(handle.pending_requests(), 0);
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_capa_refused_means_user_only() {
        let mock = Builder::new()
            .read(b"+OK ready\r\n")
            .write(b"CAPA\r\n")
            .read(b"-ERR unknown command\r\n")
            .build();
        let mut handle = Pop3Handle::from_stream(mock, context(), Pop3Options::default())
            .await
            .unwrap();
        let caps = handle.capa().await.unwrap();
        assert_eq!(caps, &Pop3Capabilities::legacy());
        assert_eq!(handle.state(), ProtocolState::Connected);
    }
}
