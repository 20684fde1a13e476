//! IMAP connection handle.

#![allow(clippy::missing_errors_doc)]

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use super::auth::ImapMechanism;
use super::capability::{Capabilities, Capability};
use super::response::{self, Code, Response, Status, StatusText, Untagged};
use super::tag::TagGenerator;
use super::ImapOptions;
use crate::auth::{run_chain, sasl};
use crate::connection::{
    DisconnectSignal, HandleContext, MailStream, Security, TlsUpgrade, Transport,
};
use crate::error::TlsError;
use crate::state::{ProtocolState, Requires};
use crate::{Error, Result};

/// State of the currently selected mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedMailbox {
    /// Mailbox name as passed to SELECT.
    pub name: String,
    /// Opened with EXAMINE or reported READ-ONLY.
    pub read_only: bool,
    /// Number of messages.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// UIDVALIDITY, if reported.
    pub uid_validity: Option<u32>,
    /// UIDNEXT, if reported.
    pub uid_next: Option<u32>,
    /// First unseen message, if reported.
    pub unseen: Option<u32>,
}

/// One FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Message sequence number.
    pub seq: u32,
    /// FLAGS, when requested or pushed.
    pub flags: Option<Vec<String>>,
    /// The response bytes, literals included.
    pub raw: Vec<u8>,
}

/// How STORE applies flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// `+FLAGS`
    Add,
    /// `-FLAGS`
    Remove,
    /// `FLAGS`
    Replace,
}

impl StoreMode {
    const fn item(self) -> &'static str {
        match self {
            Self::Add => "+FLAGS",
            Self::Remove => "-FLAGS",
            Self::Replace => "FLAGS",
        }
    }
}

/// Mailbox change observed while idling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxEvent {
    /// New message count.
    Exists(u32),
    /// New recent count.
    Recent(u32),
    /// Message removed.
    Expunge(u32),
    /// Flags of a message changed.
    FlagsChanged {
        /// Message sequence number.
        seq: u32,
        /// New flag list.
        flags: Vec<String>,
    },
}

/// Step of a SASL exchange.
#[derive(Debug)]
pub(crate) enum SaslStep {
    /// Decoded server challenge.
    Challenge(Vec<u8>),
    /// Tagged completion.
    Done(StatusText),
}

/// Completed command: untagged data plus the tagged status.
struct Completion {
    untagged: Vec<Untagged>,
    status: StatusText,
}

/// A single IMAP connection.
///
/// Commands are gated on [`ProtocolState`]: calling one in the wrong state
/// fails with [`Error::InvalidState`] before anything is sent.
pub struct ImapHandle<S = MailStream> {
    transport: Transport<S>,
    tags: TagGenerator,
    capabilities: Capabilities,
    options: ImapOptions,
    mailbox: Option<SelectedMailbox>,
    last_message: String,
    logging_out: bool,
}

impl<S> ImapHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Reads the server greeting from a connected stream.
    ///
    /// `* OK` leaves the handle `Connected`, `* PREAUTH` makes it
    /// `Authenticated`, `* BYE` is an error.
    pub async fn from_stream(stream: S, context: HandleContext, options: ImapOptions) -> Result<Self> {
        let mut handle = Self {
            transport: Transport::new(stream, context),
            tags: TagGenerator::default(),
            capabilities: Capabilities::default(),
            options,
            mailbox: None,
            last_message: String::new(),
            logging_out: false,
        };

        let raw = handle.transport.read_response().await?;
        let greeting = handle.parse(&raw)?;
        let Response::Untagged(Untagged::Status(status)) = greeting else {
            return Err(handle.protocol_error("expected server greeting"));
        };
        handle.apply_code(&status);
        handle.last_message.clone_from(&status.text);
        match status.status {
            Status::Ok => {}
            Status::PreAuth => handle.transport.set_state(ProtocolState::Authenticated),
            Status::Bye => {
                handle.transport.disconnect();
                return Err(Error::ServerDisconnected(status.text));
            }
            Status::No | Status::Bad => {
                return Err(handle.protocol_error("greeting is not OK"));
            }
        }
        tracing::debug!(host = %handle.transport.context().host, "IMAP greeting received");
        Ok(handle)
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> ProtocolState {
        self.transport.state()
    }

    /// Capabilities known so far.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// The selected mailbox, if any.
    #[must_use]
    pub const fn mailbox(&self) -> Option<&SelectedMailbox> {
        self.mailbox.as_ref()
    }

    /// Text of the last status response.
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

    pub(crate) const fn options(&self) -> &ImapOptions {
        &self.options
    }

    pub(crate) const fn context(&self) -> &HandleContext {
        self.transport.context()
    }

    /// Issues CAPABILITY and returns the refreshed set.
    pub async fn capability(&mut self) -> Result<&Capabilities> {
        self.execute("CAPABILITY", Requires::LIVE, "CAPABILITY")
            .await?;
        Ok(&self.capabilities)
    }

    pub(crate) async fn ensure_capabilities(&mut self) -> Result<()> {
        if self.capabilities.is_empty() {
            self.capability().await?;
        }
        Ok(())
    }

    /// Issues NOOP, collecting any pending mailbox updates.
    pub async fn noop(&mut self) -> Result<()> {
        self.execute("NOOP", Requires::LIVE, "NOOP").await?;
        Ok(())
    }

    /// Runs the authentication chain and enters `Authenticated`.
    pub async fn authenticate(&mut self) -> Result<()> {
        self.transport
            .require(Requires::CONNECTED, "AUTHENTICATE")?;
        self.ensure_capabilities().await?;
        run_chain(self, &ImapMechanism::CHAIN).await?;
        self.transport.set_state(ProtocolState::Authenticated);
        Ok(())
    }

    /// Opens `mailbox` read-write.
    pub async fn select(&mut self, mailbox: &str) -> Result<&SelectedMailbox> {
        self.open_mailbox("SELECT", mailbox).await
    }

    /// Opens `mailbox` read-only.
    pub async fn examine(&mut self, mailbox: &str) -> Result<&SelectedMailbox> {
        self.open_mailbox("EXAMINE", mailbox).await
    }

    async fn open_mailbox(&mut self, verb: &'static str, name: &str) -> Result<&SelectedMailbox> {
        self.transport.require(Requires::AUTHENTICATED, verb)?;
        // The server deselects the current mailbox as soon as it sees the
        // command, whatever the outcome.
        self.mailbox = Some(SelectedMailbox {
            name: name.to_string(),
            read_only: verb == "EXAMINE",
            ..SelectedMailbox::default()
        });
        let command = format!("{verb} {}", quote(name));
        match self.execute(verb, Requires::AUTHENTICATED, &command).await {
            Ok(done) => {
                let mut selected = self.mailbox.take().unwrap_or_default();
                for item in &done.untagged {
                    if let Untagged::Status(status) = item {
                        apply_mailbox_code(&mut selected, status.code.as_ref());
                    }
                }
                apply_mailbox_code(&mut selected, done.status.code.as_ref());
                tracing::debug!(mailbox = name, exists = selected.exists, "mailbox selected");
                self.transport.set_state(ProtocolState::Selected);
                Ok(self.mailbox.insert(selected))
            }
            Err(e) => {
                self.mailbox = None;
                if self.state() == ProtocolState::Selected {
                    self.transport.set_state(ProtocolState::Authenticated);
                }
                Err(e)
            }
        }
    }

    /// Fetches `items` for the messages in `sequence`.
    pub async fn fetch(&mut self, sequence: &str, items: &str) -> Result<Vec<FetchedMessage>> {
        let command = format!("FETCH {sequence} {items}");
        let done = self.execute("FETCH", Requires::SELECTED, &command).await?;
        Ok(done
            .untagged
            .into_iter()
            .filter_map(|item| match item {
                Untagged::Fetch { seq, flags, raw } => Some(FetchedMessage { seq, flags, raw }),
                _ => None,
            })
            .collect())
    }

    /// Searches the selected mailbox and returns matching sequence numbers.
    pub async fn search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        let command = format!("SEARCH {criteria}");
        let done = self.execute("SEARCH", Requires::SELECTED, &command).await?;
        Ok(done
            .untagged
            .into_iter()
            .filter_map(|item| match item {
                Untagged::Search(hits) => Some(hits),
                _ => None,
            })
            .flatten()
            .collect())
    }

    /// Changes flags of the messages in `sequence`.
    pub async fn store_flags(&mut self, sequence: &str, mode: StoreMode, flags: &[&str]) -> Result<()> {
        let command = format!("STORE {sequence} {} ({})", mode.item(), flags.join(" "));
        self.execute("STORE", Requires::SELECTED, &command).await?;
        Ok(())
    }

    /// Copies the messages in `sequence` to `mailbox`.
    pub async fn copy(&mut self, sequence: &str, mailbox: &str) -> Result<()> {
        let command = format!("COPY {sequence} {}", quote(mailbox));
        self.execute("COPY", Requires::SELECTED, &command).await?;
        Ok(())
    }

    /// Removes messages flagged `\Deleted` and returns their sequence numbers.
    pub async fn expunge(&mut self) -> Result<Vec<u32>> {
        let done = self.execute("EXPUNGE", Requires::SELECTED, "EXPUNGE").await?;
        Ok(done
            .untagged
            .iter()
            .filter_map(|item| match item {
                Untagged::Expunge(seq) => Some(*seq),
                _ => None,
            })
            .collect())
    }

    /// Appends `message` to `mailbox` with the given flags.
    pub async fn append(&mut self, mailbox: &str, flags: &[&str], message: &[u8]) -> Result<()> {
        self.transport.require(Requires::AUTHENTICATED, "APPEND")?;
        let tag = self.tags.next_tag();
        let non_sync = self.capabilities.has(&Capability::LiteralPlus);
        let mut command = format!("{tag} APPEND {}", quote(mailbox));
        if !flags.is_empty() {
            command.push_str(&format!(" ({})", flags.join(" ")));
        }
        command.push_str(&format!(
            " {{{}{}}}\r\n",
            message.len(),
            if non_sync { "+" } else { "" }
        ));

        if non_sync {
            let mut whole = command.into_bytes();
            whole.extend_from_slice(message);
            whole.extend_from_slice(b"\r\n");
            self.transport.send(&whole).await?;
        } else {
            self.transport.send(command.as_bytes()).await?;
            match self.next_step(&tag).await? {
                SaslStep::Challenge(_) => {}
                SaslStep::Done(status) => return Self::conclude(status).map(|_| ()),
            }
            let mut literal = message.to_vec();
            literal.extend_from_slice(b"\r\n");
            self.transport.send(&literal).await?;
        }
        self.finish(&tag).await.map(|_| ())
    }

    /// Waits up to `wait` for mailbox changes using IDLE.
    ///
    /// Returns as soon as the server reports something, or with an empty
    /// list once `wait` elapses.
    pub async fn idle(&mut self, wait: Duration) -> Result<Vec<MailboxEvent>> {
        self.transport.require(Requires::SELECTED, "IDLE")?;
        if !self.capabilities.has(&Capability::Idle) {
            return Err(Error::Unsupported("IDLE"));
        }
        let tag = self.tags.next_tag();
        self.transport.send(format!("{tag} IDLE\r\n").as_bytes()).await?;
        if let SaslStep::Done(status) = self.next_step(&tag).await? {
            return Self::conclude(status).map(|_| Vec::new());
        }

        let deadline = tokio::time::Instant::now() + wait;
        let mut events = Vec::new();
        while events.is_empty() {
            let Some(raw) = self.transport.read_response_until(deadline).await? else {
                break;
            };
            let response = self.parse(&raw)?;
            match response {
                Response::Untagged(item) => {
                    if let Some(event) = mailbox_event(&self.absorb(item)?) {
                        events.push(event);
                    }
                }
                Response::Tagged { tag: t, status } if t == tag => {
                    // Server ended IDLE on its own.
                    return Self::conclude(status).map(|_| events);
                }
                _ => return Err(self.protocol_error("unexpected response during IDLE")),
            }
        }

        self.transport.send(b"DONE\r\n").await?;
        let done = self.finish(&tag).await?;
        events.extend(done.untagged.iter().filter_map(mailbox_event));
        Ok(events)
    }

    /// Closes the selected mailbox, expunging deleted messages.
    pub async fn close(&mut self) -> Result<()> {
        self.execute("CLOSE", Requires::SELECTED, "CLOSE").await?;
        self.mailbox = None;
        self.transport.set_state(ProtocolState::Authenticated);
        Ok(())
    }

    /// Logs out and drops the connection.
    pub async fn logout(&mut self) -> Result<()> {
        self.transport.require(Requires::LIVE, "LOGOUT")?;
        self.logging_out = true;
        let result = self.execute("LOGOUT", Requires::LIVE, "LOGOUT").await;
        self.mailbox = None;
        self.transport.disconnect();
        result.map(|_| ())
    }

    /// Starts a SASL exchange. `initial` is sent inline when the server
    /// advertises SASL-IR, otherwise after the first (empty) challenge.
    pub(crate) async fn sasl_begin(
        &mut self,
        mechanism: &str,
        initial: Option<&[u8]>,
    ) -> Result<(String, SaslStep)> {
        self.transport.require(Requires::CONNECTED, "AUTHENTICATE")?;
        let tag = self.tags.next_tag();
        let inline = self.capabilities.has(&Capability::SaslIr);
        let line = match initial {
            Some(data) if inline => {
                let encoded = sasl::encode(data);
                let encoded = if encoded.is_empty() { "=".to_string() } else { encoded };
                format!("{tag} AUTHENTICATE {mechanism} {encoded}\r\n")
            }
            _ => format!("{tag} AUTHENTICATE {mechanism}\r\n"),
        };
        self.transport.send(line.as_bytes()).await?;

        let mut step = self.next_step(&tag).await?;
        if !inline
            && let Some(data) = initial
            && matches!(step, SaslStep::Challenge(_))
        {
            step = self.sasl_continue(&tag, data).await?;
        }
        Ok((tag, step))
    }

    /// Sends one base64 response line.
    pub(crate) async fn sasl_continue(&mut self, tag: &str, response: &[u8]) -> Result<SaslStep> {
        let line = format!("{}\r\n", sasl::encode(response));
        self.transport.send(line.as_bytes()).await?;
        self.next_step(tag).await
    }

    /// Aborts a SASL exchange with `*`.
    pub(crate) async fn sasl_cancel(&mut self, tag: &str) -> Result<StatusText> {
        self.transport.send(b"*\r\n").await?;
        Ok(self.read_until_tagged(tag).await?.status)
    }

    /// Sends LOGIN. Returns the tagged status without mapping NO/BAD to errors.
    pub(crate) async fn login(&mut self, user: &str, password: &str) -> Result<StatusText> {
        self.transport.require(Requires::CONNECTED, "LOGIN")?;
        let tag = self.tags.next_tag();
        let line = format!("{tag} LOGIN {} {}\r\n", quote(user), quote(password));
        self.transport.send(line.as_bytes()).await?;
        Ok(self.read_until_tagged(&tag).await?.status)
    }

    /// Records the outcome of a successful authentication exchange.
    pub(crate) fn authenticated_with(&mut self, status: &StatusText) {
        self.capabilities = Capabilities::default();
        self.apply_code(status);
        self.last_message.clone_from(&status.text);
    }

    async fn next_step(&mut self, tag: &str) -> Result<SaslStep> {
        loop {
            let raw = self.transport.read_response().await?;
            match self.parse(&raw)? {
                Response::Continuation(text) => {
                    // Some servers put plain text after "+".
                    let challenge = sasl::decode(&text).unwrap_or_else(|_| text.into_bytes());
                    return Ok(SaslStep::Challenge(challenge));
                }
                Response::Tagged { tag: t, status } if t == tag => {
                    self.last_message.clone_from(&status.text);
                    return Ok(SaslStep::Done(status));
                }
                Response::Tagged { tag: t, .. } => {
                    tracing::warn!(tag = %t, "ignoring response for unknown tag");
                }
                Response::Untagged(item) => {
                    self.absorb(item)?;
                }
            }
        }
    }

    async fn execute(
        &mut self,
        operation: &'static str,
        requires: Requires,
        command: &str,
    ) -> Result<Completion> {
        self.transport.require(requires, operation)?;
        let tag = self.tags.next_tag();
        self.transport
            .send(format!("{tag} {command}\r\n").as_bytes())
            .await?;
        self.finish(&tag).await
    }

    async fn finish(&mut self, tag: &str) -> Result<Completion> {
        let done = self.read_until_tagged(tag).await?;
        let status = Self::conclude(done.status)?;
        Ok(Completion {
            untagged: done.untagged,
            status,
        })
    }

    async fn read_until_tagged(&mut self, tag: &str) -> Result<Completion> {
        let mut untagged = Vec::new();
        loop {
            let raw = self.transport.read_response().await?;
            match self.parse(&raw)? {
                Response::Tagged { tag: t, status } if t == tag => {
                    self.apply_code(&status);
                    self.last_message.clone_from(&status.text);
                    return Ok(Completion { untagged, status });
                }
                Response::Tagged { tag: t, .. } => {
                    tracing::warn!(tag = %t, "ignoring response for unknown tag");
                }
                Response::Untagged(item) => untagged.push(self.absorb(item)?),
                Response::Continuation(_) => {
                    return Err(self.protocol_error("unexpected continuation request"));
                }
            }
        }
    }

    fn conclude(status: StatusText) -> Result<StatusText> {
        match status.status {
            Status::Ok => Ok(status),
            Status::No => Err(Error::No(status.text)),
            Status::Bad => Err(Error::Bad(status.text)),
            Status::PreAuth | Status::Bye => {
                Err(Error::Protocol(format!("tagged {:?} response", status.status)))
            }
        }
    }

    /// Applies side effects of an untagged response and hands it back.
    fn absorb(&mut self, item: Untagged) -> Result<Untagged> {
        let observers = &self.transport.context().observers;
        match &item {
            Untagged::Status(status) if status.status == Status::Bye => {
                if !self.logging_out {
                    tracing::info!(text = %status.text, "server closed the connection");
                    self.last_message.clone_from(&status.text);
                    self.mailbox = None;
                    self.transport.disconnect();
                    return Err(Error::ServerDisconnected(status.text.clone()));
                }
            }
            Untagged::Status(status) => {
                if status.code == Some(Code::Alert) {
                    observers.alert(&status.text);
                } else {
                    observers.info(&status.text);
                }
                self.apply_code(status);
            }
            Untagged::Capability(caps) => self.capabilities = caps.clone(),
            Untagged::Exists(count) => {
                observers.exists(*count);
                if let Some(mailbox) = self.mailbox.as_mut() {
                    mailbox.exists = *count;
                }
            }
            Untagged::Recent(count) => {
                if let Some(mailbox) = self.mailbox.as_mut() {
                    mailbox.recent = *count;
                }
            }
            Untagged::Expunge(seq) => {
                observers.expunge(*seq);
                if let Some(mailbox) = self.mailbox.as_mut() {
                    mailbox.exists = mailbox.exists.saturating_sub(1);
                }
            }
            Untagged::Fetch {
                seq,
                flags: Some(flags),
                ..
            } => observers.flags_changed(*seq, flags),
            Untagged::Fetch { .. }
            | Untagged::Search(_)
            | Untagged::Flags(_)
            | Untagged::Other(_) => {}
        }
        Ok(item)
    }

    fn apply_code(&mut self, status: &StatusText) {
        if let Some(Code::Capability(caps)) = &status.code {
            self.capabilities = caps.clone();
        }
    }

    fn parse(&mut self, raw: &[u8]) -> Result<Response> {
        response::parse(raw).map_err(|e| self.transport.fail(e))
    }

    fn protocol_error(&mut self, message: &str) -> Error {
        self.transport.fail(Error::Protocol(message.to_string()))
    }
}

impl<S> ImapHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + TlsUpgrade,
{
    /// Upgrades the connection with STARTTLS and re-reads capabilities.
    ///
    /// Any failure after the server accepted the command leaves the handle
    /// `Disconnected`.
    pub async fn start_tls(&mut self) -> Result<()> {
        self.transport.require(Requires::CONNECTED, "STARTTLS")?;
        if self.transport.stream().is_some_and(TlsUpgrade::is_tls) {
            return Err(TlsError::AlreadyEncrypted.into());
        }
        self.ensure_capabilities().await?;
        if !self.capabilities.has(&Capability::StartTls) {
            return Err(TlsError::NotOffered.into());
        }
        self.execute("STARTTLS", Requires::CONNECTED, "STARTTLS")
            .await?;

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

        self.capabilities = Capabilities::default();
        self.capability().await?;
        Ok(())
    }

    /// Brings a freshly greeted handle to `Authenticated`: STARTTLS as
    /// `security` asks, then the authentication chain.
    pub async fn establish(&mut self, security: Security) -> Result<()> {
        if self.state() == ProtocolState::Connected && security.wants_starttls() {
            self.ensure_capabilities().await?;
            if self.capabilities.has(&Capability::StartTls) {
                self.start_tls().await?;
            } else if security == Security::StartTls {
                tracing::warn!(host = %self.context().host, "server does not offer STARTTLS");
                self.transport.disconnect();
                return Err(TlsError::NotOffered.into());
            } else {
                tracing::info!(host = %self.context().host, "STARTTLS not offered, staying in plaintext");
            }
        }
        if self.state() == ProtocolState::Connected {
            self.authenticate().await?;
        }
        Ok(())
    }
}

fn apply_mailbox_code(mailbox: &mut SelectedMailbox, code: Option<&Code>) {
    match code {
        Some(Code::UidValidity(v)) => mailbox.uid_validity = Some(*v),
        Some(Code::UidNext(v)) => mailbox.uid_next = Some(*v),
        Some(Code::Unseen(v)) => mailbox.unseen = Some(*v),
        Some(Code::ReadOnly) => mailbox.read_only = true,
        Some(Code::ReadWrite) => mailbox.read_only = false,
        _ => {}
    }
}

fn mailbox_event(item: &Untagged) -> Option<MailboxEvent> {
    match item {
        Untagged::Exists(n) => Some(MailboxEvent::Exists(*n)),
        Untagged::Recent(n) => Some(MailboxEvent::Recent(*n)),
        Untagged::Expunge(n) => Some(MailboxEvent::Expunge(*n)),
        Untagged::Fetch {
            seq,
            flags: Some(flags),
            ..
        } => Some(MailboxEvent::FlagsChanged {
            seq: *seq,
            flags: flags.clone(),
        }),
        _ => None,
    }
}

/// Quotes an IMAP string argument.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use std::sync::Arc;

    use tokio_test::io::Builder;

    use super::*;
    use crate::callbacks::StaticCredentials;

    fn context() -> HandleContext {
        HandleContext::new("imap.example.com", Arc::new(StaticCredentials::new("u", "p")))
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[tokio::test]
    async fn test_preauth_greeting_skips_authentication() {
        let mock = Builder::new().read(b"* PREAUTH [CAPABILITY IMAP4rev1] hi\r\n").build();
        let handle = ImapHandle::from_stream(mock, context(), ImapOptions::default())
            .await
            .unwrap();
        assert_eq!(handle.state(), ProtocolState::Authenticated);
        assert!(handle.capabilities().has(&Capability::Imap4Rev1));
    }

    #[tokio::test]
    async fn test_bye_greeting_is_refused() {
        let mock = Builder::new().read(b"* BYE too many connections\r\n").build();
        let result = ImapHandle::from_stream(mock, context(), ImapOptions::default()).await;
        assert!(matches!(result, Err(Error::ServerDisconnected(text)) if text == "too many connections"));
    }

    #[tokio::test]
    async fn test_fetch_before_select_sends_nothing() {
        let mock = Builder::new().read(b"* PREAUTH ready\r\n").build();
        let mut handle = ImapHandle::from_stream(mock, context(), ImapOptions::default())
            .await
            .unwrap();
        let err = handle.fetch("1:*", "(FLAGS)").await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "FETCH",
                actual: ProtocolState::Authenticated,
                ..
            }
        ));
        assert_eq!(handle.state(), ProtocolState::Authenticated);
    }

    #[tokio::test]
    async fn test_unsolicited_bye_disconnects() {
        let mock = Builder::new()
            .read(b"* PREAUTH ready\r\n")
            .write(b"A0001 NOOP\r\n")
            .read(b"* BYE shutting down\r\n")
            .build();
        let mut handle = ImapHandle::from_stream(mock, context(), ImapOptions::default())
            .await
            .unwrap();
        let err = handle.noop().await.unwrap_err();
        assert!(matches!(err, Error::ServerDisconnected(_)));
        assert_eq!(handle.state(), ProtocolState::Disconnected);
        assert!(!handle.is_connected());
        assert!(matches!(handle.noop().await, Err(Error::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_no_response_keeps_connection() {
        let mock = Builder::new()
            .read(b"* PREAUTH ready\r\n")
            .write(b"A0001 SELECT \"Missing\"\r\n")
            .read(b"A0001 NO [NONEXISTENT] no such mailbox\r\n")
            .build();
        let mut handle = ImapHandle::from_stream(mock, context(), ImapOptions::default())
            .await
            .unwrap();
        let err = handle.select("Missing").await.unwrap_err();
        assert!(matches!(err, Error::No(ref text) if text == "no such mailbox"));
        assert_eq!(handle.state(), ProtocolState::Authenticated);
        assert!(handle.mailbox().is_none());
        assert_eq!(handle.last_message(), "no such mailbox");
    }
}
