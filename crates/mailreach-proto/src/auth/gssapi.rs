//! Pluggable GSSAPI security contexts.
//!
//! Kerberos support lives outside this crate. An application that has it
//! supplies a [`GssapiProvider`]; the IMAP chain then frames the tokens the
//! provider produces. Without a provider the GSSAPI mechanism is skipped.

/// Factory for GSSAPI security contexts.
pub trait GssapiProvider: Send + Sync {
    /// Starts a context for `service@host` (e.g. `imap@mail.example.com`).
    fn start(&self, service: &str, host: &str) -> Result<Box<dyn GssapiContext>, String>;
}

/// One in-progress GSSAPI exchange.
pub trait GssapiContext: Send {
    /// Consumes a server token (empty on the first call) and returns the
    /// next client token.
    fn step(&mut self, server_token: &[u8]) -> Result<Vec<u8>, String>;
}
