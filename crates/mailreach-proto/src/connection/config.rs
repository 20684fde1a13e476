//! Connection configuration types.

use std::time::Duration;

/// Mail retrieval protocol spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// IMAP4rev1.
    Imap,
    /// POP3.
    Pop3,
}

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption. **Not recommended for production.**
    None,
    /// Upgrade with STARTTLS when the server offers it, plaintext otherwise.
    Opportunistic,
    /// Start with plaintext and require a STARTTLS upgrade.
    StartTls,
    /// TLS from the first byte. **Recommended.**
    #[default]
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self, protocol: Protocol) -> u16 {
        match (protocol, self) {
            (Protocol::Imap, Self::Implicit) => 993,
            (Protocol::Imap, _) => 143,
            (Protocol::Pop3, Self::Implicit) => 995,
            (Protocol::Pop3, _) => 110,
        }
    }

    /// Returns true if STARTTLS should be attempted after the greeting.
    #[must_use]
    pub const fn wants_starttls(self) -> bool {
        matches!(self, Self::Opportunistic | Self::StartTls)
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Protocol spoken on the connection.
    pub protocol: Protocol,
    /// Security mode.
    pub security: Security,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read/write timeout.
    pub io_timeout: Duration,
}

impl Config {
    /// Creates an IMAP configuration with implicit TLS on port 993.
    #[must_use]
    pub fn imap(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host, Protocol::Imap).build()
    }

    /// Creates a POP3 configuration with implicit TLS on port 995.
    #[must_use]
    pub fn pop3(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host, Protocol::Pop3).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>, protocol: Protocol) -> ConfigBuilder {
        ConfigBuilder::new(host, protocol)
    }

    /// Returns `host:port` suitable for connecting.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the host, with `:port` appended when it is not the default.
    #[must_use]
    pub fn display_host(&self) -> String {
        if self.port == self.security.default_port(self.protocol) {
            self.host.clone()
        } else {
            self.address()
        }
    }
}

/// Builder for connection configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    protocol: Protocol,
    security: Security,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ConfigBuilder {
    /// Creates a new builder.
    ///
    /// A `host:port` string sets both fields.
    #[must_use]
    pub fn new(host: impl Into<String>, protocol: Protocol) -> Self {
        let host = host.into();
        let (host, port) = split_host_port(&host);
        Self {
            host,
            port,
            protocol,
            security: Security::Implicit,
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(60),
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            host: self.host,
            port: self
                .port
                .unwrap_or_else(|| self.security.default_port(self.protocol)),
            protocol: self.protocol,
            security: self.security,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        }
    }
}

fn split_host_port(host: &str) -> (String, Option<u16>) {
    if let Some((name, port)) = host.rsplit_once(':')
        && !name.contains(':')
        && let Ok(port) = port.parse()
    {
        return (name.to_string(), Some(port));
    }
    (host.to_string(), None)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(Security::None.default_port(Protocol::Imap), 143);
        assert_eq!(Security::StartTls.default_port(Protocol::Imap), 143);
        assert_eq!(Security::Implicit.default_port(Protocol::Imap), 993);
        assert_eq!(Security::Opportunistic.default_port(Protocol::Pop3), 110);
        assert_eq!(Security::Implicit.default_port(Protocol::Pop3), 995);
    }

    #[test]
    fn test_builder_security_changes_port() {
        let config = Config::builder("pop.example.com", Protocol::Pop3)
            .security(Security::StartTls)
            .build();
        assert_eq!(config.port, 110);
        assert_eq!(config.display_host(), "pop.example.com");
    }

    #[test]
    fn test_host_with_port() {
        let config = Config::imap("imap.example.com:1993");
        assert_eq!(config.host, "imap.example.com");
        assert_eq!(config.port, 1993);
        assert_eq!(config.display_host(), "imap.example.com:1993");
        assert_eq!(config.address(), "imap.example.com:1993");
    }

    #[test]
    fn test_ipv6_literal_kept_whole() {
        let config = Config::imap("::1");
        assert_eq!(config.host, "::1");
        assert_eq!(config.port, 993);
    }

    #[test]
    fn test_timeouts() {
        let config = Config::builder("imap.example.com", Protocol::Imap)
            .connect_timeout(Duration::from_secs(5))
            .io_timeout(Duration::from_secs(7))
            .build();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.io_timeout, Duration::from_secs(7));
    }
}
