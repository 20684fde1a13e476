//! The accounts file.
//!
//! ```json
//! {
//!   "max_connections": 4,
//!   "accounts": [
//!     { "name": "work", "protocol": "imap", "host": "imap.example.com",
//!       "username": "alice", "mailbox": "INBOX" },
//!     { "name": "home", "protocol": "pop3", "host": "pop.example.net:1110",
//!       "security": "starttls", "username": "alice", "filter_cr": true }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use mailreach_proto::{Config, PoolConfig, Pop3Options, Protocol, Security, ServerIdentity};

/// Protocol of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountProtocol {
    /// IMAP4rev1.
    Imap,
    /// POP3.
    Pop3,
}

/// Transport security of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSecurity {
    /// TLS from the first byte.
    #[default]
    Tls,
    /// Plaintext, upgraded with STARTTLS/STLS.
    StartTls,
    /// STARTTLS/STLS when offered.
    Opportunistic,
    /// Plaintext.
    None,
}

impl From<AccountSecurity> for Security {
    fn from(security: AccountSecurity) -> Self {
        match security {
            AccountSecurity::Tls => Self::Implicit,
            AccountSecurity::StartTls => Self::StartTls,
            AccountSecurity::Opportunistic => Self::Opportunistic,
            AccountSecurity::None => Self::None,
        }
    }
}

/// One configured mail account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Name used on the command line.
    pub name: String,
    /// Protocol spoken to the server.
    pub protocol: AccountProtocol,
    /// Server, optionally as `host:port`.
    pub host: String,
    /// Port, when not part of `host` and not the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Transport security.
    #[serde(default)]
    pub security: AccountSecurity,
    /// Login name.
    pub username: String,
    /// Password; prompted for when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// IMAP mailbox to check.
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// Never try APOP (POP3).
    #[serde(default)]
    pub disable_apop: bool,
    /// Store retrieved messages with LF line endings (POP3).
    #[serde(default)]
    pub filter_cr: bool,
    /// Replies read per pipelined round (POP3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_depth: Option<usize>,
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

impl Account {
    /// Connection settings for this account.
    pub fn config(&self) -> Config {
        let protocol = match self.protocol {
            AccountProtocol::Imap => Protocol::Imap,
            AccountProtocol::Pop3 => Protocol::Pop3,
        };
        let mut builder = Config::builder(&self.host, protocol).security(self.security.into());
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        builder.build()
    }

    /// Key of this account's connection pool.
    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity::new(&self.username, self.config().display_host())
    }

    /// POP3 handle settings.
    pub const fn pop3_options(&self) -> Pop3Options {
        Pop3Options {
            disable_apop: self.disable_apop,
            filter_cr: self.filter_cr,
            pipeline_depth: self.pipeline_depth,
        }
    }
}

/// Contents of the accounts file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsFile {
    /// Connections per account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    /// Configured accounts.
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// `<config dir>/mailreach/accounts.json`.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailreach")
        .join("accounts.json")
}

impl AccountsFile {
    /// Reads and parses the accounts file at `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading accounts from {}", path.display()))?;
        let file = Self::parse(&contents)
            .with_context(|| format!("parsing accounts in {}", path.display()))?;
        tracing::debug!(path = %path.display(), accounts = file.accounts.len(), "accounts loaded");
        Ok(file)
    }

    fn parse(contents: &str) -> Result<Self> {
        let file: Self = serde_json::from_str(contents)?;
        for (i, account) in file.accounts.iter().enumerate() {
            if file.accounts[..i].iter().any(|a| a.name == account.name) {
                bail!("account {:?} is defined twice", account.name);
            }
        }
        Ok(file)
    }

    /// Looks up an account by name.
    pub fn find(&self, name: &str) -> Result<&Account> {
        self.accounts
            .iter()
            .find(|a| a.name == name)
            .with_context(|| format!("no account named {name:?}"))
    }

    /// The named account, or every account when `name` is `None`.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&Account>> {
        match name {
            Some(name) => Ok(vec![self.find(name)?]),
            None if self.accounts.is_empty() => bail!("no accounts configured"),
            None => Ok(self.accounts.iter().collect()),
        }
    }

    /// Pool limits for every account.
    pub fn pool_config(&self) -> PoolConfig {
        let defaults = PoolConfig::default();
        PoolConfig {
            max_connections: self.max_connections.unwrap_or(defaults.max_connections),
            ..defaults
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "max_connections": 4,
        "accounts": [
            { "name": "work", "protocol": "imap", "host": "imap.example.com",
              "username": "alice" },
            { "name": "home", "protocol": "pop3", "host": "pop.example.net:1110",
              "security": "starttls", "username": "alice", "password": "secret",
              "filter_cr": true, "pipeline_depth": 8 }
        ]
    }"#;

    #[test]
    fn test_defaults_fill_in() {
        let file = AccountsFile::parse(SAMPLE).unwrap();
        let work = file.find("work").unwrap();

        assert_eq!(work.security, AccountSecurity::Tls);
        assert_eq!(work.mailbox, "INBOX");
        assert!(work.password.is_none());

        let config = work.config();
        assert_eq!(config.port, 993);
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(work.identity().to_string(), "alice@imap.example.com");
    }

    #[test]
    fn test_pop3_account_settings() {
        let file = AccountsFile::parse(SAMPLE).unwrap();
        let home = file.find("home").unwrap();

        let config = home.config();
        assert_eq!(config.host, "pop.example.net");
        assert_eq!(config.port, 1110);
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(home.identity().host, "pop.example.net:1110");

        let options = home.pop3_options();
        assert!(options.filter_cr);
        assert!(!options.disable_apop);
        assert_eq!(options.pipeline_depth, Some(8));
    }

    #[test]
    fn test_select_accounts() {
        let file = AccountsFile::parse(SAMPLE).unwrap();
        assert_eq!(file.select(None).unwrap().len(), 2);
        assert_eq!(file.select(Some("home")).unwrap()[0].name, "home");
        assert!(file.select(Some("missing")).is_err());
        assert!(AccountsFile::default().select(None).is_err());
    }

    #[test]
    fn test_pool_config() {
        let file = AccountsFile::parse(SAMPLE).unwrap();
        assert_eq!(file.pool_config().max_connections, 4);
        assert_eq!(AccountsFile::default().pool_config(), PoolConfig::default());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let twice = r#"{ "accounts": [
            { "name": "a", "protocol": "imap", "host": "h", "username": "u" },
            { "name": "a", "protocol": "pop3", "host": "h", "username": "u" }
        ] }"#;
        assert!(AccountsFile::parse(twice).is_err());
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let bad = r#"{ "accounts": [
            { "name": "a", "protocol": "smtp", "host": "h", "username": "u" }
        ] }"#;
        assert!(AccountsFile::parse(bad).is_err());
    }
}
