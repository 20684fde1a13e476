//! Connection pools for the configured accounts.

use std::sync::Arc;

use mailreach_proto::{ConnectionPool, ImapConnector, PoolConfig, PoolRegistry, Pop3Connector};

use crate::accounts::Account;
use crate::interact::{self, Prompt};

/// One registry per protocol.
pub struct Pools {
    imap: PoolRegistry<ImapConnector>,
    pop3: PoolRegistry<Pop3Connector>,
}

impl Pools {
    /// Creates empty registries whose pools use `config`.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            imap: PoolRegistry::new(config),
            pop3: PoolRegistry::new(config),
        }
    }

    /// IMAP pool of `account`.
    pub fn imap(&self, account: &Account) -> ConnectionPool<ImapConnector> {
        self.imap.get_or_create(&account.identity(), || {
            ImapConnector::new(account.config(), Arc::new(Prompt::new(account)))
                .observers(interact::observers(account))
        })
    }

    /// POP3 pool of `account`.
    pub fn pop3(&self, account: &Account) -> ConnectionPool<Pop3Connector> {
        self.pop3.get_or_create(&account.identity(), || {
            Pop3Connector::new(account.config(), Arc::new(Prompt::new(account)))
                .observers(interact::observers(account))
                .options(account.pop3_options())
        })
    }

    /// Takes every pool offline.
    pub fn close_all(&self) {
        self.imap.close_all();
        self.pop3.close_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;
    use crate::accounts::{AccountProtocol, AccountSecurity};

    fn account(name: &str, username: &str) -> Account {
        Account {
            name: name.into(),
            protocol: AccountProtocol::Imap,
            host: "imap.example.com".into(),
            port: None,
            security: AccountSecurity::Tls,
            username: username.into(),
            password: Some("secret".into()),
            mailbox: "INBOX".into(),
            disable_apop: false,
            filter_cr: false,
            pipeline_depth: None,
        }
    }

    #[tokio::test]
    async fn test_accounts_share_pools_by_identity() {
        let pools = Pools::new(PoolConfig::default());
        pools.imap(&account("work", "alice"));
        pools.imap(&account("work-again", "alice"));
        pools.imap(&account("other", "bob"));

        assert_eq!(pools.imap.len(), 2);
        assert!(pools.pop3.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_takes_pools_offline() {
        let pools = Pools::new(PoolConfig::default());
        let pool = pools.pop3(&account("home", "alice"));
        pools.close_all();
        assert!(pool.is_offline());
    }
}
