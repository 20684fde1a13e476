//! `mailreach check`: message counts per account.

use anyhow::{Context, Result, bail};

use crate::accounts::{Account, AccountProtocol};
use crate::pools::Pools;

/// What a server reported for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub messages: u32,
    pub recent: Option<u32>,
    pub octets: Option<u64>,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} messages", self.messages)?;
        if let Some(recent) = self.recent {
            write!(f, ", {recent} recent")?;
        }
        if let Some(octets) = self.octets {
            write!(f, ", {octets} octets")?;
        }
        Ok(())
    }
}

/// Checks each account in turn. Failures are reported and do not stop the
/// remaining accounts.
pub async fn run(pools: &Pools, accounts: &[&Account]) -> Result<()> {
    let mut failed = 0usize;
    for account in accounts {
        match check(pools, account).await {
            Ok(summary) => println!("{}: {summary}", account.name),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {e:#}", account.name);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} accounts could not be checked", accounts.len());
    }
    Ok(())
}

async fn check(pools: &Pools, account: &Account) -> Result<Summary> {
    let identity = account.identity();
    match account.protocol {
        AccountProtocol::Imap => {
            let mut imap = pools
                .imap(account)
                .acquire_required(None)
                .await
                .with_context(|| format!("connecting to {identity}"))?;
            let mailbox = imap
                .examine(&account.mailbox)
                .await
                .with_context(|| format!("opening {}", account.mailbox))?;
            let summary = Summary {
                messages: mailbox.exists,
                recent: Some(mailbox.recent),
                octets: None,
            };
            imap.close().await?;
            Ok(summary)
        }
        AccountProtocol::Pop3 => {
            let mut pop = pools
                .pop3(account)
                .acquire_required(None)
                .await
                .with_context(|| format!("connecting to {identity}"))?;
            let (messages, octets) = pop.stat().await?;
            Ok(Summary {
                messages,
                recent: None,
                octets: Some(octets),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let imap = Summary {
            messages: 12,
            recent: Some(2),
            octets: None,
        };
        assert_eq!(imap.to_string(), "12 messages, 2 recent");

        let pop = Summary {
            messages: 3,
            recent: None,
            octets: Some(4096),
        };
        assert_eq!(pop.to_string(), "3 messages, 4096 octets");
    }
}
