//! `mailreach` - check and download mail over pooled IMAP and POP3
//! connections.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod accounts;
mod check;
mod fetch;
mod interact;
mod pools;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use accounts::AccountsFile;
use fetch::FetchOptions;
use pools::Pools;

#[derive(Parser)]
#[command(name = "mailreach", version)]
#[command(about = "Check and download mail from IMAP and POP3 servers", long_about = None)]
struct Cli {
    /// Accounts file [default: <config dir>/mailreach/accounts.json]
    #[arg(short, long, global = true)]
    accounts: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List configured accounts
    Accounts,
    /// Show message counts
    Check {
        /// Only check this account
        account: Option<String>,
    },
    /// Download the messages of a POP3 account
    Fetch {
        /// Account to download from
        account: String,
        /// Directory receiving one .eml file per message
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Delete messages from the server once saved
        #[arg(long)]
        delete: bool,
        /// Download at most this many messages
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailreach=info,mailreach_proto=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let path = cli.accounts.unwrap_or_else(accounts::default_path);
    let file = AccountsFile::load(&path).await?;

    let pools = Pools::new(file.pool_config());
    let result = match cli.command {
        Command::Accounts => {
            for account in &file.accounts {
                println!("{:<16} {:?}  {}", account.name, account.protocol, account.identity());
            }
            Ok(())
        }
        Command::Check { account } => {
            let selected = file.select(account.as_deref())?;
            check::run(&pools, &selected).await
        }
        Command::Fetch {
            account,
            output,
            delete,
            limit,
        } => {
            let options = FetchOptions {
                output,
                delete,
                limit,
            };
            fetch::run(&pools, file.find(&account)?, &options).await
        }
    };
    pools.close_all();
    result
}
