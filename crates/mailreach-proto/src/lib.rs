//! # mailreach-proto
//!
//! Client-side mail retrieval connections for IMAP4rev1 and POP3.
//!
//! ## Features
//!
//! - **Connection pools** per account, with owner affinity, a soft
//!   connection cap, idle reclamation and an offline switch
//! - **Authentication chains** tried strongest first: ANONYMOUS, GSSAPI,
//!   CRAM-MD5, PLAIN and LOGIN for IMAP; APOP and USER/PASS for POP3
//! - **TLS via rustls**: implicit TLS or STARTTLS/STLS, with host name
//!   checks against the certificate and a user override on failure
//! - **State-gated commands**: every operation declares the protocol states
//!   it may run in and fails before touching the wire otherwise
//! - **POP3 pipelining**: RETR/DELE requests written at once and answered
//!   in batches through per-request callbacks
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mailreach_proto::pool::{PoolConfig, PoolRegistry, ServerIdentity};
//! use mailreach_proto::{Config, ImapConnector, StaticCredentials};
//!
//! #[tokio::main]
//! async fn main() -> mailreach_proto::Result<()> {
//!     let callbacks = Arc::new(StaticCredentials::new("alice", "secret"));
//!     let config = Config::imap("imap.example.com");
//!     let registry = PoolRegistry::new(PoolConfig::default());
//!
//!     let identity = ServerIdentity::new("alice", config.display_host());
//!     let pool = registry.get_or_create(&identity, || ImapConnector::new(config, callbacks));
//!
//!     let mut imap = pool.acquire_required(None).await?;
//!     let inbox = imap.select("INBOX").await?;
//!     println!("{} messages", inbox.exists);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`connection`]: configuration, sockets, framing and per-handle transport
//! - [`tls`]: TLS context, handshake and server identity checks
//! - [`auth`]: mechanism chain and SASL helpers
//! - [`imap`]: IMAP handle
//! - [`pop3`]: POP3 handle and request pipeliner
//! - [`pool`]: connection pools and the pool registry

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod callbacks;
pub mod connection;
mod error;
pub mod imap;
pub mod observer;
pub mod pool;
pub mod pop3;
pub mod state;
pub mod tls;

pub use callbacks::{Credentials, StaticCredentials, UserCallbacks};
pub use connection::{Config, ConfigBuilder, MailStream, Protocol, Security};
pub use error::{AuthError, Error, Result, TlsError};
pub use imap::{ImapConnector, ImapHandle, ImapOptions};
pub use observer::{Direction, HandleObserver, Observers};
pub use pool::{ConnectionPool, Lease, OwnerToken, PoolConfig, PoolRegistry, ServerIdentity};
pub use pop3::{Pop3Connector, Pop3Handle, Pop3Options, PopEvent, RequestKind};
pub use state::ProtocolState;
