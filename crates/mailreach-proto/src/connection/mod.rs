//! Connection management.
//!
//! This module provides:
//! - [`Config`] and [`ConfigBuilder`] for connection settings
//! - [`MailStream`] for plaintext or TLS sockets
//! - [`FramedStream`] for CRLF line and literal framing
//! - [`Transport`] tying a stream to its protocol state and I/O policy

mod config;
mod framed;
mod signal;
mod stream;
mod transport;

pub use config::{Config, ConfigBuilder, Protocol, Security};
pub use framed::FramedStream;
pub use signal::DisconnectSignal;
pub use stream::{MailStream, TlsUpgrade, connect, connect_plain};
pub use transport::{HandleContext, Transport};
