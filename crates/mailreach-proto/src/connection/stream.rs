//! Stream types for mail server connections.

#![allow(clippy::missing_errors_doc)]

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use super::Config;
use crate::callbacks::UserCallbacks;
use crate::error::TlsError;
use crate::{Error, Result, tls};

/// A stream that can be either plaintext or TLS.
pub enum MailStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

/// Streams that can be switched to TLS in place (STARTTLS).
pub trait TlsUpgrade: Sized {
    /// Performs the handshake and identity checks over this stream.
    fn upgrade_to_tls(
        self,
        host: &str,
        callbacks: &dyn UserCallbacks,
    ) -> impl Future<Output = Result<Self>> + Send;

    /// Returns true if the stream is already encrypted.
    fn is_tls(&self) -> bool;
}

impl MailStream {
    /// Creates a new plaintext stream.
    pub const fn plain(stream: TcpStream) -> Self {
        Self::Plain(stream)
    }

    /// Creates a new TLS stream.
    pub fn tls(stream: TlsStream<TcpStream>) -> Self {
        Self::Tls(Box::new(stream))
    }
}

impl TlsUpgrade for MailStream {
    async fn upgrade_to_tls(self, host: &str, callbacks: &dyn UserCallbacks) -> Result<Self> {
        match self {
            Self::Plain(tcp) => {
                let tls = tls::handshake(tcp, host, callbacks).await?;
                Ok(Self::tls(tls))
            }
            Self::Tls(_) => Err(TlsError::AlreadyEncrypted.into()),
        }
    }

    fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Opens a TCP connection, bounded by the configured connect timeout.
pub async fn connect_plain(config: &Config) -> Result<MailStream> {
    let address = config.address();
    tracing::debug!(%address, "opening connection");
    let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| Error::Timeout(config.connect_timeout))??;
    tcp.set_nodelay(true)?;
    Ok(MailStream::plain(tcp))
}

/// Opens a connection and, for implicit TLS, completes the handshake.
pub async fn connect(config: &Config, callbacks: &dyn UserCallbacks) -> Result<MailStream> {
    let stream = connect_plain(config).await?;
    if config.security == super::Security::Implicit {
        return stream.upgrade_to_tls(&config.host, callbacks).await;
    }
    Ok(stream)
}
