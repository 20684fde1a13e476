//! TLS negotiation with post-handshake verification.
//!
//! The client context is built once per process and shared. After each
//! handshake the server certificate is checked in two steps:
//!
//! 1. the hostname against the certificate's DNS names (or its common name
//!    when it has none),
//! 2. if the name matches, the chain against the bundled web PKI roots.
//!
//! A failure at either step is offered to
//! [`UserCallbacks::verify_tls_failure`]; only a clean result or an explicit
//! override lets the connection proceed. The negotiated cipher must also be
//! stronger than 40 bits unless [`UserCallbacks::weak_cipher`] accepts it.

mod identity;
mod verifier;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{CipherSuite, ClientConfig, ClientConnection, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

pub use identity::{CertificateNames, check_identity, host_matches, strip_port};

use crate::callbacks::UserCallbacks;
use crate::error::TlsError;

/// Why a server certificate was not trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateFailure {
    /// No certificate name matches the host.
    HostnameMismatch {
        /// Host that was dialled, without port.
        host: String,
        /// Names the certificate offered.
        names: Vec<String>,
    },
    /// The chain does not lead to a trusted root, or is expired or revoked.
    Untrusted(String),
    /// The certificate could not be parsed.
    Malformed(String),
}

impl fmt::Display for CertificateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostnameMismatch { host, names } => write!(
                f,
                "certificate names [{}] do not match {host}",
                names.join(", ")
            ),
            Self::Untrusted(reason) => write!(f, "untrusted certificate: {reason}"),
            Self::Malformed(reason) => write!(f, "malformed certificate: {reason}"),
        }
    }
}

/// Process-wide client TLS state.
#[derive(Debug)]
pub struct TlsContext {
    config: Arc<ClientConfig>,
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
}

static SHARED: Mutex<Option<Arc<TlsContext>>> = Mutex::new(None);

impl TlsContext {
    /// Returns the shared context, building it on first use.
    pub fn shared() -> Result<Arc<Self>, TlsError> {
        let mut slot = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(context) = slot.as_ref() {
            return Ok(Arc::clone(context));
        }
        let context = Arc::new(Self::build()?);
        tracing::debug!("initialised TLS client context");
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    fn build() -> Result<Self, TlsError> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier::DeferredVerifier::new(
                Arc::clone(&provider),
            )))
            .with_no_client_auth();
        Ok(Self {
            config: Arc::new(config),
            roots,
            provider,
        })
    }

    /// Verifies identity first, then the chain.
    pub fn verify_peer(
        &self,
        host: &str,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> Result<(), CertificateFailure> {
        check_identity(host, end_entity.as_ref())?;
        let parsed = ParsedCertificate::try_from(end_entity)
            .map_err(|e| CertificateFailure::Malformed(e.to_string()))?;
        verify_server_cert_signed_by_trust_anchor(
            &parsed,
            &self.roots,
            intermediates,
            UnixTime::now(),
            self.provider.signature_verification_algorithms.all,
        )
        .map_err(|e| CertificateFailure::Untrusted(e.to_string()))
    }
}

/// Runs a client handshake over `tcp` and verifies the result.
///
/// On any error the socket is dropped.
pub async fn handshake(
    tcp: TcpStream,
    host: &str,
    callbacks: &dyn UserCallbacks,
) -> Result<TlsStream<TcpStream>, TlsError> {
    let context = TlsContext::shared()?;
    let server_name = ServerName::try_from(strip_port(host).to_string())?;
    let connector = TlsConnector::from(Arc::clone(&context.config));
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(TlsError::Handshake)?;

    verify_session(&context, host, stream.get_ref().1, callbacks)?;
    tracing::info!(host, "TLS established");
    Ok(stream)
}

fn verify_session(
    context: &TlsContext,
    host: &str,
    session: &ClientConnection,
    callbacks: &dyn UserCallbacks,
) -> Result<(), TlsError> {
    let Some((end_entity, intermediates)) = session
        .peer_certificates()
        .and_then(<[CertificateDer<'static>]>::split_first)
    else {
        return Err(TlsError::NoPeerCertificate);
    };

    if let Err(failure) = context.verify_peer(host, end_entity, intermediates) {
        tracing::warn!(host, %failure, "server certificate not trusted");
        if !callbacks.verify_tls_failure(&failure, end_entity.as_ref()) {
            return Err(TlsError::Untrusted(failure));
        }
        tracing::info!(host, "certificate accepted by user");
    }

    let bits = session
        .negotiated_cipher_suite()
        .map_or(0, |suite| cipher_bits(suite.suite()));
    if bits <= 40 && !callbacks.weak_cipher(bits) {
        return Err(TlsError::WeakCipher { bits });
    }
    Ok(())
}

/// Symmetric key strength of a cipher suite, 0 if unknown.
#[must_use]
pub fn cipher_bits(suite: CipherSuite) -> u16 {
    let name = format!("{suite:?}");
    if name.contains("AES_256") || name.contains("CHACHA20") {
        256
    } else if name.contains("AES_128") {
        128
    } else {
        0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_context_is_reused() {
        let first = TlsContext::shared().unwrap();
        let second = TlsContext::shared().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.roots.is_empty());
    }

    #[test]
    fn test_cipher_bits() {
        assert_eq!(cipher_bits(CipherSuite::TLS13_AES_128_GCM_SHA256), 128);
        assert_eq!(cipher_bits(CipherSuite::TLS13_AES_256_GCM_SHA384), 256);
        assert_eq!(
            cipher_bits(CipherSuite::TLS13_CHACHA20_POLY1305_SHA256),
            256
        );
        assert_eq!(cipher_bits(CipherSuite::TLS_NULL_WITH_NULL_NULL), 0);
    }

    #[test]
    fn test_failure_display() {
        let failure = CertificateFailure::HostnameMismatch {
            host: "mail.example.com".into(),
            names: vec!["*.example.org".into(), "example.org".into()],
        };
        assert_eq!(
            failure.to_string(),
            "certificate names [*.example.org, example.org] do not match mail.example.com"
        );
    }

    #[test]
    fn test_malformed_end_entity_rejected() {
        let context = TlsContext::shared().unwrap();
        let der = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x00]);
        assert!(context.verify_peer("mail.example.com", &der, &[]).is_err());
    }
}
