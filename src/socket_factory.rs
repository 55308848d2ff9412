//! TLS connections to mail servers.
//!
//! Every connection attempt builds its own verifier scoped to the server
//! identity, so the trust decision is made afresh and failures can be told
//! apart: an untrusted certificate, a host name mismatch, or plain I/O.

use std::sync::Arc;
use std::time::Duration;

use rustls::{Certificate, ClientConfig, PrivateKey};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::cert_verifier::{MailServerCertVerifier, Verdict};
use crate::error::{Result, TrustError};
use crate::identity::ServerIdentity;
use crate::trust_manager::{TrustManagerFactory, TrustReason};

/// Certificate and key presented when a server asks for client authentication.
#[derive(Clone)]
pub struct ClientAuth {
    pub chain: Vec<Certificate>,
    pub key: PrivateKey,
}

/// Per-factory TLS options.
#[derive(Clone)]
pub struct TlsSettings {
    /// Send the host name in the handshake. Some legacy servers fail on it.
    pub enable_sni: bool,
    /// One deadline covering the TCP connect and the handshake together.
    /// `None` leaves it to the OS.
    pub connect_timeout: Option<Duration>,
    pub client_auth: Option<ClientAuth>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            enable_sni: true,
            connect_timeout: Some(Duration::from_secs(30)),
            client_auth: None,
        }
    }
}

/// How the TLS session starts.
pub enum ConnectionMode {
    /// Connect and negotiate TLS from the first byte (IMAPS, POP3S, SMTPS).
    DirectTls,
    /// Upgrade a plain connection on which STARTTLS was already negotiated.
    StartTlsUpgrade(TcpStream),
}

/// An established TLS connection and how its certificate was trusted.
pub struct TrustedStream<S> {
    pub stream: TlsStream<S>,
    pub trust: TrustReason,
}

pub struct TrustedSocketFactory {
    trust: Arc<TrustManagerFactory>,
    settings: TlsSettings,
}

impl TrustedSocketFactory {
    pub fn new(trust: Arc<TrustManagerFactory>, settings: TlsSettings) -> Self {
        Self { trust, settings }
    }

    pub fn trust_manager(&self) -> &Arc<TrustManagerFactory> {
        &self.trust
    }

    pub fn settings(&self) -> &TlsSettings {
        &self.settings
    }

    /// Opens a TLS connection to `identity`.
    pub async fn create_socket(
        &self,
        identity: &ServerIdentity,
        mode: ConnectionMode,
    ) -> Result<TrustedStream<TcpStream>> {
        let deadline = self.deadline();
        let stream = match mode {
            ConnectionMode::DirectTls => {
                debug!("Connecting to {}", identity);
                self.with_deadline(deadline, TcpStream::connect((identity.host(), identity.port())))
                    .await?
            }
            ConnectionMode::StartTlsUpgrade(stream) => stream,
        };
        self.handshake(identity, stream, deadline).await
    }

    /// Runs the TLS handshake over an already-connected stream.
    pub async fn upgrade<S>(&self, identity: &ServerIdentity, stream: S) -> Result<TrustedStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.handshake(identity, stream, self.deadline()).await
    }

    async fn handshake<S>(
        &self,
        identity: &ServerIdentity,
        stream: S,
        deadline: Option<Instant>,
    ) -> Result<TrustedStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = identity.server_name()?;
        let verifier = MailServerCertVerifier::new(self.trust.create_validator(identity));
        let connector = TlsConnector::from(Arc::new(self.client_config(Arc::clone(&verifier))?));

        let stream = match self
            .with_deadline(deadline, connector.connect(server_name, stream))
            .await
        {
            Ok(stream) => stream,
            Err(e) => return Err(verifier.failure(e)),
        };

        let trust = match verifier.verdict() {
            Some(Verdict::Trusted(reason)) => reason,
            // The verifier runs on every full handshake this config can make.
            _ => {
                return Err(TrustError::Tls(rustls::Error::General(
                    "handshake completed without certificate verification".to_string(),
                )))
            }
        };

        info!("TLS established with {} ({})", identity, trust);
        Ok(TrustedStream { stream, trust })
    }

    fn client_config(&self, verifier: Arc<MailServerCertVerifier>) -> Result<ClientConfig> {
        let builder = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(verifier);

        let mut config = match &self.settings.client_auth {
            Some(auth) => builder.with_client_auth_cert(auth.chain.clone(), auth.key.clone())?,
            None => builder.with_no_client_auth(),
        };
        config.enable_sni = self.settings.enable_sni;
        Ok(config)
    }

    fn deadline(&self) -> Option<Instant> {
        self.settings.connect_timeout.map(|limit| Instant::now() + limit)
    }

    async fn with_deadline<F, T>(&self, deadline: Option<Instant>, future: F) -> std::io::Result<T>
    where
        F: std::future::Future<Output = std::io::Result<T>>,
    {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, future).await.map_err(|_| {
                let limit = self.settings.connect_timeout.unwrap_or_default();
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("timed out after {}ms", limit.as_millis()),
                )
            })?,
            None => future.await,
        }
    }
}
