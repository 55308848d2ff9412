//! Error types for the trust subsystem.

use std::path::PathBuf;

use thiserror::Error;

use crate::certificate::CertificateInfo;
use crate::identity::ServerIdentity;

pub type Result<T> = std::result::Result<T, TrustError>;

/// Errors raised while storing trust decisions or opening TLS connections.
#[derive(Debug, Error)]
pub enum TrustError {
    /// The persisted trust store could not be parsed. The store has been reset
    /// to empty; no trust was granted.
    #[error("trust store {path:?} is corrupt: {reason}")]
    StorageCorrupt { path: PathBuf, reason: String },

    /// The server presented a certificate that is neither trusted by the
    /// system roots nor approved for this server.
    #[error("certificate for {identity} is not trusted (SHA-256 {})", .certificate.fingerprint)]
    UntrustedCertificate {
        identity: ServerIdentity,
        certificate: Box<CertificateInfo>,
    },

    /// The certificate is not valid for the requested host name.
    #[error("certificate presented by {identity} does not match host name {}", .identity.host())]
    HostnameMismatch { identity: ServerIdentity },

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The server refused or garbled the plaintext STARTTLS exchange.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrustError {
    /// Returns true for errors the user can resolve by approving the certificate.
    pub fn is_untrusted(&self) -> bool {
        matches!(self, TrustError::UntrustedCertificate { .. })
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
