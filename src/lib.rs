// Library entry point for mailtrust: certificate trust for mail server connections

pub mod attempt;
mod cert_verifier;
pub mod certificate;
pub mod client_auth;
pub mod config;
pub mod error;
pub mod hostname;
pub mod identity;
pub mod manager;
pub mod roots;
pub mod socket_factory;
pub mod starttls;
pub mod trust_manager;
pub mod trust_store;

#[cfg(test)]
mod test_support;

pub use attempt::{AttemptState, ConnectionAttempt};
pub use certificate::{CertificateInfo, Fingerprint};
pub use config::Config;
pub use error::{ConfigError, Result, TrustError};
pub use identity::ServerIdentity;
pub use manager::{AccountServers, MailServerDirection, TrustStoreManager};
pub use roots::RootSource;
pub use socket_factory::{ClientAuth, ConnectionMode, TlsSettings, TrustedSocketFactory, TrustedStream};
pub use starttls::{negotiate_starttls, MailProtocol};
pub use trust_manager::{TrustDecision, TrustManagerFactory, TrustReason, TrustStrategy};
pub use trust_store::{TrustEntry, TrustStore};
