//! User-driven changes to the trust store.

use std::sync::Arc;

use tracing::info;

use crate::certificate::CertificateInfo;
use crate::error::Result;
use crate::identity::ServerIdentity;
use crate::trust_store::{TrustEntry, TrustStore};

/// Which of an account's servers a certificate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailServerDirection {
    Incoming,
    Outgoing,
}

/// The two servers a mail account talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountServers {
    pub incoming: ServerIdentity,
    pub outgoing: ServerIdentity,
}

impl AccountServers {
    pub fn identity(&self, direction: MailServerDirection) -> &ServerIdentity {
        match direction {
            MailServerDirection::Incoming => &self.incoming,
            MailServerDirection::Outgoing => &self.outgoing,
        }
    }
}

/// Records and revokes certificate exceptions. It never opens connections:
/// after an approval the caller connects again through the socket factory.
#[derive(Debug, Clone)]
pub struct TrustStoreManager {
    store: Arc<TrustStore>,
}

impl TrustStoreManager {
    pub fn new(store: Arc<TrustStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    /// Approves `certificate` (DER) for `identity` once it parses as X.509.
    pub fn add_exception(&self, identity: &ServerIdentity, certificate: &[u8]) -> Result<TrustEntry> {
        let info = CertificateInfo::from_der(certificate)?;
        info!("User approved certificate {} for {}", info.subject, identity);
        self.store.put(identity, certificate)
    }

    /// True when the server is trusted through an exception rather than a CA.
    pub fn has_local_exception(&self, identity: &ServerIdentity) -> bool {
        self.store.contains(identity)
    }

    pub fn remove_exception(&self, identity: &ServerIdentity) -> Result<bool> {
        self.store.remove(identity)
    }

    pub fn add_certificate(
        &self,
        account: &AccountServers,
        direction: MailServerDirection,
        certificate: &[u8],
    ) -> Result<TrustEntry> {
        self.add_exception(account.identity(direction), certificate)
    }

    /// Drops the exception of a server the account no longer uses. Nothing
    /// happens when host and port are unchanged.
    pub fn server_changed(&self, old: &ServerIdentity, new: &ServerIdentity) -> Result<bool> {
        if old == new {
            return Ok(false);
        }
        self.store.remove(old)
    }

    /// Account deletion: forget the exceptions for both of its servers.
    pub fn delete_certificates(&self, account: &AccountServers) -> Result<usize> {
        let mut removed = 0;
        if self.store.remove(&account.incoming)? {
            removed += 1;
        }
        if account.outgoing != account.incoming && self.store.remove(&account.outgoing)? {
            removed += 1;
        }
        Ok(removed)
    }
}
