//! Chain validation that combines CA trust with per-server exceptions.
//!
//! A [`CompositeValidator`] asks each [`TrustStrategy`] in order and accepts the
//! chain as soon as one of them does. The default composition is system CA
//! validation followed by a fingerprint lookup in the [`TrustStore`].

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerifier, WebPkiVerifier};
use rustls::{Certificate, CertificateError, Error as TlsError, RootCertStore};
use tracing::{debug, warn};

use crate::certificate::Fingerprint;
use crate::identity::ServerIdentity;
use crate::trust_store::TrustStore;

/// Why a chain was (or was not) accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustReason {
    SystemTrusted,
    LocallyTrusted,
    Untrusted,
}

impl fmt::Display for TrustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrustReason::SystemTrusted => "trusted by system CA",
            TrustReason::LocallyTrusted => "trusted by local exception",
            TrustReason::Untrusted => "untrusted",
        };
        f.write_str(s)
    }
}

/// Outcome of validating one certificate chain. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustDecision {
    reason: TrustReason,
}

impl TrustDecision {
    pub fn new(reason: TrustReason) -> Self {
        Self { reason }
    }

    pub fn accepted(&self) -> bool {
        !matches!(self.reason, TrustReason::Untrusted)
    }

    pub fn reason(&self) -> TrustReason {
        self.reason
    }
}

/// One way of deciding that a chain is acceptable for a server.
///
/// `chain[0]` is the leaf; the rest are intermediates as sent by the server.
/// Returning `None` means "not accepted by this strategy", never "reject".
pub trait TrustStrategy: Send + Sync {
    fn evaluate(
        &self,
        identity: &ServerIdentity,
        chain: &[Certificate],
        now: SystemTime,
    ) -> Option<TrustReason>;
}

/// Standard X.509 path validation against a root store.
pub struct SystemTrust {
    verifier: WebPkiVerifier,
}

impl SystemTrust {
    pub fn new(roots: RootCertStore) -> Self {
        Self {
            verifier: WebPkiVerifier::new(roots, None),
        }
    }
}

impl TrustStrategy for SystemTrust {
    fn evaluate(
        &self,
        identity: &ServerIdentity,
        chain: &[Certificate],
        now: SystemTime,
    ) -> Option<TrustReason> {
        let (leaf, intermediates) = chain.split_first()?;
        let server_name = identity.server_name().ok()?;

        // webpki checks the name only after the path, so NotValidForName means
        // the chain itself is anchored. Names are verified separately.
        match self.verifier.verify_server_cert(
            leaf,
            intermediates,
            &server_name,
            &mut std::iter::empty::<&[u8]>(),
            &[],
            now,
        ) {
            Ok(_) | Err(TlsError::InvalidCertificate(CertificateError::NotValidForName)) => {
                Some(TrustReason::SystemTrusted)
            }
            Err(e) => {
                debug!("System trust rejected chain for {}: {}", identity, e);
                None
            }
        }
    }
}

/// Accepts a leaf whose fingerprint equals the one approved for the server.
pub struct LocalTrust {
    store: Arc<TrustStore>,
}

impl LocalTrust {
    pub fn new(store: Arc<TrustStore>) -> Self {
        Self { store }
    }
}

impl TrustStrategy for LocalTrust {
    fn evaluate(
        &self,
        identity: &ServerIdentity,
        chain: &[Certificate],
        _now: SystemTime,
    ) -> Option<TrustReason> {
        let leaf = chain.first()?;
        let entry = self.store.get(identity)?;
        let fingerprint = Fingerprint::of(&leaf.0);

        if entry.fingerprint() == &fingerprint && entry.certificate() == leaf.0.as_slice() {
            debug!("Leaf {}... matches local exception for {}", fingerprint.short(), identity);
            Some(TrustReason::LocallyTrusted)
        } else {
            warn!("Certificate changed for {}!", identity);
            warn!("  Expected: {}...", entry.fingerprint().short());
            warn!("  Received: {}...", fingerprint.short());
            None
        }
    }
}

/// Validator scoped to a single server identity.
#[derive(Clone)]
pub struct CompositeValidator {
    identity: ServerIdentity,
    strategies: Arc<[Arc<dyn TrustStrategy>]>,
}

impl CompositeValidator {
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Runs the strategies in order; the first acceptance wins.
    pub fn validate(&self, chain: &[Certificate], now: SystemTime) -> TrustDecision {
        if chain.is_empty() {
            return TrustDecision::new(TrustReason::Untrusted);
        }
        let reason = self
            .strategies
            .iter()
            .find_map(|strategy| strategy.evaluate(&self.identity, chain, now))
            .unwrap_or(TrustReason::Untrusted);

        debug!("Certificate chain for {}: {}", self.identity, reason);
        TrustDecision::new(reason)
    }
}

impl fmt::Debug for CompositeValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeValidator")
            .field("identity", &self.identity)
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

/// Builds per-server validators sharing one root store and one trust store.
pub struct TrustManagerFactory {
    store: Arc<TrustStore>,
    strategies: Arc<[Arc<dyn TrustStrategy>]>,
}

impl TrustManagerFactory {
    /// System CA validation first, then local exceptions from `store`.
    pub fn new(roots: RootCertStore, store: Arc<TrustStore>) -> Self {
        let strategies: Vec<Arc<dyn TrustStrategy>> = vec![
            Arc::new(SystemTrust::new(roots)),
            Arc::new(LocalTrust::new(Arc::clone(&store))),
        ];
        Self::with_strategies(store, strategies)
    }

    pub fn with_strategies(store: Arc<TrustStore>, strategies: Vec<Arc<dyn TrustStrategy>>) -> Self {
        Self {
            store,
            strategies: strategies.into(),
        }
    }

    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    pub fn create_validator(&self, identity: &ServerIdentity) -> CompositeValidator {
        CompositeValidator {
            identity: identity.clone(),
            strategies: Arc::clone(&self.strategies),
        }
    }
}
