use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, CertificateError, Error as TlsError, ServerName};
use tracing::{debug, warn};

use crate::certificate::CertificateInfo;
use crate::error::TrustError;
use crate::hostname::verify_hostname;
use crate::identity::ServerIdentity;
use crate::trust_manager::{CompositeValidator, TrustReason};

/// What the verifier concluded during one handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    Trusted(TrustReason),
    Untrusted(Certificate),
    HostnameMismatch,
}

/// rustls verifier for a single connection attempt.
///
/// Chain trust comes from the [`CompositeValidator`]; the host name is checked
/// afterwards for every accepted chain. The verdict is kept so the socket
/// factory can turn a failed handshake into the matching [`TrustError`].
pub(crate) struct MailServerCertVerifier {
    validator: CompositeValidator,
    verdict: Mutex<Option<Verdict>>,
}

impl MailServerCertVerifier {
    pub fn new(validator: CompositeValidator) -> Arc<Self> {
        Arc::new(Self {
            validator,
            verdict: Mutex::new(None),
        })
    }

    fn identity(&self) -> &ServerIdentity {
        self.validator.identity()
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict.lock().clone()
    }

    fn record(&self, verdict: Verdict) {
        *self.verdict.lock() = Some(verdict);
    }

    /// Maps a failed handshake to the error the caller should see. Trust and
    /// name failures win over the I/O error rustls reports for them.
    pub fn failure(&self, io_error: std::io::Error) -> TrustError {
        match self.verdict() {
            Some(Verdict::Untrusted(leaf)) => match CertificateInfo::from_der(&leaf.0) {
                Ok(info) => TrustError::UntrustedCertificate {
                    identity: self.identity().clone(),
                    certificate: Box::new(info),
                },
                Err(e) => e,
            },
            Some(Verdict::HostnameMismatch) => TrustError::HostnameMismatch {
                identity: self.identity().clone(),
            },
            Some(Verdict::Trusted(_)) | None => TrustError::Io(io_error),
        }
    }
}

impl ServerCertVerifier for MailServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone());
        chain.extend_from_slice(intermediates);

        let decision = self.validator.validate(&chain, now);
        if !decision.accepted() {
            warn!("Rejecting untrusted certificate from {}", self.identity());
            self.record(Verdict::Untrusted(end_entity.clone()));
            return Err(TlsError::InvalidCertificate(CertificateError::UnknownIssuer));
        }

        if let Err(reason) = verify_hostname(end_entity, self.identity().host()) {
            warn!("Host name check failed for {}: {}", self.identity(), reason);
            self.record(Verdict::HostnameMismatch);
            return Err(TlsError::InvalidCertificate(CertificateError::NotValidForName));
        }

        debug!("Verified {} ({})", self.identity(), decision.reason());
        self.record(Verdict::Trusted(decision.reason()));
        Ok(ServerCertVerified::assertion())
    }
}
