//! Bookkeeping for a single connection attempt and its recovery path.

use std::fmt;

use crate::error::{Result, TrustError};
use crate::identity::ServerIdentity;
use crate::manager::TrustStoreManager;
use crate::trust_manager::TrustReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Init,
    Handshaking,
    Trusted(TrustReason),
    Untrusted,
    HostnameMismatch,
    IoError,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptState::Init | AttemptState::Handshaking)
    }

    /// Terminal state matching a failed connection.
    pub fn from_error(error: &TrustError) -> Self {
        match error {
            TrustError::UntrustedCertificate { .. } => AttemptState::Untrusted,
            TrustError::HostnameMismatch { .. } => AttemptState::HostnameMismatch,
            _ => AttemptState::IoError,
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Init => f.write_str("init"),
            AttemptState::Handshaking => f.write_str("handshaking"),
            AttemptState::Trusted(reason) => write!(f, "trusted ({})", reason),
            AttemptState::Untrusted => f.write_str("untrusted"),
            AttemptState::HostnameMismatch => f.write_str("host name mismatch"),
            AttemptState::IoError => f.write_str("I/O error"),
        }
    }
}

/// Tracks `Init -> Handshaking -> terminal` for one server. Only an untrusted
/// attempt can go back to `Init`, and only once the user's approval is stored.
#[derive(Debug)]
pub struct ConnectionAttempt {
    identity: ServerIdentity,
    state: AttemptState,
    pending: Option<Vec<u8>>,
}

impl ConnectionAttempt {
    pub fn new(identity: ServerIdentity) -> Self {
        Self {
            identity,
            state: AttemptState::Init,
            pending: None,
        }
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.state != AttemptState::Init {
            return Err(self.invalid("begin a handshake"));
        }
        self.state = AttemptState::Handshaking;
        Ok(())
    }

    /// Records how the handshake ended, e.g.
    /// `attempt.finish(result.as_ref().map(|s| s.trust))`.
    pub fn finish(
        &mut self,
        outcome: std::result::Result<TrustReason, &TrustError>,
    ) -> Result<AttemptState> {
        if self.state != AttemptState::Handshaking {
            return Err(self.invalid("finish a handshake"));
        }
        self.state = match outcome {
            Ok(reason) => AttemptState::Trusted(reason),
            Err(e) => {
                if let TrustError::UntrustedCertificate { certificate, .. } = e {
                    self.pending = Some(certificate.der.clone());
                }
                AttemptState::from_error(e)
            }
        };
        Ok(self.state)
    }

    /// Stores the rejected certificate as an exception and rewinds to `Init`
    /// so the caller can connect again.
    pub fn approve(&mut self, manager: &TrustStoreManager) -> Result<()> {
        if self.state != AttemptState::Untrusted {
            return Err(self.invalid("approve a certificate"));
        }
        let certificate = self
            .pending
            .take()
            .ok_or_else(|| self.invalid("approve without a rejected certificate"))?;
        if let Err(e) = manager.add_exception(&self.identity, &certificate) {
            self.pending = Some(certificate);
            return Err(e);
        }
        self.state = AttemptState::Init;
        Ok(())
    }

    fn invalid(&self, action: &str) -> TrustError {
        TrustError::Protocol(format!(
            "cannot {} for {} in state {}",
            action, self.identity, self.state
        ))
    }
}
