use std::fmt;
use std::net::IpAddr;

use rustls::ServerName;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrustError};

/// Host and port a trust decision is scoped to.
///
/// Hosts compare case-insensitively; the host is stored in lower case so the
/// derived `Eq` and `Hash` agree with that rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerIdentity {
    host: String,
    port: u16,
}

impl ServerIdentity {
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            host: host.as_ref().trim().to_ascii_lowercase(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Name used for SNI and for the rustls connection.
    pub fn server_name(&self) -> Result<ServerName> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            Ok(ServerName::IpAddress(ip))
        } else {
            ServerName::try_from(self.host.as_str())
                .map_err(|e| TrustError::InvalidServerName(format!("{}: {:?}", self.host, e)))
        }
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
