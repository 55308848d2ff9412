//! Certificate fingerprints and human-readable certificate details.

use std::fmt;
use std::net::IpAddr;

use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

use crate::error::{Result, TrustError};

/// SHA-256 digest of a DER-encoded certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(der: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(der);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lower-case hex without separators, as persisted.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Colon-separated upper-case hex, the form users compare by eye.
    pub fn to_colon_hex(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// First eight bytes, enough to tell certificates apart in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self> {
        let cleaned: String = s.chars().filter(|c| *c != ':').collect();
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&cleaned, &mut bytes)
            .map_err(|e| TrustError::InvalidCertificate(format!("bad fingerprint {:?}: {}", s, e)))?;
        Ok(Self(bytes))
    }
}

/// A certificate as presented to the user when asking for approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub der: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub subject_alt_names: Vec<String>,
}

impl CertificateInfo {
    /// Parses a DER-encoded X.509 certificate. Fails on anything that is not
    /// exactly one well-formed certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (rest, cert) = parse_x509_certificate(der)
            .map_err(|e| TrustError::InvalidCertificate(e.to_string()))?;
        if !rest.is_empty() {
            return Err(TrustError::InvalidCertificate(format!(
                "{} trailing bytes after certificate",
                rest.len()
            )));
        }

        let subject_alt_names = match cert.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(general_name_to_string)
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => return Err(TrustError::InvalidCertificate(e.to_string())),
        };

        let validity = cert.validity();
        Ok(Self {
            der: der.to_vec(),
            fingerprint: Fingerprint::of(der),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.raw_serial_as_string(),
            not_before: validity.not_before.to_datetime(),
            not_after: validity.not_after.to_datetime(),
            subject_alt_names,
        })
    }

    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }

    pub fn is_valid_at(&self, when: OffsetDateTime) -> bool {
        self.not_before <= when && when <= self.not_after
    }

    /// Multi-line description suitable for an approval prompt.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Subject:     {}\n", self.subject));
        out.push_str(&format!("Issuer:      {}\n", self.issuer));
        out.push_str(&format!("Serial:      {}\n", self.serial));
        out.push_str(&format!("Valid from:  {}\n", format_time(self.not_before)));
        out.push_str(&format!("Valid until: {}\n", format_time(self.not_after)));
        if !self.subject_alt_names.is_empty() {
            out.push_str(&format!("Names:       {}\n", self.subject_alt_names.join(", ")));
        }
        out.push_str(&format!("SHA-256:     {}\n", self.fingerprint.to_colon_hex()));
        out
    }
}

fn general_name_to_string(name: &GeneralName<'_>) -> Option<String> {
    match name {
        GeneralName::DNSName(dns) => Some(dns.to_string()),
        GeneralName::IPAddress(bytes) => match bytes.len() {
            4 => {
                let octets: [u8; 4] = (*bytes).try_into().ok()?;
                Some(IpAddr::from(octets).to_string())
            }
            16 => {
                let octets: [u8; 16] = (*bytes).try_into().ok()?;
                Some(IpAddr::from(octets).to_string())
            }
            _ => None,
        },
        GeneralName::RFC822Name(mail) => Some(format!("email:{}", mail)),
        _ => None,
    }
}

pub(crate) fn format_time(when: OffsetDateTime) -> String {
    when.format(&Rfc3339).unwrap_or_else(|_| when.to_string())
}
