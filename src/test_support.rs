//! Certificate fixtures shared by the unit tests.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa,
    KeyUsagePurpose,
};

/// A generated certificate. The DER is serialized once because rcgen signs
/// afresh on every call, which would change the fingerprint.
pub(crate) struct TestCert {
    pub der: Vec<u8>,
}

impl TestCert {
    pub fn rustls(&self) -> rustls::Certificate {
        rustls::Certificate(self.der.clone())
    }
}

pub(crate) fn self_signed(names: &[&str]) -> TestCert {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let cert = rcgen::generate_simple_self_signed(names).unwrap();
    TestCert {
        der: cert.serialize_der().unwrap(),
    }
}

/// Self-signed certificate with subject `CN=<common_name>` and the given
/// alternative names, which may be empty.
pub(crate) fn with_common_name(common_name: &str, names: &[&str]) -> TestCert {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let mut params = CertificateParams::new(names);
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, common_name);
    let cert = Certificate::from_params(params).unwrap();
    TestCert {
        der: cert.serialize_der().unwrap(),
    }
}

pub(crate) struct TestCa {
    cert: Certificate,
    pub der: Vec<u8>,
    pub pem: String,
}

impl TestCa {
    pub fn new(common_name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::new());
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = Certificate::from_params(params).unwrap();
        let der = cert.serialize_der().unwrap();
        let pem = cert.serialize_pem().unwrap();
        Self { cert, der, pem }
    }

    pub fn issue(&self, names: &[&str]) -> TestCert {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let leaf = Certificate::from_params(CertificateParams::new(names)).unwrap();
        TestCert {
            der: leaf.serialize_der_with_signer(&self.cert).unwrap(),
        }
    }

    pub fn root_store(&self) -> rustls::RootCertStore {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(&rustls::Certificate(self.der.clone())).unwrap();
        roots
    }
}
