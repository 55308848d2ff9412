//! PEM/DER loading for client certificates and user-supplied server
//! certificates.

use std::fs;
use std::io::BufReader;
use std::path::Path;

use rustls::{Certificate, PrivateKey};
use rustls_pemfile::Item;

use crate::error::{Result, TrustError};
use crate::socket_factory::ClientAuth;

pub fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let certfile = fs::File::open(path)?;
    let mut reader = BufReader::new(certfile);
    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut reader)?
        .into_iter()
        .map(Certificate)
        .collect();

    if certs.is_empty() {
        return Err(TrustError::InvalidCertificate(format!(
            "no certificates found in {:?}",
            path
        )));
    }
    Ok(certs)
}

/// Reads the single private key in `path`: PKCS#8, PKCS#1 (RSA) or SEC1 (EC).
pub fn load_private_key(path: &Path) -> Result<PrivateKey> {
    let keyfile = fs::File::open(path)?;
    let mut reader = BufReader::new(keyfile);
    let keys: Vec<PrivateKey> = rustls_pemfile::read_all(&mut reader)?
        .into_iter()
        .filter_map(|item| match item {
            Item::PKCS8Key(key) | Item::RSAKey(key) | Item::ECKey(key) => Some(PrivateKey(key)),
            _ => None,
        })
        .collect();

    match <[PrivateKey; 1]>::try_from(keys) {
        Ok([key]) => Ok(key),
        Err(keys) => Err(TrustError::InvalidCertificate(format!(
            "expected a single private key in {:?}, found {}",
            path,
            keys.len()
        ))),
    }
}

pub fn load_client_auth(cert_path: &Path, key_path: &Path) -> Result<ClientAuth> {
    Ok(ClientAuth {
        chain: load_certs(cert_path)?,
        key: load_private_key(key_path)?,
    })
}

/// Reads one server certificate, PEM or raw DER, for manual approval.
pub fn read_certificate_file(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path)?;
    if !bytes.starts_with(b"-----BEGIN") {
        return Ok(bytes);
    }
    let mut certs = rustls_pemfile::certs(&mut bytes.as_slice())?;
    match certs.len() {
        1 => Ok(certs.remove(0)),
        0 => Err(TrustError::InvalidCertificate(format!(
            "no certificate found in {:?}",
            path
        ))),
        n => Err(TrustError::InvalidCertificate(format!(
            "{:?} holds {} certificates, expected the server certificate only",
            path, n
        ))),
    }
}
