//! Loading of the CA roots used for system trust.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustls::{OwnedTrustAnchor, RootCertStore};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, TrustError};

/// Where the "system trusted" CA set comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootSource {
    /// The operating system's certificate store.
    #[default]
    Native,
    /// The Mozilla root set compiled into the binary.
    Bundled,
    /// No CA roots; only local exceptions are accepted.
    Disabled,
}

/// Builds the root store for `source`, then appends every certificate found in
/// the PEM files of `extra_roots`.
pub fn load_roots<P: AsRef<Path>>(source: RootSource, extra_roots: &[P]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();

    match source {
        RootSource::Native => {
            if let Err(e) = add_native_roots(&mut roots) {
                warn!("Failed to load platform certificates ({}); using bundled roots", e);
                add_bundled_roots(&mut roots);
            }
        }
        RootSource::Bundled => add_bundled_roots(&mut roots),
        RootSource::Disabled => {}
    }

    for path in extra_roots {
        let path = path.as_ref();
        let file = File::open(path)?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file))?;
        if certs.is_empty() {
            return Err(TrustError::InvalidCertificate(format!(
                "no certificates found in {:?}",
                path
            )));
        }
        let (added, ignored) = roots.add_parsable_certificates(&certs);
        debug!("Added {} extra roots from {:?} ({} ignored)", added, path, ignored);
    }

    Ok(roots)
}

fn add_native_roots(roots: &mut RootCertStore) -> std::io::Result<()> {
    let certs: Vec<Vec<u8>> = rustls_native_certs::load_native_certs()?
        .into_iter()
        .map(|cert| cert.0)
        .collect();
    let (added, ignored) = roots.add_parsable_certificates(&certs);
    if added == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "platform certificate store is empty",
        ));
    }
    debug!("Loaded {} platform roots ({} ignored)", added, ignored);
    Ok(())
}

fn add_bundled_roots(roots: &mut RootCertStore) {
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    debug!("Loaded {} bundled roots", roots.len());
}
