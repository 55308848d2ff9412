//! Persistent store of user-approved server certificates.
//!
//! One entry per [`ServerIdentity`]. The whole store is a single JSON document
//! that is rewritten atomically on every mutation.

use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::certificate::{format_time, Fingerprint};
use crate::error::{Result, TrustError};
use crate::identity::ServerIdentity;

const STORE_VERSION: u32 = 1;

/// A certificate the user explicitly approved for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustEntry {
    identity: ServerIdentity,
    certificate: Vec<u8>,
    fingerprint: Fingerprint,
    added_at: String,
}

impl TrustEntry {
    fn new(identity: ServerIdentity, certificate: Vec<u8>) -> Self {
        let fingerprint = Fingerprint::of(&certificate);
        Self {
            identity,
            certificate,
            fingerprint,
            added_at: format_time(OffsetDateTime::now_utc()),
        }
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// DER-encoded certificate exactly as approved.
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn added_at(&self) -> &str {
        &self.added_at
    }
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    host: String,
    port: u16,
    #[serde(with = "hex::serde")]
    certificate: Vec<u8>,
    fingerprint: String,
    added_at: String,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: Vec<StoredEntry>,
}

impl From<&TrustEntry> for StoredEntry {
    fn from(entry: &TrustEntry) -> Self {
        StoredEntry {
            host: entry.identity.host().to_string(),
            port: entry.identity.port(),
            certificate: entry.certificate.clone(),
            fingerprint: entry.fingerprint.to_hex(),
            added_at: entry.added_at.clone(),
        }
    }
}

impl TryFrom<StoredEntry> for TrustEntry {
    type Error = String;

    fn try_from(stored: StoredEntry) -> std::result::Result<Self, String> {
        let identity = ServerIdentity::new(&stored.host, stored.port);
        let fingerprint = Fingerprint::of(&stored.certificate);
        if fingerprint.to_hex() != stored.fingerprint.to_ascii_lowercase() {
            return Err(format!("fingerprint mismatch for {}", identity));
        }
        Ok(TrustEntry {
            identity,
            certificate: stored.certificate,
            fingerprint,
            added_at: stored.added_at,
        })
    }
}

/// Shared, file-backed trust store.
///
/// Readers take a cheap snapshot of the entry list and never wait on disk I/O.
/// Writers are serialized by `write_lock`, persist the new list, and only then
/// publish it to readers.
#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    entries: RwLock<Arc<Vec<TrustEntry>>>,
    write_lock: Mutex<()>,
}

impl TrustStore {
    /// Creates an empty, unloaded store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(Arc::new(Vec::new())),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a store and loads it. A corrupt file is logged, moved aside and
    /// replaced by an empty store; other I/O failures are returned.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(path);
        match store.load() {
            Ok(()) => Ok(store),
            Err(TrustError::StorageCorrupt { path, reason }) => {
                warn!("Trust store {:?} is corrupt ({}); starting with no local exceptions", path, reason);
                Ok(store)
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads persisted entries into memory, replacing what is loaded.
    ///
    /// On a parse failure the in-memory store is emptied, the unreadable file is
    /// renamed to `<file>.corrupt`, and `StorageCorrupt` is returned.
    pub fn load(&self) -> Result<()> {
        let _guard = self.write_lock.lock();

        let loaded = match read_store_file(&self.path) {
            Ok(entries) => entries,
            Err(LoadError::Io(e)) => return Err(TrustError::Io(e)),
            Err(LoadError::Corrupt(reason)) => {
                *self.entries.write() = Arc::new(Vec::new());
                let aside = corrupt_path(&self.path);
                if let Err(e) = fs::rename(&self.path, &aside) {
                    warn!("Failed to move corrupt trust store to {:?}: {}", aside, e);
                }
                return Err(TrustError::StorageCorrupt {
                    path: self.path.clone(),
                    reason,
                });
            }
        };

        debug!("Loaded {} trusted certificates from {:?}", loaded.len(), self.path);
        *self.entries.write() = Arc::new(loaded);
        Ok(())
    }

    /// Returns the entry approved for exactly this host and port.
    pub fn get(&self, identity: &ServerIdentity) -> Option<TrustEntry> {
        self.snapshot()
            .iter()
            .find(|entry| &entry.identity == identity)
            .cloned()
    }

    pub fn contains(&self, identity: &ServerIdentity) -> bool {
        self.snapshot().iter().any(|entry| &entry.identity == identity)
    }

    /// Records `certificate` for `identity`, replacing any earlier approval, and
    /// persists before returning.
    pub fn put(&self, identity: &ServerIdentity, certificate: &[u8]) -> Result<TrustEntry> {
        let _guard = self.write_lock.lock();

        let entry = TrustEntry::new(identity.clone(), certificate.to_vec());
        let mut next: Vec<TrustEntry> = self.snapshot().as_ref().clone();
        match next.iter_mut().find(|e| &e.identity == identity) {
            Some(existing) => *existing = entry.clone(),
            None => next.push(entry.clone()),
        }

        self.save(&next)?;
        *self.entries.write() = Arc::new(next);

        info!(
            "Trusted certificate {}... for {}",
            entry.fingerprint.short(),
            identity
        );
        Ok(entry)
    }

    /// Deletes the entry for `identity`. Returns whether an entry existed.
    pub fn remove(&self, identity: &ServerIdentity) -> Result<bool> {
        let _guard = self.write_lock.lock();

        let current = self.snapshot();
        if !current.iter().any(|e| &e.identity == identity) {
            return Ok(false);
        }
        let next: Vec<TrustEntry> = current
            .iter()
            .filter(|e| &e.identity != identity)
            .cloned()
            .collect();

        self.save(&next)?;
        *self.entries.write() = Arc::new(next);

        info!("Removed trusted certificate for {}", identity);
        Ok(true)
    }

    /// All entries in the order they were first approved.
    pub fn entries(&self) -> Vec<TrustEntry> {
        self.snapshot().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Arc<Vec<TrustEntry>> {
        self.entries.read().clone()
    }

    /// Writes a temporary sibling file, syncs it, then renames it over the
    /// store so a crash leaves either the old or the new document.
    fn save(&self, entries: &[TrustEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let document = StoreFile {
            version: STORE_VERSION,
            entries: entries.iter().map(StoredEntry::from).collect(),
        };
        let json = serde_json::to_vec_pretty(&document)?;

        let tmp = temp_path(&self.path);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        sync_parent(&self.path)?;
        Ok(())
    }
}

/// Makes the rename itself durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

enum LoadError {
    Io(std::io::Error),
    Corrupt(String),
}

fn read_store_file(path: &Path) -> std::result::Result<Vec<TrustEntry>, LoadError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LoadError::Io(e)),
    };

    let metadata = file.metadata().map_err(LoadError::Io)?;
    if metadata.len() == 0 {
        return Ok(Vec::new());
    }

    let document: StoreFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| LoadError::Corrupt(e.to_string()))?;
    if document.version != STORE_VERSION {
        return Err(LoadError::Corrupt(format!(
            "unsupported store version {}",
            document.version
        )));
    }

    let mut entries: Vec<TrustEntry> = Vec::with_capacity(document.entries.len());
    for stored in document.entries {
        let entry = TrustEntry::try_from(stored).map_err(LoadError::Corrupt)?;
        if entries.iter().any(|e| e.identity == entry.identity) {
            return Err(LoadError::Corrupt(format!(
                "duplicate entry for {}",
                entry.identity
            )));
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".tmp")
}

fn corrupt_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".corrupt")
}
