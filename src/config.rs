use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::client_auth::load_client_auth;
use crate::error::{ConfigError, Result};
use crate::manager::TrustStoreManager;
use crate::roots::{load_roots, RootSource};
use crate::socket_factory::{TlsSettings, TrustedSocketFactory};
use crate::trust_manager::TrustManagerFactory;
use crate::trust_store::TrustStore;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub tls: TlsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TlsConfig {
    pub enable_sni: bool,
    pub roots: RootSource,
    pub extra_roots: Vec<PathBuf>,
    /// 0 disables the timeout.
    pub connect_timeout_secs: u64,
    pub client_certificate: Option<ClientCertificateConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientCertificateConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        StoreConfig {
            path: base.join("mailtrust").join("trust_store.json"),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            enable_sni: true,
            roots: RootSource::Native,
            extra_roots: Vec::new(),
            connect_timeout_secs: 30,
            client_certificate: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// The config file in the user's config directory, if there is one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mailtrust").join("config.toml"))
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn tls_settings(&self) -> Result<TlsSettings> {
        let client_auth = match &self.tls.client_certificate {
            Some(c) => Some(load_client_auth(&c.cert_path, &c.key_path)?),
            None => None,
        };
        Ok(TlsSettings {
            enable_sni: self.tls.enable_sni,
            connect_timeout: match self.tls.connect_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            client_auth,
        })
    }

    pub fn open_store(&self) -> Result<Arc<TrustStore>> {
        Ok(Arc::new(TrustStore::open(&self.store.path)?))
    }

    /// Wires the store, roots and TLS settings into a socket factory and the
    /// manager that shares its store.
    pub fn build(&self) -> Result<(TrustedSocketFactory, TrustStoreManager)> {
        let store = self.open_store()?;
        let roots = load_roots(self.tls.roots, &self.tls.extra_roots)?;
        let trust = Arc::new(TrustManagerFactory::new(roots, Arc::clone(&store)));
        let factory = TrustedSocketFactory::new(trust, self.tls_settings()?);
        Ok((factory, TrustStoreManager::new(store)))
    }
}
