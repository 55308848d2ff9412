//! Loopback TLS servers and generated certificates.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyUsagePurpose,
};
use rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use mailtrust::{
    ServerIdentity, TlsSettings, TrustManagerFactory, TrustStore, TrustStoreManager,
    TrustedSocketFactory,
};

pub const GREETING: &[u8] = b"hello\r\n";

pub struct TestCert {
    pub der: Vec<u8>,
    pub key_der: Vec<u8>,
}

pub fn self_signed(names: &[&str]) -> TestCert {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let cert = rcgen::generate_simple_self_signed(names).unwrap();
    TestCert {
        der: cert.serialize_der().unwrap(),
        key_der: cert.serialize_private_key_der(),
    }
}

/// Self-signed certificate with subject `CN=<common_name>` and the given
/// alternative names, which may be empty.
pub fn with_common_name(common_name: &str, names: &[&str]) -> TestCert {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let mut params = CertificateParams::new(names);
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, common_name);
    let cert = rcgen::Certificate::from_params(params).unwrap();
    TestCert {
        der: cert.serialize_der().unwrap(),
        key_der: cert.serialize_private_key_der(),
    }
}

pub struct TestCa {
    cert: rcgen::Certificate,
    der: Vec<u8>,
}

impl TestCa {
    pub fn new(common_name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::new());
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = rcgen::Certificate::from_params(params).unwrap();
        let der = cert.serialize_der().unwrap();
        Self { cert, der }
    }

    pub fn issue(&self, names: &[&str]) -> TestCert {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let leaf = rcgen::Certificate::from_params(CertificateParams::new(names)).unwrap();
        TestCert {
            der: leaf.serialize_der_with_signer(&self.cert).unwrap(),
            key_der: leaf.serialize_private_key_der(),
        }
    }

    pub fn root_store(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(&Certificate(self.der.clone())).unwrap();
        roots
    }
}

/// A socket factory and manager sharing one store under `dir`.
pub fn client(dir: &Path, roots: RootCertStore) -> (TrustedSocketFactory, TrustStoreManager) {
    let settings = TlsSettings {
        connect_timeout: Some(Duration::from_secs(10)),
        ..TlsSettings::default()
    };
    client_with(dir, roots, settings)
}

pub fn client_with(
    dir: &Path,
    roots: RootCertStore,
    settings: TlsSettings,
) -> (TrustedSocketFactory, TrustStoreManager) {
    let store = Arc::new(TrustStore::open(dir.join("trust_store.json")).unwrap());
    let trust = Arc::new(TrustManagerFactory::new(roots, Arc::clone(&store)));
    (TrustedSocketFactory::new(trust, settings), TrustStoreManager::new(store))
}

fn server_config(cert: &TestCert) -> Arc<ServerConfig> {
    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![Certificate(cert.der.clone())], PrivateKey(cert.key_der.clone()))
        .unwrap();
    Arc::new(config)
}

#[derive(Clone, Copy)]
enum Mode {
    Tls,
    ImapStartTls,
}

/// TLS server on 127.0.0.1 that sends [`GREETING`] after each handshake.
/// The certificate can be swapped between connections, and the SNI name of
/// every completed handshake is recorded.
pub struct TestServer {
    pub port: u16,
    config: Arc<Mutex<Arc<ServerConfig>>>,
    server_names: Arc<Mutex<Vec<Option<String>>>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(cert: &TestCert) -> Self {
        Self::spawn(cert, Mode::Tls).await
    }

    /// Plaintext IMAP greeting and STARTTLS before the handshake.
    pub async fn start_imap(cert: &TestCert) -> Self {
        Self::spawn(cert, Mode::ImapStartTls).await
    }

    async fn spawn(cert: &TestCert, mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Arc::new(Mutex::new(server_config(cert)));

        let server_names = Arc::new(Mutex::new(Vec::new()));

        let shared = Arc::clone(&config);
        let names = Arc::clone(&server_names);
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let config = shared.lock().clone();
                tokio::spawn(serve(stream, config, mode, Arc::clone(&names)));
            }
        });

        Self {
            port,
            config,
            server_names,
            handle,
        }
    }

    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity::new("localhost", self.port)
    }

    pub fn set_certificate(&self, cert: &TestCert) {
        *self.config.lock() = server_config(cert);
    }

    /// SNI names sent by clients, one per completed handshake.
    pub fn server_names(&self) -> Vec<Option<String>> {
        self.server_names.lock().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    config: Arc<ServerConfig>,
    mode: Mode,
    server_names: Arc<Mutex<Vec<Option<String>>>>,
) {
    if let Mode::ImapStartTls = mode {
        if imap_preamble(&mut stream).await.is_err() {
            return;
        }
    }
    // Client-side rejections surface here as handshake errors.
    if let Ok(mut tls) = TlsAcceptor::from(config).accept(stream).await {
        let name = tls.get_ref().1.server_name().map(str::to_string);
        server_names.lock().push(name);
        let _ = tls.write_all(GREETING).await;
        let _ = tls.shutdown().await;
    }
}

async fn imap_preamble(stream: &mut TcpStream) -> std::io::Result<()> {
    stream.write_all(b"* OK [CAPABILITY IMAP4rev1 STARTTLS] ready\r\n").await?;
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        line.push(byte);
    }
    if !line.starts_with(b"a001 STARTTLS") {
        stream.write_all(b"a001 BAD unexpected command\r\n").await?;
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "not STARTTLS"));
    }
    stream.write_all(b"a001 OK Begin TLS negotiation now\r\n").await
}
