//! STARTTLS negotiation followed by the TLS upgrade.

use rustls::RootCertStore;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mailtrust::{negotiate_starttls, ConnectionMode, MailProtocol, TrustError, TrustReason};

use crate::common::{self, TestServer, GREETING};

#[tokio::test]
async fn test_imap_starttls_with_approved_certificate() {
    let dir = TempDir::new().unwrap();
    let (factory, manager) = common::client(dir.path(), RootCertStore::empty());
    let cert = common::self_signed(&["localhost"]);
    let server = TestServer::start_imap(&cert).await;
    let identity = server.identity();
    manager.add_exception(&identity, &cert.der).unwrap();

    let mut plain = TcpStream::connect(("127.0.0.1", server.port)).await.unwrap();
    negotiate_starttls(&mut plain, MailProtocol::Imap).await.unwrap();

    let mut tls = factory
        .create_socket(&identity, ConnectionMode::StartTlsUpgrade(plain))
        .await
        .unwrap();
    assert_eq!(tls.trust, TrustReason::LocallyTrusted);

    let mut greeting = [0u8; 7];
    tls.stream.read_exact(&mut greeting).await.unwrap();
    assert_eq!(&greeting, GREETING);
}

#[tokio::test]
async fn test_imap_starttls_untrusted_certificate() {
    let dir = TempDir::new().unwrap();
    let (factory, _manager) = common::client(dir.path(), RootCertStore::empty());
    let cert = common::self_signed(&["localhost"]);
    let server = TestServer::start_imap(&cert).await;

    let mut plain = TcpStream::connect(("127.0.0.1", server.port)).await.unwrap();
    negotiate_starttls(&mut plain, MailProtocol::Imap).await.unwrap();

    let err = factory
        .upgrade(&server.identity(), plain)
        .await
        .err()
        .unwrap();
    match err {
        TrustError::UntrustedCertificate { certificate, .. } => assert_eq!(certificate.der, cert.der),
        other => panic!("expected untrusted certificate, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pop3_refused_stls() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"+OK POP3 ready\r\n").await.unwrap();
        let mut command = [0u8; 6];
        stream.read_exact(&mut command).await.unwrap();
        assert_eq!(&command, b"STLS\r\n");
        stream.write_all(b"-ERR TLS not available\r\n").await.unwrap();
    });

    let mut plain = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let err = negotiate_starttls(&mut plain, MailProtocol::Pop3).await.unwrap_err();
    assert!(matches!(err, TrustError::Protocol(_)), "got {:?}", err);
    server.await.unwrap();
}
