//! Approvals surviving a restart, and their removal.

use std::fs;

use rustls::RootCertStore;
use tempfile::TempDir;

use mailtrust::{
    AccountServers, ConnectionMode, MailServerDirection, ServerIdentity, TrustReason,
    TrustedSocketFactory,
};

use crate::common::{self, TestServer};

async fn trust(factory: &TrustedSocketFactory, identity: &ServerIdentity) -> mailtrust::Result<TrustReason> {
    let tls = factory.create_socket(identity, ConnectionMode::DirectTls).await?;
    Ok(tls.trust)
}

#[tokio::test]
async fn test_exception_survives_restart() {
    let dir = TempDir::new().unwrap();
    let cert = common::self_signed(&["localhost"]);
    let server = TestServer::start(&cert).await;

    {
        let (_factory, manager) = common::client(dir.path(), RootCertStore::empty());
        manager.add_exception(&server.identity(), &cert.der).unwrap();
    }

    let (factory, manager) = common::client(dir.path(), RootCertStore::empty());
    assert!(manager.has_local_exception(&server.identity()));
    assert_eq!(
        trust(&factory, &server.identity()).await.unwrap(),
        TrustReason::LocallyTrusted
    );
}

#[tokio::test]
async fn test_revoked_exception_is_untrusted() {
    let dir = TempDir::new().unwrap();
    let cert = common::self_signed(&["localhost"]);
    let server = TestServer::start(&cert).await;
    let (factory, manager) = common::client(dir.path(), RootCertStore::empty());

    manager.add_exception(&server.identity(), &cert.der).unwrap();
    assert!(trust(&factory, &server.identity()).await.is_ok());

    assert!(manager.remove_exception(&server.identity()).unwrap());
    assert!(trust(&factory, &server.identity()).await.unwrap_err().is_untrusted());
}

#[tokio::test]
async fn test_account_deletion_removes_both_servers() {
    let dir = TempDir::new().unwrap();
    let incoming_cert = common::self_signed(&["localhost"]);
    let outgoing_cert = common::self_signed(&["localhost"]);
    let incoming = TestServer::start(&incoming_cert).await;
    let outgoing = TestServer::start(&outgoing_cert).await;
    let account = AccountServers {
        incoming: incoming.identity(),
        outgoing: outgoing.identity(),
    };
    let (factory, manager) = common::client(dir.path(), RootCertStore::empty());

    manager
        .add_certificate(&account, MailServerDirection::Incoming, &incoming_cert.der)
        .unwrap();
    manager
        .add_certificate(&account, MailServerDirection::Outgoing, &outgoing_cert.der)
        .unwrap();
    assert!(trust(&factory, &account.incoming).await.is_ok());
    assert!(trust(&factory, &account.outgoing).await.is_ok());

    assert_eq!(manager.delete_certificates(&account).unwrap(), 2);
    assert!(trust(&factory, &account.incoming).await.unwrap_err().is_untrusted());
    assert!(trust(&factory, &account.outgoing).await.unwrap_err().is_untrusted());
}

#[tokio::test]
async fn test_corrupt_store_grants_no_trust() {
    let dir = TempDir::new().unwrap();
    let cert = common::self_signed(&["localhost"]);
    let server = TestServer::start(&cert).await;
    fs::write(dir.path().join("trust_store.json"), b"{ not json").unwrap();

    let (factory, manager) = common::client(dir.path(), RootCertStore::empty());
    assert!(manager.store().is_empty());
    assert!(trust(&factory, &server.identity()).await.unwrap_err().is_untrusted());

    manager.add_exception(&server.identity(), &cert.der).unwrap();
    assert!(trust(&factory, &server.identity()).await.is_ok());
}
