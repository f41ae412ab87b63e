//! Dialect negotiation, authentication and signing

use super::{MockOptions, TestHarness};
use crate::auth::Credentials;
use crate::client::dispatch::Dispatcher;
use crate::client::negotiate::{NegotiationState, Negotiator};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::protocol::signing::SigningAlgorithm;
use crate::protocol::smb2_constants::{Smb2Command, Smb2Dialect};
use crate::transport::Connection;
use std::sync::Arc;

fn server_with(dialects: Vec<Smb2Dialect>) -> MockOptions {
    MockOptions {
        dialects,
        ..MockOptions::default()
    }
}

#[tokio::test]
async fn test_highest_common_dialect_is_chosen() {
    let config = ClientConfig {
        dialects: vec![Smb2Dialect::Smb202, Smb2Dialect::Smb210, Smb2Dialect::Smb300],
        ..ClientConfig::default()
    };
    let harness = TestHarness::new()
        .with_options(server_with(vec![Smb2Dialect::Smb210, Smb2Dialect::Smb300]))
        .with_config(config);

    let session = harness.connect().await.unwrap();
    assert_eq!(session.dialect(), Smb2Dialect::Smb300);
    assert!(session.is_active());
    assert!(!session.is_guest());
    assert_eq!(session.username(), "alice");
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_no_common_dialect() {
    let config = ClientConfig {
        dialects: vec![Smb2Dialect::Smb202],
        ..ClientConfig::default()
    };
    let harness = TestHarness::new()
        .with_options(server_with(vec![Smb2Dialect::Smb302]))
        .with_config(config);

    let result = harness.connect().await;
    assert!(matches!(result, Err(Error::NoCompatibleDialect)));
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let harness = TestHarness::new();
    let result = harness
        .connect_as(Credentials::user("alice", "not-the-password").with_domain("TESTDOM"))
        .await;
    assert!(matches!(result, Err(Error::AuthenticationRejected(_))));
    assert_eq!(harness.control.received(Smb2Command::SessionSetup), 2);
}

#[tokio::test]
async fn test_empty_username_is_refused_locally() {
    let harness = TestHarness::new();
    let result = harness.connect_as(Credentials::user("", "secret")).await;
    assert!(matches!(result, Err(Error::InvalidParameter(_))));
    assert_eq!(harness.control.received(Smb2Command::Negotiate), 0);
}

#[tokio::test]
async fn test_guest_session() {
    let harness = TestHarness::new();
    let session = harness.connect_as(Credentials::Guest).await.unwrap();
    assert!(session.is_guest());
    assert!(!session.is_signing());

    let tree = session.open_tree("Public").await.unwrap();
    assert_eq!(session.tree_count(), 1);
    tree.disconnect().await.unwrap();
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_guest_refused_by_server() {
    let harness = TestHarness::new().with_options(MockOptions {
        allow_guest: false,
        ..MockOptions::default()
    });
    let result = harness.connect_as(Credentials::Guest).await;
    assert!(matches!(result, Err(Error::AuthenticationRejected(_))));
}

async fn signed_session(dialect: Smb2Dialect, expected: SigningAlgorithm) {
    let harness = TestHarness::new().with_options(MockOptions {
        dialects: vec![dialect],
        require_signing: true,
        ..MockOptions::default()
    });
    harness.control.add_file("hello.txt", b"signed data");

    let session = harness.connect().await.unwrap();
    assert_eq!(session.dialect(), dialect);
    assert!(session.is_signing());
    assert_eq!(expected, SigningAlgorithm::for_dialect(dialect));

    let tree = session.open_tree("Public").await.unwrap();
    let file = tree
        .open_file("hello.txt", crate::client::OpenMode::Read)
        .await
        .unwrap();
    assert_eq!(file.read(0, 64).await.unwrap(), b"signed data");
    file.close().await.unwrap();
    session.echo().await.unwrap();

    // tree connect, create, read, close and echo all went out signed
    assert!(harness.control.signed_requests() >= 5);
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_signed_session_smb21_hmac() {
    signed_session(Smb2Dialect::Smb210, SigningAlgorithm::HmacSha256).await;
}

#[tokio::test]
async fn test_signed_session_smb30_cmac() {
    signed_session(Smb2Dialect::Smb300, SigningAlgorithm::AesCmac).await;
}

#[tokio::test]
async fn test_client_requested_signing() {
    let config = ClientConfig {
        require_signing: true,
        ..ClientConfig::default()
    };
    let harness = TestHarness::new().with_config(config);
    let session = harness.connect().await.unwrap();
    assert!(session.is_signing());
    session.echo().await.unwrap();
    assert_eq!(harness.control.signed_requests(), 1);
    session.close().await.unwrap();
}

fn raw_negotiator(harness: &TestHarness) -> (Arc<Dispatcher>, Negotiator) {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    super::mock_server::spawn(server_io, harness.options.clone(), Arc::clone(&harness.control));
    let (reader, writer) = Connection::from_stream(client_io, harness.config.max_frame_size).into_split();
    let dispatcher = Dispatcher::start(reader, writer, &harness.config);
    let negotiator = Negotiator::new(Arc::clone(&dispatcher), Arc::new(harness.config.clone()));
    (dispatcher, negotiator)
}

#[tokio::test]
async fn test_concurrent_handshake_is_refused() {
    let harness = TestHarness::new();
    harness.control.stall(Smb2Command::Negotiate);
    let (dispatcher, negotiator) = raw_negotiator(&harness);
    let negotiator = Arc::new(negotiator);

    let first = {
        let negotiator = Arc::clone(&negotiator);
        let credentials = harness.credentials();
        tokio::spawn(async move { negotiator.negotiate(&credentials).await })
    };
    harness.control.wait_for(Smb2Command::Negotiate, 1).await;

    let second = negotiator.negotiate(&harness.credentials()).await;
    assert!(matches!(second, Err(Error::HandshakeInProgress)));

    first.abort();
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_negotiator_on_same_connection_is_refused() {
    let harness = TestHarness::new();
    harness.control.stall(Smb2Command::Negotiate);
    let (dispatcher, negotiator) = raw_negotiator(&harness);
    let other = Negotiator::new(Arc::clone(&dispatcher), Arc::new(harness.config.clone()));

    let first = {
        let credentials = harness.credentials();
        tokio::spawn(async move { negotiator.negotiate(&credentials).await })
    };
    harness.control.wait_for(Smb2Command::Negotiate, 1).await;

    let second = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        other.negotiate(&harness.credentials()),
    )
    .await;
    assert!(matches!(second, Ok(Err(Error::HandshakeInProgress))));
    assert_eq!(harness.control.received(Smb2Command::Negotiate), 1);

    first.abort();
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_state_is_shared_across_negotiators() {
    let harness = TestHarness::new();
    let (dispatcher, negotiator) = raw_negotiator(&harness);
    negotiator.negotiate(&harness.credentials()).await.unwrap();

    let other = Negotiator::new(Arc::clone(&dispatcher), Arc::new(harness.config.clone()));
    assert_eq!(other.state(), NegotiationState::Authenticated);
    let again = other.negotiate(&harness.credentials()).await;
    assert!(matches!(again, Err(Error::InvalidState(_))));
    assert_eq!(harness.control.received(Smb2Command::Negotiate), 1);
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_negotiate_after_authentication_is_invalid() {
    let harness = TestHarness::new();
    let (dispatcher, negotiator) = raw_negotiator(&harness);

    let established = negotiator.negotiate(&harness.credentials()).await.unwrap();
    assert_ne!(established.session_id, 0);
    assert_eq!(negotiator.state(), NegotiationState::Authenticated);

    let again = negotiator.negotiate(&harness.credentials()).await;
    assert!(matches!(again, Err(Error::InvalidState(_))));
    assert_eq!(negotiator.state(), NegotiationState::Authenticated);
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_handshake_state() {
    let harness = TestHarness::new();
    let (dispatcher, negotiator) = raw_negotiator(&harness);

    let result = negotiator
        .negotiate(&Credentials::user("alice", "wrong"))
        .await;
    assert!(result.is_err());
    assert_eq!(negotiator.state(), NegotiationState::Failed);
    dispatcher.shutdown().await.unwrap();
}
