//! Request correlation, deadlines and connection failure

use super::TestHarness;
use crate::client::dispatch::Scope;
use crate::error::{Error, ErrorKind};
use crate::protocol::messages::Body;
use crate::protocol::smb2_constants::Smb2Command;
use std::time::Duration;

#[tokio::test]
async fn test_unmatched_response_is_dropped() {
    let harness = TestHarness::new();
    let session = harness.connect().await.unwrap();

    harness.control.inject_stray_response();
    session.echo().await.unwrap();
    session.echo().await.unwrap();
    assert!(session.is_active());
    session.logoff().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expires_and_connection_survives() {
    let harness = TestHarness::new();
    let session = harness.connect().await.unwrap();

    harness.control.stall(Smb2Command::Echo);
    let request = session.request(Smb2Command::Echo, 0, Body::Empty);
    let started = tokio::time::Instant::now();
    let result = session
        .call(request, Scope::session(session.id()), Some(Duration::from_secs(2)))
        .await;
    assert!(matches!(result, Err(Error::Timeout)));
    assert!(started.elapsed() >= Duration::from_secs(2));

    harness.control.resume(Smb2Command::Echo);
    session.echo().await.unwrap();
    assert!(session.is_active());
    session.logoff().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stalled_request_does_not_block_others() {
    let harness = TestHarness::new();
    harness.control.add_file("a.txt", b"abc");
    let tree = harness.open_share().await.unwrap();
    let session = tree.session().clone();

    harness.control.stall(Smb2Command::Echo);
    let stalled = {
        let session = session.clone();
        tokio::spawn(async move {
            let request = session.request(Smb2Command::Echo, 0, Body::Empty);
            session
                .call(request, Scope::session(session.id()), Some(Duration::from_secs(5)))
                .await
        })
    };
    harness.control.wait_for(Smb2Command::Echo, 1).await;

    let metadata = tree.stat("a.txt").await.unwrap();
    assert_eq!(metadata.size, 3);
    assert!(matches!(stalled.await.unwrap(), Err(Error::Timeout)));
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_fails_pending_and_later_requests() {
    let harness = TestHarness::new();
    let session = harness.connect().await.unwrap();

    harness.control.drop_connection_on(Smb2Command::Echo);
    let result = session.echo().await;
    let error = result.unwrap_err();
    assert!(matches!(error, Error::ConnectionLost(_)), "{:?}", error);
    assert_eq!(error.kind(), ErrorKind::Transport);

    let again = session.echo().await.unwrap_err();
    assert!(matches!(again, Error::ConnectionLost(_)), "{:?}", again);
    assert!(session.open_tree("Public").await.is_err());
}

#[tokio::test]
async fn test_disconnect_during_handshake() {
    let harness = TestHarness::new();
    harness.control.drop_connection_on(Smb2Command::SessionSetup);

    let result = harness.connect().await;
    assert!(matches!(result, Err(Error::ConnectionLost(_))));
}

#[tokio::test]
async fn test_concurrent_requests_share_one_connection() {
    let harness = TestHarness::new();
    for i in 0..8 {
        harness
            .control
            .add_file(&format!("f{}.txt", i), format!("content {}", i).as_bytes());
    }
    let tree = harness.open_share().await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let tree = tree.clone();
            tokio::spawn(async move { tree.stat(&format!("f{}.txt", i)).await })
        })
        .collect();
    for (i, task) in tasks.into_iter().enumerate() {
        let metadata = task.await.unwrap().unwrap();
        assert_eq!(metadata.size, format!("content {}", i).len() as u64);
    }
    assert_eq!(tree.session().handle_count(), 0);
    tree.session().logoff().await.unwrap();
}
