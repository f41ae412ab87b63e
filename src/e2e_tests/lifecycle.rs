//! Session, tree and handle lifecycle

use super::TestHarness;
use crate::client::OpenMode;
use crate::error::Error;
use crate::protocol::smb2_constants::Smb2Command;

#[tokio::test]
async fn test_missing_share() {
    let harness = TestHarness::new();
    let session = harness.connect().await.unwrap();

    let result = session.open_tree("NoSuchShare").await;
    assert!(matches!(result, Err(Error::ShareNotFound(_))));
    assert_eq!(session.tree_count(), 0);
    assert!(session.is_active());
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_logoff_releases_trees_and_handles() {
    let harness = TestHarness::new();
    harness.control.add_file("a.txt", b"aaa");
    harness.control.add_file("b.txt", b"bbb");

    let session = harness.connect().await.unwrap();
    let tree = session.open_tree("Public").await.unwrap();
    let a = tree.open_file("a.txt", OpenMode::Read).await.unwrap();
    let b = tree.open_file("b.txt", OpenMode::Read).await.unwrap();
    assert_eq!(session.tree_count(), 1);
    assert_eq!(session.handle_count(), 2);

    session.logoff().await.unwrap();
    assert!(!session.is_active());
    assert_eq!(session.tree_count(), 0);
    assert_eq!(session.handle_count(), 0);
    assert_eq!(harness.control.received(Smb2Command::Logoff), 1);

    assert!(a.read(0, 3).await.is_err());
    assert!(tree.open_file("a.txt", OpenMode::Read).await.is_err());
    drop(b);

    // a second logoff is a no-op
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_close_without_logoff() {
    let harness = TestHarness::new();
    let session = harness.connect().await.unwrap();
    let _tree = session.open_tree("Public").await.unwrap();

    session.close().await.unwrap();
    assert_eq!(session.tree_count(), 0);
    assert_eq!(harness.control.received(Smb2Command::Logoff), 0);
    assert!(session.echo().await.is_err());
}

#[tokio::test]
async fn test_tree_disconnect_invalidates_its_handles() {
    let harness = TestHarness::new();
    harness.control.add_file("a.txt", b"aaa");

    let session = harness.connect().await.unwrap();
    let tree = session.open_tree("Public").await.unwrap();
    let other = session.open_tree("Public").await.unwrap();
    let file = tree.open_file("a.txt", OpenMode::Read).await.unwrap();
    assert_eq!(session.tree_count(), 2);

    tree.disconnect().await.unwrap();
    assert_eq!(session.tree_count(), 1);
    assert_eq!(session.handle_count(), 0);
    assert!(matches!(file.read(0, 3).await, Err(Error::HandleInvalid)));

    other.disconnect().await.unwrap();
    assert_eq!(session.tree_count(), 0);
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_read_racing_close_fails_with_handle_invalid() {
    let harness = TestHarness::new();
    harness.control.add_file("slow.bin", &[7u8; 128]);
    let tree = harness.open_share().await.unwrap();
    let file = tree.open_file("slow.bin", OpenMode::Read).await.unwrap();

    harness.control.stall(Smb2Command::Read);
    let read = {
        let file = file.clone();
        tokio::spawn(async move { file.read(0, 128).await })
    };
    harness.control.wait_for(Smb2Command::Read, 1).await;

    file.close().await.unwrap();
    let result = read.await.unwrap();
    assert!(matches!(result, Err(Error::HandleInvalid)));
    assert_eq!(tree.session().handle_count(), 0);

    assert!(matches!(file.close().await, Err(Error::HandleInvalid)));
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_dropped_handle_is_closed_in_background() {
    let harness = TestHarness::new();
    harness.control.add_file("a.txt", b"aaa");
    let tree = harness.open_share().await.unwrap();

    let file = tree.open_file("a.txt", OpenMode::Read).await.unwrap();
    assert_eq!(tree.session().handle_count(), 1);
    drop(file);

    harness.control.wait_for(Smb2Command::Close, 1).await;
    assert_eq!(tree.session().handle_count(), 0);
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_open_missing_file() {
    let harness = TestHarness::new();
    let tree = harness.open_share().await.unwrap();

    let result = tree.open_file("missing.txt", OpenMode::Read).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(tree.session().handle_count(), 0);
    tree.session().logoff().await.unwrap();
}
