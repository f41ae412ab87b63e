//! Share enumeration over the srvsvc pipe

use super::{MockOptions, TestHarness};
use crate::rpc::srvsvc::ShareKind;
use crate::protocol::smb2_constants::Smb2Command;

fn server_with(shares: &[&str]) -> MockOptions {
    MockOptions {
        shares: shares.iter().map(|name| name.to_string()).collect(),
        ..MockOptions::default()
    }
}

#[tokio::test]
async fn test_list_shares_marks_hidden() {
    let harness = TestHarness::new().with_options(server_with(&["Public", "Media", "ADMIN$"]));
    let session = harness.connect().await.unwrap();

    let shares = session.list_shares().await.unwrap();
    let names: Vec<_> = shares.iter().map(|share| share.name.as_str()).collect();
    assert_eq!(names, ["Public", "Media", "ADMIN$", "IPC$"]);
    assert!(shares.iter().all(|share| share.server.hostname == "mockserver"));

    let visible: Vec<_> = shares
        .iter()
        .filter(|share| !share.is_hidden())
        .map(|share| share.name.as_str())
        .collect();
    assert_eq!(visible, ["Public", "Media"]);

    // IPC$ and the pipe are gone again
    assert_eq!(session.tree_count(), 0);
    assert_eq!(session.handle_count(), 0);
    assert_eq!(harness.control.received(Smb2Command::Close), 1);
    assert_eq!(harness.control.received(Smb2Command::TreeDisconnect), 1);

    let tree = session.open_tree(&shares[1].name).await.unwrap();
    tree.disconnect().await.unwrap();
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_share_info_reports_types() {
    let harness = TestHarness::new();
    let session = harness.connect().await.unwrap();

    let info = session.share_info().await.unwrap();
    assert_eq!(info.len(), 2);
    assert_eq!(info[0].name, "Public");
    assert_eq!(info[0].kind(), Some(ShareKind::Disk));
    assert!(!info[0].is_special());
    assert_eq!(info[1].name, "IPC$");
    assert_eq!(info[1].kind(), Some(ShareKind::Ipc));
    assert!(info[1].is_special());
    assert_eq!(info[1].comment, "Remote IPC");
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_long_listing_spans_fragments_and_reads() {
    let names: Vec<String> = (0..300).map(|i| format!("share{:03}", i)).collect();
    let harness = TestHarness::new().with_options(MockOptions {
        shares: names.clone(),
        rpc_fragment: 1024,
        ..MockOptions::default()
    });
    let session = harness.connect().await.unwrap();

    let shares = session.list_shares().await.unwrap();
    assert_eq!(shares.len(), 301);
    for (share, name) in shares.iter().zip(&names) {
        assert_eq!(&share.name, name);
    }
    // bind ack plus several overflowing reads for the response
    assert!(harness.control.received(Smb2Command::Read) >= 5);
    assert_eq!(harness.control.received(Smb2Command::Write), 2);
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_list_shares_on_signed_session() {
    let harness = TestHarness::new().with_options(MockOptions {
        require_signing: true,
        ..MockOptions::default()
    });
    let session = harness.connect().await.unwrap();
    assert!(session.is_signing());

    let shares = session.list_shares().await.unwrap();
    assert_eq!(shares.len(), 2);
    // tree connect, create, two writes, two reads, close, tree disconnect
    assert!(harness.control.signed_requests() >= 8);
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_list_shares_needs_live_session() {
    let harness = TestHarness::new();
    let session = harness.connect().await.unwrap();
    session.logoff().await.unwrap();

    assert!(session.list_shares().await.is_err());
    assert_eq!(harness.control.received(Smb2Command::TreeConnect), 0);
}
