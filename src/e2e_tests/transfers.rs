//! Whole-file transfers and real TCP connections

use super::{mock_server, MockControl, MockOptions, TestHarness};
use crate::client::transfer::{download, upload};
use crate::client::{SmbClient, SmbPath, TransferControl, TransferProgress, TransferState};
use crate::config::ClientConfig;
use crate::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

fn small_chunks() -> ClientConfig {
    ClientConfig {
        io_chunk_size: 1000,
        ..ClientConfig::default()
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[tokio::test]
async fn test_download_reports_progress() {
    let harness = TestHarness::new().with_config(small_chunks());
    let content = pattern(2500);
    harness.control.add_dir("docs");
    harness.control.add_file("docs\\report.bin", &content);
    let tree = harness.open_share().await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let control = TransferControl::new();
    let mut seen: Vec<TransferProgress> = Vec::new();
    let written = download(&tree, "docs/report.bin", dir.path(), &control, |p| seen.push(p))
        .await
        .unwrap();

    assert_eq!(written, dir.path().join("report.bin"));
    assert_eq!(std::fs::read(&written).unwrap(), content);
    assert!(!dir.path().join("report.bin.part").exists());
    assert_eq!(control.state(), TransferState::Completed);

    let transferred: Vec<u64> = seen.iter().map(|p| p.transferred).collect();
    assert_eq!(transferred, vec![0, 1000, 2000, 2500]);
    assert!(seen.iter().all(|p| p.total == 2500));
    assert_eq!(tree.session().handle_count(), 0);
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_download_picks_unique_name() {
    let harness = TestHarness::new();
    harness.control.add_file("photo.jpg", b"new bytes");
    let tree = harness.open_share().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("photo.jpg"), b"old bytes").unwrap();

    let first = download(&tree, "photo.jpg", dir.path(), &TransferControl::new(), |_| {})
        .await
        .unwrap();
    let second = download(&tree, "photo.jpg", dir.path(), &TransferControl::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(first, dir.path().join("photo-1.jpg"));
    assert_eq!(second, dir.path().join("photo-2.jpg"));
    assert_eq!(std::fs::read(dir.path().join("photo.jpg")).unwrap(), b"old bytes");
    assert_eq!(std::fs::read(&second).unwrap(), b"new bytes");
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_download_resumes_partial_file() {
    let harness = TestHarness::new().with_config(small_chunks());
    let content = pattern(3000);
    harness.control.add_file("big.bin", &content);
    let tree = harness.open_share().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("big.bin");
    std::fs::write(dir.path().join("big.bin.part"), &content[..1200]).unwrap();

    let mut first_progress = None;
    let written = download(&tree, "big.bin", &target, &TransferControl::new(), |p| {
        first_progress.get_or_insert(p.transferred);
    })
    .await
    .unwrap();

    assert_eq!(written, target);
    assert_eq!(first_progress, Some(1200));
    assert_eq!(std::fs::read(&target).unwrap(), content);
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_download_keeps_partial_file() {
    let harness = TestHarness::new().with_config(small_chunks());
    let content = pattern(4000);
    harness.control.add_file("movie.bin", &content);
    let tree = harness.open_share().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("movie.bin");
    let partial = dir.path().join("movie.bin.part");

    let control = TransferControl::new();
    let canceller = control.clone();
    let result = download(&tree, "movie.bin", &target, &control, move |p| {
        if p.transferred >= 2000 {
            canceller.cancel();
        }
    })
    .await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(control.state(), TransferState::Cancelled);
    assert!(!target.exists());
    assert_eq!(std::fs::metadata(&partial).unwrap().len(), 2000);
    assert_eq!(tree.session().handle_count(), 0);

    // a fresh transfer picks up where the cancelled one stopped
    let written = download(&tree, "movie.bin", &target, &TransferControl::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(std::fs::read(&written).unwrap(), content);
    assert!(!partial.exists());
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_download_missing_file() {
    let harness = TestHarness::new();
    let tree = harness.open_share().await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let control = TransferControl::new();
    let result = download(&tree, "nope.txt", dir.path(), &control, |_| {}).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(control.state(), TransferState::Failed);
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_upload() {
    let harness = TestHarness::new().with_config(small_chunks());
    harness.control.add_file("up.bin", b"stale content that is longer than nothing");
    let tree = harness.open_share().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("up.bin");
    let content = pattern(2500);
    std::fs::write(&local, &content).unwrap();

    let control = TransferControl::new();
    let mut last = None;
    let sent = upload(&tree, &local, "up.bin", &control, |p| last = Some(p))
        .await
        .unwrap();

    assert_eq!(sent, 2500);
    assert_eq!(
        last,
        Some(TransferProgress {
            transferred: 2500,
            total: 2500
        })
    );
    assert_eq!(harness.control.file("up.bin").unwrap(), content);
    assert_eq!(control.state(), TransferState::Completed);

    let again = upload(&tree, &local, "up.bin", &control, |_| {}).await;
    assert!(matches!(again, Err(Error::InvalidState(_))));
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_upload_missing_local_file() {
    let harness = TestHarness::new();
    let tree = harness.open_share().await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let result = upload(
        &tree,
        &dir.path().join("absent.bin"),
        "absent.bin",
        &TransferControl::new(),
        |_| {},
    )
    .await;
    assert!(matches!(result, Err(Error::LocalFile(_))));
    assert!(!harness.control.exists("absent.bin"));
    tree.session().logoff().await.unwrap();
}

async fn tcp_server(control: Arc<MockControl>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            mock_server::spawn(stream, MockOptions::default(), Arc::clone(&control));
        }
    });
    addr
}

#[tokio::test]
async fn test_tcp_loopback_session() {
    let harness = TestHarness::new();
    harness.control.add_file("hello.txt", b"over tcp");
    let addr = tcp_server(Arc::clone(&harness.control)).await;

    let client = SmbClient::new(ClientConfig::default());
    let session = client
        .connect(addr, "localhost", harness.credentials())
        .await
        .unwrap();
    let tree = session.open_tree("Public").await.unwrap();
    assert_eq!(tree.path(), "\\\\localhost\\Public");

    let file = tree
        .open_file("hello.txt", crate::client::OpenMode::Read)
        .await
        .unwrap();
    assert_eq!(file.read(0, 100).await.unwrap(), b"over tcp");
    file.close().await.unwrap();
    session.logoff().await.unwrap();
}

#[tokio::test]
async fn test_connect_share_by_url() {
    let harness = TestHarness::new();
    harness.control.add_file("notes.txt", b"by url");
    let addr = tcp_server(Arc::clone(&harness.control)).await;

    let config = ClientConfig {
        port: addr.port(),
        ..ClientConfig::default()
    };
    let client = SmbClient::new(config);
    let url = format!("smb://{}/Public/notes.txt", addr.ip());
    let path = SmbPath::parse(&url).unwrap();

    let tree = client
        .connect_share(&path, harness.credentials())
        .await
        .unwrap();
    let metadata = tree.stat(&path.relative_path()).await.unwrap();
    assert_eq!(metadata.size, 6);
    tree.session().logoff().await.unwrap();

    let missing = SmbPath::parse(&format!("smb://{}/Nope", addr.ip())).unwrap();
    let result = client.connect_share(&missing, harness.credentials()).await;
    assert!(matches!(result, Err(Error::ShareNotFound(_))));
}
