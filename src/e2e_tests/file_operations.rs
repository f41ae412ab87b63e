//! File and directory operations

use super::{MockOptions, TestHarness};
use crate::client::OpenMode;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::protocol::smb2_constants::Smb2Command;
use std::io::SeekFrom;

fn small_chunks() -> ClientConfig {
    ClientConfig {
        io_chunk_size: 1000,
        ..ClientConfig::default()
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_read_is_chunked_and_stops_at_eof() {
    let harness = TestHarness::new().with_config(small_chunks());
    let content = pattern(2500);
    harness.control.add_file("data.bin", &content);
    let tree = harness.open_share().await.unwrap();
    assert_eq!(tree.session().read_chunk_size(), 1000);

    let file = tree.open_file("data.bin", OpenMode::Read).await.unwrap();
    assert_eq!(file.opened_metadata().size, 2500);

    let all = file.read(0, 10_000).await.unwrap();
    assert_eq!(all, content);
    assert_eq!(harness.control.received(Smb2Command::Read), 3);

    let tail = file.read(2400, 500).await.unwrap();
    assert_eq!(tail, &content[2400..]);

    assert!(file.read(2500, 10).await.unwrap().is_empty());
    assert!(file.read(9000, 10).await.unwrap().is_empty());

    file.close().await.unwrap();
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_write_is_chunked() {
    let harness = TestHarness::new().with_config(small_chunks());
    let tree = harness.open_share().await.unwrap();
    let content = pattern(2100);

    let file = tree.open_file("new.bin", OpenMode::Create).await.unwrap();
    assert_eq!(file.write(0, &content).await.unwrap(), 2100);
    assert_eq!(harness.control.received(Smb2Command::Write), 3);
    file.flush().await.unwrap();
    assert_eq!(file.metadata().await.unwrap().size, 2100);
    file.close().await.unwrap();

    assert_eq!(harness.control.file("new.bin").unwrap(), content);
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_cursor_reads_and_writes() {
    let harness = TestHarness::new();
    harness.control.add_file("log.txt", b"0123456789");
    let tree = harness.open_share().await.unwrap();

    let file = tree.open_file("log.txt", OpenMode::ReadWrite).await.unwrap();
    assert_eq!(file.read_next(4).await.unwrap(), b"0123");
    assert_eq!(file.position(), 4);
    assert_eq!(file.read_next(4).await.unwrap(), b"4567");

    assert_eq!(file.seek(SeekFrom::End(0)).await.unwrap(), 10);
    assert_eq!(file.write_next(b"ab").await.unwrap(), 2);
    assert_eq!(file.position(), 12);

    assert_eq!(file.seek(SeekFrom::Current(-3)).await.unwrap(), 9);
    assert_eq!(file.read_next(10).await.unwrap(), b"9ab");
    assert!(matches!(
        file.seek(SeekFrom::Current(-100)).await,
        Err(Error::InvalidParameter(_))
    ));

    file.close().await.unwrap();
    assert_eq!(harness.control.file("log.txt").unwrap(), b"0123456789ab");
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_create_existing_file_fails() {
    let harness = TestHarness::new();
    harness.control.add_file("taken.txt", b"x");
    let tree = harness.open_share().await.unwrap();

    let result = tree.open_file("taken.txt", OpenMode::Create).await;
    assert!(matches!(result, Err(Error::AlreadyExists(_))));

    let file = tree.open_file("taken.txt", OpenMode::Overwrite).await.unwrap();
    assert_eq!(file.opened_metadata().size, 0);
    file.close().await.unwrap();
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_directory_listing_spans_batches() {
    let harness = TestHarness::new().with_options(MockOptions {
        directory_batch: 3,
        ..MockOptions::default()
    });
    harness.control.add_dir("docs");
    for name in ["a.txt", "b.txt", "c.txt", ".hidden", "e.txt", "f.txt"] {
        harness.control.add_file(&format!("docs\\{}", name), name.as_bytes());
    }
    harness.control.add_dir("docs\\sub");
    harness.control.add_file("outside.txt", b"not listed");
    let tree = harness.open_share().await.unwrap();

    let listing = tree.list_directory("/docs").await.unwrap();
    let entries = listing.collect().await.unwrap();
    let mut names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    names.sort();
    assert_eq!(
        names,
        vec![".hidden", "a.txt", "b.txt", "c.txt", "e.txt", "f.txt", "sub"]
    );
    // 9 records with "." and "..", three per batch, then NoMoreFiles
    assert_eq!(harness.control.received(Smb2Command::QueryDirectory), 4);
    assert_eq!(tree.session().handle_count(), 0);

    let hidden = entries.iter().find(|e| e.name == ".hidden").unwrap();
    assert!(hidden.is_hidden());
    let sub = entries.iter().find(|e| e.name == "sub").unwrap();
    assert!(sub.is_directory());
    let a = entries.iter().find(|e| e.name == "a.txt").unwrap();
    assert_eq!(a.size, 5);
    assert!(a.modified.is_some());

    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_listing_closed_early() {
    let harness = TestHarness::new().with_options(MockOptions {
        directory_batch: 1,
        ..MockOptions::default()
    });
    harness.control.add_file("one.txt", b"1");
    harness.control.add_file("two.txt", b"2");
    let tree = harness.open_share().await.unwrap();

    let mut listing = tree.list_directory("").await.unwrap();
    assert!(listing.next_entry().await.unwrap().is_some());
    assert!(listing.is_open());
    listing.close().await.unwrap();
    assert_eq!(tree.session().handle_count(), 0);
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_list_missing_directory() {
    let harness = TestHarness::new();
    let tree = harness.open_share().await.unwrap();
    let result = tree.list_directory("nowhere").await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_stat() {
    let harness = TestHarness::new();
    harness.control.add_dir("docs");
    harness.control.add_file("docs\\report.pdf", &[0u8; 5000]);
    let tree = harness.open_share().await.unwrap();

    let file = tree.stat("docs/report.pdf").await.unwrap();
    assert_eq!(file.size, 5000);
    assert_eq!(file.allocation_size, 8192);
    assert!(!file.is_directory());
    assert!(file.created.is_some());

    let dir = tree.stat("docs").await.unwrap();
    assert!(dir.is_directory());
    assert_eq!(tree.session().handle_count(), 0);

    assert!(matches!(tree.stat("nope").await, Err(Error::NotFound(_))));
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_rename() {
    let harness = TestHarness::new();
    harness.control.add_file("old.txt", b"payload");
    harness.control.add_file("other.txt", b"other");
    let tree = harness.open_share().await.unwrap();

    tree.rename("old.txt", "new.txt", false).await.unwrap();
    assert!(!harness.control.exists("old.txt"));
    assert_eq!(harness.control.file("new.txt").unwrap(), b"payload");

    let clash = tree.rename("new.txt", "other.txt", false).await;
    assert!(matches!(clash, Err(Error::AlreadyExists(_))));
    assert!(harness.control.exists("new.txt"));

    tree.rename("new.txt", "other.txt", true).await.unwrap();
    assert_eq!(harness.control.file("other.txt").unwrap(), b"payload");

    assert!(matches!(
        tree.rename("/", "x", false).await,
        Err(Error::InvalidParameter(_))
    ));
    assert_eq!(tree.session().handle_count(), 0);
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_delete() {
    let harness = TestHarness::new();
    harness.control.add_file("gone.txt", b"bye");
    harness.control.add_dir("full");
    harness.control.add_file("full\\keep.txt", b"keep");
    let tree = harness.open_share().await.unwrap();

    tree.delete("gone.txt").await.unwrap();
    assert!(!harness.control.exists("gone.txt"));

    assert!(tree.delete("full").await.is_err());
    assert!(harness.control.exists("full"));

    assert!(matches!(tree.delete("gone.txt").await, Err(Error::NotFound(_))));
    assert!(matches!(tree.delete("").await, Err(Error::InvalidParameter(_))));
    assert_eq!(tree.session().handle_count(), 0);
    tree.session().logoff().await.unwrap();
}

#[tokio::test]
async fn test_mkdir() {
    let harness = TestHarness::new();
    let tree = harness.open_share().await.unwrap();

    tree.mkdir("photos").await.unwrap();
    tree.mkdir("photos/2024").await.unwrap();
    assert!(tree.stat("photos\\2024").await.unwrap().is_directory());

    let again = tree.mkdir("photos").await;
    assert!(matches!(again, Err(Error::AlreadyExists(_))));

    let orphan = tree.mkdir("missing/child").await;
    assert!(matches!(orphan, Err(Error::NotFound(_))));
    tree.session().logoff().await.unwrap();
}
