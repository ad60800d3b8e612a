//! Integration tests for exchanging blocks between two stores

mod common;

use std::io::Cursor;

use eft::archive::{ArchiveError, ArchiveReader};
use eft::prelude::*;

/// A fetcher serving blocks straight out of `source`
fn serve(source: &Store) -> impl FnMut(&BlockSet) -> anyhow::Result<Cursor<Vec<u8>>> + '_ {
    move |wanted: &BlockSet| -> anyhow::Result<Cursor<Vec<u8>>> {
        let archive = source.export_archive(wanted, Vec::new())?;
        Ok(Cursor::new(archive))
    }
}

#[test]
fn test_fetch_whole_tree() {
    let (local, remote, _temp) = common::setup_peers();
    let big = common::patterned(300_000, 5);
    common::put_bytes(&remote, "/hi.txt", b"hai there");
    common::put_bytes(&remote, "/big.bin", &big);
    let root = remote.snapshot(MAIN).unwrap().unwrap();

    assert_eq!(local.missing_blocks(&root).unwrap().len(), 1);
    let fetched = local.fetch_remote(&root, &mut serve(&remote)).unwrap();
    let expected: BlockSet = common::reachable_from(&remote, &root).into_iter().collect();
    assert_eq!(fetched, expected);
    assert_eq!(local.snapshot(REMOTE).unwrap(), Some(root));
    assert!(local.missing_blocks(&root).unwrap().is_empty());

    // the fetched tree is kept alive by the remote snapshot
    common::assert_gc_exact(&local);
    assert!(local.collect_garbage().unwrap().dead.is_empty());
}

#[test]
fn test_incremental_fetch() {
    let (local, remote, _temp) = common::setup_peers();
    for i in 0..50 {
        common::put_bytes(&remote, &format!("/doc-{}", i), format!("body {}", i).as_bytes());
    }
    let first = remote.snapshot(MAIN).unwrap().unwrap();
    let all = local.fetch_remote(&first, &mut serve(&remote)).unwrap();

    common::put_bytes(&remote, "/doc-7", b"edited");
    let second = remote.snapshot(MAIN).unwrap().unwrap();
    let delta = local.fetch_remote(&second, &mut serve(&remote)).unwrap();

    // a new item block plus the new nodes on its path
    assert!(delta.contains(&second));
    assert!(delta.len() < 5);
    assert!(delta.len() < all.len());
    assert_eq!(local.snapshot(REMOTE).unwrap(), Some(second));
}

#[test]
fn test_resume_after_partial_fetch() {
    let (local, remote, _temp) = common::setup_peers();
    let big = common::patterned(200_000, 6);
    common::put_bytes(&remote, "/big.bin", &big);
    let root = remote.snapshot(MAIN).unwrap().unwrap();

    // only hand over the first level, then go offline
    let mut calls = 0;
    let mut flaky = |wanted: &BlockSet| -> anyhow::Result<Cursor<Vec<u8>>> {
        calls += 1;
        if calls > 1 {
            anyhow::bail!("connection reset");
        }
        Ok(Cursor::new(remote.export_archive(wanted, Vec::new())?))
    };
    let err = local.fetch_remote(&root, &mut flaky).unwrap_err();
    assert!(matches!(err, StoreError::Fetch(_)));
    assert!(local.blocks().contains(&root));
    assert_eq!(local.snapshot(REMOTE).unwrap(), None);
    assert!(!local.missing_blocks(&root).unwrap().is_empty());

    local.fetch_remote(&root, &mut serve(&remote)).unwrap();
    assert!(local.missing_blocks(&root).unwrap().is_empty());
}

#[test]
fn test_archive_from_foreign_store_rejected() {
    let (local, _remote, temp) = common::setup_peers();
    let stranger = common::open_store(&temp.path().join("stranger"), Key::generate());
    common::put_bytes(&stranger, "/x", b"x");
    let root = stranger.snapshot(MAIN).unwrap().unwrap();

    let archive = stranger
        .export_archive(&[root].into_iter().collect(), Vec::new())
        .unwrap();
    let err = ArchiveReader::new(archive.as_slice())
        .extract(local.blocks())
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Block(_)));
    assert!(!local.blocks().contains(&root));
}

#[test]
fn test_export_missing_block() {
    let (local, _remote, _temp) = common::setup_peers();
    let wanted: BlockSet = [Hash::digest(b"absent")].into_iter().collect();
    let err = local.export_archive(&wanted, Vec::new()).unwrap_err();
    assert!(err.is_not_found());
}
