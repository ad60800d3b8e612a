//! Shared test utilities for store integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use eft::block::BlockStore;
use eft::item::{path_key, ItemInfo, PathKeys, SMALL_ITEM_MAX};
use eft::prelude::*;
use eft::trie::{EntryKind, Trie, TrieNode};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tempfile::TempDir;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Route store logs to the test harness, filtered by `RUST_LOG`
pub fn init_tracing() {
    let layer = tracing_subscriber::fmt::layer()
        .with_test_writer()
        .with_filter(EnvFilter::from_default_env());
    // a subscriber from another test in this binary may already be installed
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

/// Set up a test environment with a fresh store and a new key
pub fn setup_test_env() -> (Store, TempDir) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir.path().join("store"), Key::generate());
    (store, temp_dir)
}

/// Open (or create) a store without fsyncs
pub fn open_store(dir: &Path, key: Key) -> Store {
    let config = StoreConfig::new(dir, key).with_sync_writes(false);
    Store::open(&config).unwrap()
}

/// Two stores sharing one key, as two peers of a sync would
pub fn setup_peers() -> (Store, Store, TempDir) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let key = Key::generate();
    let local = open_store(&temp_dir.path().join("local"), key.clone());
    let remote = open_store(&temp_dir.path().join("remote"), key);
    (local, remote, temp_dir)
}

/// Deterministic pseudo-random content
pub fn patterned(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

pub fn put_bytes(store: &Store, path: &str, data: &[u8]) -> ItemInfo {
    store
        .put(&ItemInfo::file(path, data.len() as u64), data)
        .unwrap()
}

pub fn cat(store: &Store, path: &str) -> Vec<u8> {
    let mut out = Vec::new();
    store.get(path, &mut out).unwrap();
    out
}

/// The item hash stored at `path` in the main tree
pub fn item_hash(store: &Store, path: &str) -> Hash {
    let root = store.snapshot(MAIN).unwrap().unwrap();
    *Trie::open(root, PathKeys)
        .find(store.blocks(), path_key(path).as_bytes())
        .unwrap()
        .hash()
}

/// Every block file under `<dir>/blocks`, found by listing the directory
pub fn block_files(store: &Store) -> HashSet<Hash> {
    let mut found = HashSet::new();
    collect_files(&store.dir().join("blocks"), &mut found);
    found
}

fn collect_files(dir: &Path, found: &mut HashSet<Hash>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_files(&path, found);
            continue;
        }
        let name = path.file_name().unwrap().to_str().unwrap();
        if let Ok(hash) = Hash::from_hex(name) {
            found.insert(hash);
        }
    }
}

/// Every block reachable from any snapshot, by a recursive walk over raw
/// nodes and item headers
pub fn reachable(store: &Store) -> HashSet<Hash> {
    let mut out = HashSet::new();
    for root in store.snapshots().unwrap().values() {
        walk_node(store.blocks(), root, false, &mut out);
    }
    out
}

/// Every block reachable from `root`
pub fn reachable_from(store: &Store, root: &Hash) -> HashSet<Hash> {
    let mut out = HashSet::new();
    walk_node(store.blocks(), root, false, &mut out);
    out
}

/// The blocks making up one item
pub fn item_blocks(store: &Store, item: &Hash) -> HashSet<Hash> {
    let mut out = HashSet::new();
    walk_item(store.blocks(), item, &mut out);
    out
}

fn walk_node(blocks: &BlockStore, hash: &Hash, chunks: bool, out: &mut HashSet<Hash>) {
    out.insert(*hash);
    let node = TrieNode::load(blocks, hash).unwrap();
    for (_, entry) in node.entries() {
        match entry.kind() {
            EntryKind::None => {}
            EntryKind::More => walk_node(blocks, entry.hash(), chunks, out),
            EntryKind::Item if chunks => {
                out.insert(*entry.hash());
            }
            EntryKind::Item => walk_item(blocks, entry.hash(), out),
        }
    }
}

fn walk_item(blocks: &BlockStore, hash: &Hash, out: &mut HashSet<Hash>) {
    let block = blocks.get(hash).unwrap();
    let info = ItemInfo::from_bytes(&block).unwrap();
    if info.size <= SMALL_ITEM_MAX {
        out.insert(*hash);
    } else {
        walk_node(blocks, hash, true, out);
    }
}

/// Collection must report exactly the blocks no snapshot reaches
pub fn assert_gc_exact(store: &Store) -> GcReport {
    let report = store.collect_garbage().unwrap();
    let files = block_files(store);
    let live = reachable(store);
    let dead: HashSet<Hash> = report.dead.iter().copied().collect();

    let expected: HashSet<Hash> = files.difference(&live).copied().collect();
    assert_eq!(dead, expected, "dead set differs from independent walk");
    assert_eq!(report.scanned, files.len());
    assert_eq!(report.live, live.len());
    report
}
