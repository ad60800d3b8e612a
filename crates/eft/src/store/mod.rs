//! Transactions, snapshots and the store handle
//!
//! A [`Store`] is a directory:
//!
//! ```text
//! <dir>/
//!   blocks/<h[0:3]>/<h[3:6]>/<hex>   encrypted blocks
//!   snaps/<name>                     named roots ("main", "remote", ...)
//!   added                            blocks added since the last checkpoint
//!   lock                             advisory lock, holder's pid
//!   tmp/                             ledgers, merge markers, gc scratch
//! ```
//!
//! All mutation goes through a [`Transaction`], which holds the exclusive
//! store lock for its whole life. Every block it creates is recorded in a
//! ledger; [`Transaction::commit`] publishes the new roots, and
//! [`Transaction::abort`] deletes everything the ledger lists. Because no
//! existing block is ever rewritten, rollback is a pure deletion.
//!
//! The handle itself holds no transaction state and is cheap to clone.

mod conflict;
mod markers;
mod merge;
mod transaction;
pub(crate) mod tree;

pub use conflict::{
    BaseWins, Conflict, ConflictFile, ConflictResolver, LastWriteWins, Resolution,
    ResolvedConflict,
};
pub use markers::{marked_roots, remove_stale, RootMarkers, ROOTS_DIR_NAME};
pub use merge::{MergeOutcome, MergeReport};
pub use transaction::Transaction;

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::block::{BlockStore, BlockStoreError};
use crate::config::StoreConfig;
use crate::crypto::{Hash, Key};
use crate::item::{get_item, item_info, ItemError, ItemInfo};
use crate::ledger::{recover_stale, TMP_DIR_NAME};
use crate::lock::{LockError, LockGuard, StoreLock};
use crate::snapshot::{SnapshotError, Snapshots, MAIN};
use crate::trie::TrieError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("block error: {0}")]
    Block(#[from] BlockStoreError),
    #[error("trie error: {0}")]
    Trie(TrieError),
    #[error("item error: {0}")]
    Item(ItemError),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("archive error: {0}")]
    Archive(#[from] crate::archive::ArchiveError),
    #[error("gc error: {0}")]
    Gc(#[from] crate::gc::GcError),
    #[error("fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),
    #[error("not found")]
    NotFound,
    #[error("snapshot {name} moved while a merge into it was running")]
    Stale { name: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound => true,
            StoreError::Block(e) => e.is_not_found(),
            StoreError::Trie(e) => e.is_not_found(),
            StoreError::Item(e) => e.is_not_found(),
            StoreError::Archive(e) => e.is_not_found(),
            StoreError::Gc(e) => e.is_not_found(),
            _ => false,
        }
    }
}

// A missing key or item stays a plain NotFound so callers can match on it.
impl From<TrieError> for StoreError {
    fn from(e: TrieError) -> Self {
        match e {
            TrieError::NotFound => StoreError::NotFound,
            e => StoreError::Trie(e),
        }
    }
}

impl From<ItemError> for StoreError {
    fn from(e: ItemError) -> Self {
        match e {
            ItemError::NotFound | ItemError::Trie(TrieError::NotFound) => StoreError::NotFound,
            e => StoreError::Item(e),
        }
    }
}

/// Handle on one store directory
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
    blocks: BlockStore,
    snapshots: Snapshots,
    lock: StoreLock,
    scratch_dir: PathBuf,
    sync_writes: bool,
}

impl Store {
    /// Open (creating if needed) the store described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let dir = config.dir.clone();
        fs::create_dir_all(dir.join(TMP_DIR_NAME))?;
        let scratch_dir = config.scratch_dir();
        fs::create_dir_all(&scratch_dir)?;

        let blocks = BlockStore::open(&dir, config.key.clone())?
            .with_dedup(config.dedup)
            .with_sync_writes(config.sync_writes);
        let snapshots = Snapshots::open(&dir, config.sync_writes)?;
        let lock = StoreLock::new(&dir)?;
        tracing::info!("Store::open: {:?} (dedup: {})", dir, config.dedup);

        let store = Store {
            dir,
            blocks,
            snapshots,
            lock,
            scratch_dir,
            sync_writes: config.sync_writes,
        };
        store.recover()?;
        Ok(store)
    }

    /// Clean up after writers and merge jobs of crashed processes
    fn recover(&self) -> Result<(), StoreError> {
        let _guard = self.exclusive()?;
        let ledgers = recover_stale(&self.dir, self.sync_writes)?;
        let jobs = remove_stale(&self.dir)?;
        if ledgers + jobs > 0 {
            tracing::info!(
                "Store::recover: {} stale ledgers, {} stale merge jobs",
                ledgers,
                jobs
            );
        }
        Ok(())
    }

    /// Open with default settings
    pub fn open_dir(dir: impl Into<PathBuf>, key: Key) -> Result<Self, StoreError> {
        Self::open(&StoreConfig::new(dir, key))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn lock(&self) -> &StoreLock {
        &self.lock
    }

    pub(crate) fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub(crate) fn snapshots_dir(&self) -> &Snapshots {
        &self.snapshots
    }

    pub(crate) fn sync_writes(&self) -> bool {
        self.sync_writes
    }

    pub(crate) fn shared(&self) -> Result<LockGuard, StoreError> {
        Ok(self.lock.shared()?)
    }

    pub(crate) fn exclusive(&self) -> Result<LockGuard, StoreError> {
        Ok(self.lock.exclusive()?)
    }

    /// Start a transaction; blocks until the exclusive lock is free
    pub fn begin(&self) -> Result<Transaction, StoreError> {
        let guard = self.exclusive()?;
        Transaction::begin(self.clone(), guard)
    }

    /// Run `f` in a transaction, committing on success and aborting on error
    pub fn transact<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Transaction) -> Result<T, StoreError>,
    {
        let mut tx = self.begin()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = tx.abort() {
                    tracing::error!("Store::transact: abort failed: {}", abort);
                }
                Err(e)
            }
        }
    }

    pub fn put<R: Read>(&self, info: &ItemInfo, source: R) -> Result<ItemInfo, StoreError> {
        self.transact(|tx| tx.put(info, source))
    }

    /// Remove `path` from the main tree, returning the removed item's header
    pub fn del(&self, path: &str) -> Result<ItemInfo, StoreError> {
        self.transact(|tx| tx.del(path))
    }

    pub fn get<W: Write>(&self, path: &str, dest: W) -> Result<ItemInfo, StoreError> {
        let _guard = self.shared()?;
        let hash = tree::lookup(&self.blocks, self.snapshots.get(MAIN)?, path)?;
        Ok(get_item(&self.blocks, &hash, dest)?)
    }

    pub fn info(&self, path: &str) -> Result<ItemInfo, StoreError> {
        let _guard = self.shared()?;
        let hash = tree::lookup(&self.blocks, self.snapshots.get(MAIN)?, path)?;
        Ok(item_info(&self.blocks, &hash)?)
    }

    /// Every item in the main tree, sorted by path
    pub fn list(&self) -> Result<Vec<ItemInfo>, StoreError> {
        let _guard = self.shared()?;
        tree::list(&self.blocks, self.snapshots.get(MAIN)?)
    }

    /// The committed root of snapshot `name`
    pub fn snapshot(&self, name: &str) -> Result<Option<Hash>, StoreError> {
        let _guard = self.shared()?;
        Ok(self.snapshots.get(name)?)
    }

    /// Every committed named root
    pub fn snapshots(&self) -> Result<BTreeMap<String, Hash>, StoreError> {
        let _guard = self.shared()?;
        Ok(self.snapshots.load()?)
    }

    /// List the items of an arbitrary root, e.g. a fetched remote tree
    pub fn list_root(&self, root: &Hash) -> Result<Vec<ItemInfo>, StoreError> {
        let _guard = self.shared()?;
        tree::list(&self.blocks, Some(*root))
    }
}
