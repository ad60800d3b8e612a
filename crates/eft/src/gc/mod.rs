//! Mark-and-sweep garbage collection
//!
//! Collection runs under the exclusive store lock:
//!
//! 1. **Scan**: every block file is listed into a [`MarkList`], a sorted
//!    memory-mapped scratch file of `(hash, mark)` records
//! 2. **Mark**: every snapshot root and every root protected by a running
//!    merge job is walked (path-trie nodes, item blocks, chunk-trie nodes
//!    and chunks), marking each block it reaches
//! 3. **Sweep**: the unmarked hashes are reported dead
//!
//! Deletion is a separate step ([`Store::remove_blocks`]) so callers can
//! ship the dead list elsewhere first; [`Store::gc`] does both at once.
//!
//! A snapshot that references a missing block fails collection with
//! [`GcError::MissingBlock`]: the store is damaged and sweeping could make it
//! worse. Marker roots left behind by a crashed merge job are walked
//! leniently instead.

mod marks;

pub use marks::{MarkList, MARK_RECORD_SIZE};

use std::path::Path;

use tempfile::{NamedTempFile, TempPath};

use crate::block::{BlockSet, BlockStore, BlockStoreError};
use crate::crypto::Hash;
use crate::item::{visit_item_blocks, ItemError};
use crate::ledger::{read_hashes, remove_if_exists, ADDED_FILE_NAME, DEAD_FILE_NAME};
use crate::snapshot::{SnapshotError, MAIN};
use crate::store::{marked_roots, tree::path_trie, Store, StoreError};
use crate::trie::{TrieError, Visit};

#[derive(Debug, thiserror::Error)]
pub enum GcError {
    #[error("gc error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("gc i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("block error: {0}")]
    Block(#[from] BlockStoreError),
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),
    #[error("item error: {0}")]
    Item(#[from] ItemError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("live tree references missing block {hash}")]
    MissingBlock { hash: Hash },
}

impl GcError {
    pub fn is_not_found(&self) -> bool {
        match self {
            GcError::Block(e) => e.is_not_found(),
            GcError::Trie(e) => e.is_not_found(),
            GcError::Item(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Result of a collection pass
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    /// Blocks on disk when the scan ran
    pub scanned: usize,
    /// Blocks reachable from a root
    pub live: usize,
    /// Unreachable blocks, ascending
    pub dead: Vec<Hash>,
}

/// A consistent cut of the store for replication
///
/// `added` lists the blocks added since the previous checkpoint that are
/// still live. `dead` lists the blocks that became unreachable since the
/// previous checkpoint: an unreachable block already reported by an earlier
/// checkpoint is not reported again, even if it was never removed. Both are
/// hex-line temp files, removed when the checkpoint is dropped.
#[derive(Debug)]
pub struct Checkpoint {
    pub root: Option<Hash>,
    added: TempPath,
    dead: TempPath,
}

impl Checkpoint {
    pub fn added_path(&self) -> &Path {
        &self.added
    }

    pub fn dead_path(&self) -> &Path {
        &self.dead
    }

    pub fn added(&self) -> std::io::Result<BlockSet> {
        BlockSet::read_from(&self.added)
    }

    pub fn dead(&self) -> std::io::Result<BlockSet> {
        BlockSet::read_from(&self.dead)
    }
}

impl Store {
    /// Find every unreachable block without deleting anything
    pub fn collect_garbage(&self) -> Result<GcReport, StoreError> {
        let _guard = self.exclusive()?;
        Ok(self.collect_locked()?)
    }

    /// Delete the given blocks, returning how many existed
    ///
    /// Meant for the `dead` list of a [`GcReport`] or [`Checkpoint`]. In a
    /// dedup store a later write can bring a dead block back to life, so
    /// prefer [`gc`](Self::gc) unless the list has to be shipped first.
    pub fn remove_blocks(&self, dead: &[Hash]) -> Result<usize, StoreError> {
        let _guard = self.exclusive()?;
        let mut removed = 0;
        for hash in dead {
            if self.blocks().remove(hash)? {
                removed += 1;
            }
        }
        tracing::info!("Store::remove_blocks: removed {} of {}", removed, dead.len());
        Ok(removed)
    }

    /// Collect and delete in one pass
    pub fn gc(&self) -> Result<GcReport, StoreError> {
        let _guard = self.exclusive()?;
        let report = self.collect_locked()?;
        for hash in &report.dead {
            self.blocks().remove(hash)?;
        }
        tracing::info!("Store::gc: removed {} blocks", report.dead.len());
        Ok(report)
    }

    /// Rotate the `added` log and capture what changed since the last
    /// checkpoint
    pub fn checkpoint(&self) -> Result<Checkpoint, StoreError> {
        let _guard = self.exclusive()?;
        let report = self.collect_locked()?;
        let unreachable: BlockSet = report.dead.iter().copied().collect();
        let reported: BlockSet = read_hashes(&self.dir().join(DEAD_FILE_NAME))?
            .into_iter()
            .collect();
        let dead = unreachable.difference(&reported);

        let log = self.dir().join(ADDED_FILE_NAME);
        let added: BlockSet = read_hashes(&log)?
            .into_iter()
            .filter(|hash| !unreachable.contains(hash))
            .collect();

        let added_path = self.write_scratch_list("added-", &added)?;
        let dead_path = self.write_scratch_list("dead-", &dead)?;
        self.save_reported_dead(&unreachable)?;
        remove_if_exists(&log)?;

        let root = self.snapshots_dir().get(MAIN)?;
        tracing::info!(
            "Store::checkpoint: root {:?}, {} added, {} dead",
            root,
            added.len(),
            dead.len()
        );
        Ok(Checkpoint {
            root,
            added: added_path,
            dead: dead_path,
        })
    }

    /// Replace the list of unreachable blocks known to the last checkpoint
    fn save_reported_dead(&self, unreachable: &BlockSet) -> Result<(), StoreError> {
        let tmp = tempfile::Builder::new()
            .prefix(".dead-")
            .tempfile_in(self.dir())?;
        unreachable.write_to(tmp.path())?;
        if self.sync_writes() {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(self.dir().join(DEAD_FILE_NAME))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn write_scratch_list(&self, prefix: &str, set: &BlockSet) -> Result<TempPath, StoreError> {
        let path = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(self.scratch_dir())
            .map(NamedTempFile::into_temp_path)?;
        set.write_to(&path)?;
        Ok(path)
    }

    /// Scan, mark and sweep; the caller holds the exclusive lock
    fn collect_locked(&self) -> Result<GcReport, GcError> {
        let mut marks = MarkList::scan(self.blocks(), self.scratch_dir())?;
        let snapshots = self.snapshots_dir().load()?;
        for (name, root) in &snapshots {
            tracing::debug!("Store::collect_garbage: marking snapshot {} ({})", name, root);
            mark_tree(self.blocks(), &mut marks, root)?;
        }
        for root in marked_roots(self.dir())? {
            match mark_tree(self.blocks(), &mut marks, &root) {
                Ok(()) => {}
                Err(e @ GcError::MissingBlock { .. }) => {
                    tracing::warn!("Store::collect_garbage: stale merge marker {}: {}", root, e);
                }
                Err(e) => return Err(e),
            }
        }

        let dead = marks.unmarked();
        tracing::info!(
            "Store::collect_garbage: {} scanned, {} live, {} dead",
            marks.len(),
            marks.marked(),
            dead.len()
        );
        Ok(GcReport {
            scanned: marks.len(),
            live: marks.marked(),
            dead,
        })
    }
}

/// Mark every block reachable from a path-trie root
///
/// Subtrees and items already marked are not walked again.
fn mark_tree(blocks: &BlockStore, marks: &mut MarkList, root: &Hash) -> Result<(), GcError> {
    path_trie(*root).walk(blocks, |visit| match visit {
        Visit::Node(hash) => marks.mark(hash),
        Visit::Leaf(entry) => {
            if marks.mark(entry.hash())? {
                visit_item_blocks(blocks, entry.hash(), |hash| {
                    marks.mark(hash).map(|_| ())
                })?;
            }
            Ok(true)
        }
    })
}
