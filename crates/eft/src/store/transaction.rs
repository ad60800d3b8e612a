use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::block::{BlockIo, BlockStoreError};
use crate::crypto::Hash;
use crate::item::{get_item, item_info, path_key, put_item, ItemInfo, PathKeys};
use crate::ledger::{Ledger, ADDED_FILE_NAME};
use crate::lock::LockGuard;
use crate::snapshot::{Snapshots, MAIN};
use crate::trie::{TrieBuilder, TrieEntry};

use super::{tree, Store, StoreError};

/// An atomic batch of changes to a store
///
/// Created by [`Store::begin`]. Holds the exclusive lock until it is
/// committed or aborted. Roots changed through the transaction are only
/// visible to it until [`commit`](Self::commit).
///
/// Dropping a transaction that was neither committed nor aborted aborts it.
#[derive(Debug)]
pub struct Transaction {
    store: Store,
    ledger: Option<Ledger>,
    base: BTreeMap<String, Hash>,
    roots: BTreeMap<String, Hash>,
    guard: Option<LockGuard>,
}

impl Transaction {
    pub(super) fn begin(store: Store, guard: LockGuard) -> Result<Self, StoreError> {
        let base = store.snapshots_dir().load()?;
        let ledger = Ledger::create(store.dir())?;
        tracing::debug!(
            "Transaction::begin: {} roots, ledger {:?}",
            base.len(),
            ledger.path()
        );
        Ok(Transaction {
            store,
            ledger: Some(ledger),
            roots: base.clone(),
            base,
            guard: Some(guard),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The root of snapshot `name` as seen by this transaction
    pub fn root(&self, name: &str) -> Option<Hash> {
        self.roots.get(name).copied()
    }

    pub fn roots(&self) -> &BTreeMap<String, Hash> {
        &self.roots
    }

    /// Point snapshot `name` at `root`; the root block must exist
    pub fn set_root(&mut self, name: &str, root: Hash) -> Result<(), StoreError> {
        Snapshots::check_name(name)?;
        if !self.store.blocks().contains(&root) {
            return Err(StoreError::NotFound);
        }
        self.roots.insert(name.to_string(), root);
        Ok(())
    }

    /// Drop snapshot `name`, returning its root
    pub fn remove_root(&mut self, name: &str) -> Option<Hash> {
        self.roots.remove(name)
    }

    /// Number of blocks this transaction has created so far
    pub fn added(&self) -> usize {
        self.ledger.as_ref().map(Ledger::len).unwrap_or(0)
    }

    /// Store an item under `info.path` in the main tree, replacing any
    /// previous item at that path
    pub fn put<R: Read>(&mut self, info: &ItemInfo, source: R) -> Result<ItemInfo, StoreError> {
        let (hash, stored) = put_item(self, info, source)?;
        let key = stored.path_key();
        let root = match self.root(MAIN) {
            Some(root) => {
                let mut trie = tree::path_trie(root);
                trie.insert(self, key.as_bytes(), TrieEntry::item(hash))?;
                trie.root()
            }
            // first item of a fresh tree; no empty root is ever written
            None => {
                let mut builder = TrieBuilder::new(PathKeys);
                builder.insert(key.as_bytes(), TrieEntry::item(hash))?;
                builder.finish(self, &[])?.root()
            }
        };
        self.roots.insert(MAIN.to_string(), root);
        tracing::debug!("Transaction::put: {} -> {}", stored.path, hash);
        Ok(stored)
    }

    /// Remove `path` from the main tree, returning the removed header
    pub fn del(&mut self, path: &str) -> Result<ItemInfo, StoreError> {
        let root = self.root(MAIN).ok_or(StoreError::NotFound)?;
        let mut trie = tree::path_trie(root);
        let removed = trie.remove(self, path_key(path).as_bytes())?;
        let info = item_info(self, removed.hash())?;
        self.roots.insert(MAIN.to_string(), trie.root());
        tracing::debug!("Transaction::del: {}", path);
        Ok(info)
    }

    pub fn get<W: Write>(&self, path: &str, dest: W) -> Result<ItemInfo, StoreError> {
        let hash = tree::lookup(self, self.root(MAIN), path)?;
        Ok(get_item(self, &hash, dest)?)
    }

    pub fn info(&self, path: &str) -> Result<ItemInfo, StoreError> {
        let hash = tree::lookup(self, self.root(MAIN), path)?;
        Ok(item_info(self, &hash)?)
    }

    pub fn list(&self) -> Result<Vec<ItemInfo>, StoreError> {
        tree::list(self, self.root(MAIN))
    }

    /// Take over blocks written by a job outside this transaction, so they
    /// are published or rolled back with it
    pub(crate) fn adopt(&mut self, hashes: &[Hash]) -> Result<(), StoreError> {
        let ledger = self.active_ledger()?;
        for hash in hashes {
            ledger.record(hash)?;
        }
        Ok(())
    }

    /// Publish the new roots and append the ledger to the `added` log
    ///
    /// A failure part way leaves the blocks in place rather than deleting
    /// blocks a published root may already reference; the collector
    /// reclaims whatever ends up unreachable.
    pub fn commit(mut self) -> Result<(), StoreError> {
        let ledger = self.take_ledger()?;
        let snapshots = self.store.snapshots_dir();
        for (name, root) in &self.roots {
            if self.base.get(name) != Some(root) {
                snapshots.set(name, root)?;
            }
        }
        for name in self.base.keys() {
            if !self.roots.contains_key(name) {
                snapshots.remove(name)?;
            }
        }
        let added = ledger.len();
        ledger.append_to(&self.store.dir().join(ADDED_FILE_NAME), self.store.sync_writes())?;
        tracing::info!(
            "Transaction::commit: {} roots, {} blocks added",
            self.roots.len(),
            added
        );
        self.guard.take();
        Ok(())
    }

    /// Forget every root change and delete every block this transaction
    /// created
    pub fn abort(mut self) -> Result<(), StoreError> {
        let removed = self.rollback()?;
        tracing::info!("Transaction::abort: removed {} blocks", removed);
        self.guard.take();
        Ok(())
    }

    fn rollback(&mut self) -> Result<usize, StoreError> {
        let mut ledger = match self.ledger.take() {
            Some(ledger) => ledger,
            None => return Ok(0),
        };
        self.roots = self.base.clone();
        let hashes = ledger.hashes()?;
        let mut removed = 0;
        for hash in &hashes {
            if self.store.blocks().remove(hash)? {
                removed += 1;
            }
        }
        ledger.discard()?;
        Ok(removed)
    }

    fn active_ledger(&mut self) -> Result<&mut Ledger, StoreError> {
        self.ledger
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("transaction already finished").into())
    }

    fn take_ledger(&mut self) -> Result<Ledger, StoreError> {
        self.ledger
            .take()
            .ok_or_else(|| anyhow::anyhow!("transaction already finished").into())
    }
}

impl BlockIo for Transaction {
    fn get_block(&self, hash: &Hash) -> Result<Vec<u8>, BlockStoreError> {
        self.store.blocks().get(hash)
    }

    fn put_block(&mut self, plaintext: &[u8]) -> Result<Hash, BlockStoreError> {
        let ledger = self
            .ledger
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("transaction already finished"))?;
        let (hash, created) = self.store.blocks().write(plaintext)?;
        if created {
            ledger.record(&hash)?;
        }
        Ok(hash)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.ledger.is_none() {
            return;
        }
        tracing::warn!("Transaction::drop: transaction was not finished, aborting");
        match self.rollback() {
            Ok(removed) => tracing::debug!("Transaction::drop: removed {} blocks", removed),
            Err(e) => tracing::error!("Transaction::drop: rollback failed: {}", e),
        }
    }
}
