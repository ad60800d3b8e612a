use crate::block::{BlockIo, BlockStore, BlockStoreError};
use crate::crypto::Hash;
use crate::item::{item_info, path_key, rewrite_item_path, ItemInfo, PathKeys};
use crate::ledger::Ledger;
use crate::snapshot::MAIN;
use crate::trie::{Trie, TrieEntry, TrieError};

use super::conflict::{Conflict, ConflictFile, ConflictResolver, Resolution, ResolvedConflict};
use super::markers::RootMarkers;
use super::tree::{item_to_trie_error, path_trie};
use super::{Store, StoreError};

/// Block writer for a merge job
///
/// Merges run under the shared lock, so several can proceed side by side.
/// Blocks are ledgered like a transaction's, and every input and output
/// root is marked so the collector keeps the job's trees alive after the
/// shared lock is released.
#[derive(Debug)]
struct MergeJob {
    blocks: BlockStore,
    ledger: Option<Ledger>,
    markers: RootMarkers,
}

impl MergeJob {
    /// Delete every block the job created and discard its ledger
    fn rollback(&mut self) -> Result<usize, StoreError> {
        let mut ledger = match self.ledger.take() {
            Some(ledger) => ledger,
            None => return Ok(0),
        };
        let mut removed = 0;
        for hash in &ledger.hashes()? {
            if self.blocks.remove(hash)? {
                removed += 1;
            }
        }
        ledger.discard()?;
        Ok(removed)
    }
}

impl Drop for MergeJob {
    fn drop(&mut self) {
        match self.rollback() {
            Ok(0) => {}
            Ok(removed) => tracing::debug!("MergeJob::drop: removed {} unpublished blocks", removed),
            Err(e) => tracing::warn!("MergeJob::drop: rollback failed: {}", e),
        }
    }
}

impl BlockIo for MergeJob {
    fn get_block(&self, hash: &Hash) -> Result<Vec<u8>, BlockStoreError> {
        self.blocks.get(hash)
    }

    fn put_block(&mut self, plaintext: &[u8]) -> Result<Hash, BlockStoreError> {
        let ledger = self
            .ledger
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("merge job already published"))?;
        let (hash, created) = self.blocks.write(plaintext)?;
        if created {
            ledger.record(&hash)?;
        }
        Ok(hash)
    }
}

/// A merged root not yet published as a snapshot
///
/// The root (and everything it references) stays protected from garbage
/// collection until the outcome is committed with
/// [`Store::commit_merge`] or dropped. Dropping it unpublished deletes the
/// blocks the merge wrote.
#[derive(Debug)]
pub struct MergeOutcome {
    root: Hash,
    conflicts: Vec<ResolvedConflict>,
    job: MergeJob,
}

impl MergeOutcome {
    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn conflicts(&self) -> &[ResolvedConflict] {
        &self.conflicts
    }
}

/// A merge published as a snapshot
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub root: Hash,
    pub conflicts: Vec<ResolvedConflict>,
}

impl Store {
    /// Merge several path-trie roots into one
    ///
    /// Roots are merged pairwise, left to right within each round, so the
    /// first root is the base side of every conflict it takes part in.
    pub fn merge_roots(
        &self,
        roots: &[Hash],
        resolver: &dyn ConflictResolver,
    ) -> Result<MergeOutcome, StoreError> {
        if roots.is_empty() {
            return Err(anyhow::anyhow!("no roots to merge").into());
        }
        let _guard = self.shared()?;
        let mut job = MergeJob {
            blocks: self.blocks().clone(),
            ledger: Some(Ledger::create(self.dir())?),
            markers: RootMarkers::create(self.dir())?,
        };
        for root in roots {
            if !self.blocks().contains(root) {
                return Err(StoreError::NotFound);
            }
            job.markers.protect(root)?;
        }

        let mut conflicts = Vec::new();
        let mut round: Vec<Hash> = roots.to_vec();
        while round.len() > 1 {
            let mut next = Vec::with_capacity(round.len().div_ceil(2));
            let mut pending = round.into_iter();
            while let Some(base) = pending.next() {
                match pending.next() {
                    Some(incoming) => {
                        let merged =
                            merge_pair(&mut job, base, incoming, resolver, &mut conflicts)?;
                        job.markers.protect(&merged)?;
                        next.push(merged);
                    }
                    None => next.push(base),
                }
            }
            round = next;
        }
        let root = round[0];
        tracing::info!(
            "Store::merge_roots: merged {} roots into {} ({} conflicts)",
            roots.len(),
            root,
            conflicts.len()
        );
        Ok(MergeOutcome {
            root,
            conflicts,
            job,
        })
    }

    /// Publish a merge result as snapshot `name`
    pub fn commit_merge(&self, name: &str, outcome: MergeOutcome) -> Result<MergeReport, StoreError> {
        self.publish_merge(name, outcome, None)
    }

    /// Merge snapshot `name` (e.g. a fetched "remote") into "main"
    ///
    /// Fails with [`StoreError::Stale`] if "main" changes while the merge
    /// runs; no retry is attempted.
    pub fn merge_into_main(
        &self,
        name: &str,
        resolver: &dyn ConflictResolver,
    ) -> Result<MergeReport, StoreError> {
        let (main, other) = {
            let _guard = self.shared()?;
            let other = self.snapshots_dir().get(name)?.ok_or(StoreError::NotFound)?;
            (self.snapshots_dir().get(MAIN)?, other)
        };
        let main = match main {
            Some(main) => main,
            None => {
                self.transact(|tx| tx.set_root(MAIN, other))?;
                return Ok(MergeReport {
                    root: other,
                    conflicts: Vec::new(),
                });
            }
        };
        let outcome = self.merge_roots(&[main, other], resolver)?;
        self.publish_merge(MAIN, outcome, Some(main))
    }

    fn publish_merge(
        &self,
        name: &str,
        mut outcome: MergeOutcome,
        expected: Option<Hash>,
    ) -> Result<MergeReport, StoreError> {
        let mut tx = self.begin()?;
        if let Some(expected) = expected {
            if tx.root(name) != Some(expected) {
                return Err(StoreError::Stale {
                    name: name.to_string(),
                });
            }
        }
        let mut ledger = outcome
            .job
            .ledger
            .take()
            .ok_or_else(|| anyhow::anyhow!("merge job already published"))?;
        tx.adopt(&ledger.hashes()?)?;
        tx.set_root(name, outcome.root)?;
        tx.commit()?;
        ledger.discard()?;

        // markers go away with the outcome
        Ok(MergeReport {
            root: outcome.root,
            conflicts: std::mem::take(&mut outcome.conflicts),
        })
    }
}

fn merge_pair(
    job: &mut MergeJob,
    base: Hash,
    incoming: Hash,
    resolver: &dyn ConflictResolver,
    conflicts: &mut Vec<ResolvedConflict>,
) -> Result<Hash, StoreError> {
    let ours = path_trie(base);
    let theirs = path_trie(incoming);
    let mut renames = Vec::new();

    let mut merged = ours.merge(job, &theirs, |io, _key, mine, other| {
        let mine_info = item_info(&*io, mine.hash()).map_err(item_to_trie_error)?;
        let other_info = item_info(&*io, other.hash()).map_err(item_to_trie_error)?;
        // same item written twice under different nonces
        if mine_info == other_info {
            return Ok(*mine);
        }
        let conflict = Conflict::new((*mine.hash(), mine_info), (*other.hash(), other_info));
        let resolution = resolver.resolve(&conflict);
        tracing::debug!("merge_pair: {} resolved as {:?}", conflict.path, resolution);
        let chosen = match &resolution {
            Resolution::UseBase => *mine,
            Resolution::UseIncoming => *other,
            Resolution::RenameIncoming { .. } => {
                renames.push((conflicts.len(), *other.hash()));
                *mine
            }
        };
        conflicts.push(ResolvedConflict {
            conflict,
            resolution,
        });
        Ok::<TrieEntry, TrieError>(chosen)
    })?;

    for (index, hash) in renames {
        let wanted = match &conflicts[index].resolution {
            Resolution::RenameIncoming { new_path } => new_path.clone(),
            _ => continue,
        };
        let incoming = item_info(&*job, &hash)?;
        let (path, kept) = rename_target(&*job, &merged, &wanted, &incoming)?;
        if !kept {
            let (renamed, info) = rewrite_item_path(job, &hash, &path)?;
            merged.insert(job, info.path_key().as_bytes(), TrieEntry::item(renamed))?;
        }
        if path != wanted {
            tracing::debug!("merge_pair: {} is taken, using {}", wanted, path);
            conflicts[index].resolution = Resolution::RenameIncoming { new_path: path };
        }
    }
    Ok(merged.root())
}

/// Where a renamed incoming item goes
///
/// The first of `wanted`, `<stem>-1`, `<stem>-2`, ... that is free or
/// already holds the incoming content (an earlier merge kept it there).
/// The flag is true in the second case.
fn rename_target(
    job: &MergeJob,
    merged: &Trie<PathKeys>,
    wanted: &str,
    incoming: &ItemInfo,
) -> Result<(String, bool), StoreError> {
    let mut attempt = 0;
    loop {
        let candidate = match attempt {
            0 => wanted.to_string(),
            n => ConflictFile::numbered_path(wanted, n),
        };
        match merged.find(job, path_key(&candidate).as_bytes()) {
            Err(TrieError::NotFound) => return Ok((candidate, false)),
            Err(e) => return Err(e.into()),
            Ok(entry) => {
                let existing = item_info(job, entry.hash())?;
                if existing.item_type == incoming.item_type
                    && existing.content_hash == incoming.content_hash
                {
                    return Ok((candidate, true));
                }
            }
        }
        attempt += 1;
    }
}
