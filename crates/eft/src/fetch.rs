//! Pulling a remote tree into a local store
//!
//! The transport is out of scope: a [`BlockFetcher`] is handed the set of
//! blocks still wanted and answers with an archive stream (see
//! [`crate::archive`]). [`Store::fetch_remote`] walks the remote tree one
//! level at a time, asking only for blocks that are not already local.
//!
//! Every level is fetched in a single request. Levels never skip present
//! blocks: an earlier interrupted fetch can leave a node on disk whose
//! children never arrived.

use std::io::{Read, Write};

use crate::archive::{ArchiveError, ArchiveReader, ArchiveWriter};
use crate::block::BlockSet;
use crate::crypto::Hash;
use crate::item::{ItemInfo, SMALL_ITEM_MAX};
use crate::snapshot::REMOTE;
use crate::store::{RootMarkers, Store, StoreError};
use crate::trie::{EntryKind, TrieNode};

/// Source of remote blocks
pub trait BlockFetcher {
    type Reader: Read;

    /// Return an archive holding (at least) every block in `wanted`
    fn fetch(&mut self, wanted: &BlockSet) -> anyhow::Result<Self::Reader>;
}

impl<F, R> BlockFetcher for F
where
    F: FnMut(&BlockSet) -> anyhow::Result<R>,
    R: Read,
{
    type Reader = R;

    fn fetch(&mut self, wanted: &BlockSet) -> anyhow::Result<R> {
        self(wanted)
    }
}

/// A block reachable from a tree root, tagged with how to read it
#[derive(Debug, Clone, Copy)]
enum Pending {
    /// Path-trie node
    PathNode(Hash),
    /// Item block: a small item or the root of a chunk trie
    Item(Hash),
    /// Chunk-trie node below an item root
    ChunkNode(Hash),
    /// Raw content chunk
    Chunk(Hash),
}

impl Pending {
    fn hash(&self) -> &Hash {
        match self {
            Pending::PathNode(hash)
            | Pending::Item(hash)
            | Pending::ChunkNode(hash)
            | Pending::Chunk(hash) => hash,
        }
    }
}

impl Store {
    /// Fetch every block of the tree at `root` and record it as the
    /// "remote" snapshot
    ///
    /// Returns the blocks that were fetched. A fetcher error aborts the walk
    /// with [`StoreError::Fetch`]; blocks extracted before that point stay
    /// on disk for the next attempt (or the collector).
    pub fn fetch_remote<F: BlockFetcher>(
        &self,
        root: &Hash,
        fetcher: &mut F,
    ) -> Result<BlockSet, StoreError> {
        let markers = RootMarkers::create(self.dir())?;
        markers.protect(root)?;

        let mut fetched = BlockSet::new();
        {
            let _guard = self.shared()?;
            let mut level = vec![Pending::PathNode(*root)];
            let mut depth = 0;
            while !level.is_empty() {
                let wanted: BlockSet = level
                    .iter()
                    .map(Pending::hash)
                    .filter(|hash| !self.blocks().contains(hash))
                    .copied()
                    .collect();
                if !wanted.is_empty() {
                    tracing::debug!(
                        "Store::fetch_remote: level {}, fetching {} of {} blocks",
                        depth,
                        wanted.len(),
                        level.len()
                    );
                    let reader = fetcher.fetch(&wanted).map_err(StoreError::Fetch)?;
                    ArchiveReader::new(reader).extract(self.blocks())?;
                    let missing: BlockSet = wanted
                        .iter()
                        .filter(|hash| !self.blocks().contains(hash))
                        .copied()
                        .collect();
                    if !missing.is_empty() {
                        return Err(ArchiveError::Incomplete { missing }.into());
                    }
                    fetched.extend(wanted);
                }

                let mut next = Vec::new();
                for pending in &level {
                    next.extend(self.children(pending)?);
                }
                level = next;
                depth += 1;
            }
        }

        self.transact(|tx| tx.set_root(REMOTE, *root))?;
        tracing::info!(
            "Store::fetch_remote: {} complete, {} blocks fetched",
            root,
            fetched.len()
        );
        Ok(fetched)
    }

    /// Blocks reachable from `root` that are not stored locally
    ///
    /// Only children of local blocks can be discovered, so for a partially
    /// fetched tree this is the next frontier rather than the full set.
    pub fn missing_blocks(&self, root: &Hash) -> Result<BlockSet, StoreError> {
        let _guard = self.shared()?;
        let mut missing = BlockSet::new();
        let mut stack = vec![Pending::PathNode(*root)];
        while let Some(pending) = stack.pop() {
            if !self.blocks().contains(pending.hash()) {
                missing.insert(*pending.hash());
                continue;
            }
            stack.extend(self.children(&pending)?);
        }
        Ok(missing)
    }

    /// Pack the given local blocks into an archive
    pub fn export_archive<W: Write>(&self, hashes: &BlockSet, out: W) -> Result<W, StoreError> {
        let _guard = self.shared()?;
        let mut writer = ArchiveWriter::new(out);
        for hash in hashes.to_sorted_vec() {
            writer.add_from(self.blocks(), &hash)?;
        }
        Ok(writer.finish()?)
    }

    /// The blocks directly referenced by a local block
    fn children(&self, pending: &Pending) -> Result<Vec<Pending>, StoreError> {
        let (node, chunk_level) = match pending {
            Pending::Chunk(_) => return Ok(Vec::new()),
            Pending::PathNode(hash) => (TrieNode::from_block(&self.blocks().get(hash)?)?, false),
            Pending::ChunkNode(hash) => (TrieNode::from_block(&self.blocks().get(hash)?)?, true),
            Pending::Item(hash) => {
                let block = self.blocks().get(hash)?;
                let info = ItemInfo::from_bytes(&block)?;
                if info.size <= SMALL_ITEM_MAX {
                    return Ok(Vec::new());
                }
                (TrieNode::from_block(&block)?, true)
            }
        };

        let mut children = Vec::new();
        for (_, entry) in node.entries() {
            let child = *entry.hash();
            match (entry.kind(), chunk_level) {
                (EntryKind::None, _) => {}
                (EntryKind::More, false) => children.push(Pending::PathNode(child)),
                (EntryKind::Item, false) => children.push(Pending::Item(child)),
                (EntryKind::More, true) => children.push(Pending::ChunkNode(child)),
                (EntryKind::Item, true) => children.push(Pending::Chunk(child)),
            }
        }
        Ok(children)
    }
}
