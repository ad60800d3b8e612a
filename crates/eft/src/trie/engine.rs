use crate::block::BlockIo;
use crate::crypto::Hash;

use super::entry::{EntryKind, TrieEntry};
use super::node::{TrieNode, HEADER_SIZE};
use super::TrieError;

/// Recovers the full key of a leaf entry
///
/// Only the trie depth (not a stored prefix) tells two keys apart, so when a
/// leaf is reached the engine must compare full keys, and when two keys share
/// a slot it must know the occupant's next byte. How the key is recovered is
/// up to the trie's owner.
pub trait KeySource {
    /// Length in bytes of every key in this trie
    fn key_len(&self) -> usize;

    /// The full key the leaf `entry` was inserted under
    fn key_of<I: BlockIo + ?Sized>(&self, io: &I, entry: &TrieEntry)
        -> Result<Vec<u8>, TrieError>;
}

/// Keys stored inline in the entry's auxiliary bytes
///
/// Used for chunk-indexed tries, where the key is the 8-byte little-endian
/// chunk index.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkKeys;

impl ChunkKeys {
    pub const KEY_LEN: usize = 8;

    pub fn key(index: u64) -> [u8; Self::KEY_LEN] {
        index.to_le_bytes()
    }

    /// A leaf for chunk `index` stored in block `hash`
    pub fn entry(index: u64, hash: Hash) -> Result<TrieEntry, TrieError> {
        TrieEntry::item_with_aux(hash, &Self::key(index))
    }
}

impl KeySource for ChunkKeys {
    fn key_len(&self) -> usize {
        Self::KEY_LEN
    }

    fn key_of<I: BlockIo + ?Sized>(
        &self,
        _io: &I,
        entry: &TrieEntry,
    ) -> Result<Vec<u8>, TrieError> {
        if entry.aux().len() != Self::KEY_LEN {
            return Err(TrieError::Malformed(format!(
                "chunk entry carries {} aux bytes, expected {}",
                entry.aux().len(),
                Self::KEY_LEN
            )));
        }
        Ok(entry.aux().to_vec())
    }
}

/// What a trie walk is currently looking at
#[derive(Debug)]
pub enum Visit<'a> {
    /// A node block, including the root
    Node(&'a Hash),
    /// A leaf entry
    Leaf(&'a TrieEntry),
}

/// A persistent, copy-on-write 256-ary trie over fixed-length byte keys
///
/// A `Trie` is just a root hash plus the capability to recover keys. Every
/// mutation writes new node blocks bottom-up and leaves this handle pointing
/// at the new root; blocks already written are never modified, so older root
/// hashes keep describing the tree as it was.
#[derive(Debug, Clone)]
pub struct Trie<K> {
    root: Hash,
    keys: K,
}

impl<K: KeySource> Trie<K> {
    /// Write an empty root node carrying `header`
    pub fn create<I: BlockIo + ?Sized>(
        io: &mut I,
        keys: K,
        header: &[u8],
    ) -> Result<Self, TrieError> {
        let root = TrieNode::with_header(header)?.store(io)?;
        Ok(Trie { root, keys })
    }

    /// Open an existing trie by root hash
    pub fn open(root: Hash, keys: K) -> Self {
        Trie { root, keys }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    pub fn header<I: BlockIo + ?Sized>(&self, io: &I) -> Result<[u8; HEADER_SIZE], TrieError> {
        Ok(*TrieNode::load(&*io, &self.root)?.header())
    }

    pub fn set_header<I: BlockIo + ?Sized>(
        &mut self,
        io: &mut I,
        header: &[u8],
    ) -> Result<(), TrieError> {
        let mut node = TrieNode::load(&*io, &self.root)?;
        node.set_header(header)?;
        self.root = node.store(io)?;
        Ok(())
    }

    fn check_key(&self, key: &[u8]) -> Result<(), TrieError> {
        if key.len() != self.keys.key_len() {
            return Err(TrieError::KeyLength {
                expected: self.keys.key_len(),
                got: key.len(),
            });
        }
        Ok(())
    }

    /// Insert or replace the leaf for `key`
    pub fn insert<I: BlockIo + ?Sized>(
        &mut self,
        io: &mut I,
        key: &[u8],
        entry: TrieEntry,
    ) -> Result<(), TrieError> {
        self.check_key(key)?;
        if !entry.is_item() {
            return Err(TrieError::Malformed(
                "only leaf entries can be inserted".to_string(),
            ));
        }
        let root = TrieNode::load(&*io, &self.root)?;
        let root = self.insert_into(io, root, 0, key, entry)?;
        self.root = root.store(io)?;
        Ok(())
    }

    fn insert_into<I: BlockIo + ?Sized>(
        &self,
        io: &mut I,
        mut node: TrieNode,
        depth: usize,
        key: &[u8],
        entry: TrieEntry,
    ) -> Result<TrieNode, TrieError> {
        let slot = key[depth];
        let current = *node.entry(slot);
        match current.kind() {
            EntryKind::None => node.set_entry(slot, entry),
            EntryKind::Item => {
                let occupant = self.keys.key_of(&*io, &current)?;
                if occupant == key {
                    node.set_entry(slot, entry);
                } else {
                    let child =
                        self.push_down(io, depth + 1, current, &occupant, entry, key)?;
                    node.set_entry(slot, TrieEntry::more(child.store(io)?));
                }
            }
            EntryKind::More => {
                let child = TrieNode::load(&*io, current.hash())?;
                let child = self.insert_into(io, child, depth + 1, key, entry)?;
                node.set_entry(slot, TrieEntry::more(child.store(io)?));
            }
        }
        Ok(node)
    }

    /// Build the node at `depth` holding two leaves whose keys agreed on every
    /// byte above it, nesting further while their bytes keep colliding
    pub(super) fn push_down<I: BlockIo + ?Sized>(
        &self,
        io: &mut I,
        depth: usize,
        a: TrieEntry,
        a_key: &[u8],
        b: TrieEntry,
        b_key: &[u8],
    ) -> Result<TrieNode, TrieError> {
        if depth >= self.keys.key_len() {
            return Err(TrieError::Malformed(
                "distinct keys collided on every byte".to_string(),
            ));
        }
        let mut node = TrieNode::new();
        if a_key[depth] == b_key[depth] {
            let child = self.push_down(io, depth + 1, a, a_key, b, b_key)?;
            node.set_entry(a_key[depth], TrieEntry::more(child.store(io)?));
        } else {
            node.set_entry(a_key[depth], a);
            node.set_entry(b_key[depth], b);
        }
        Ok(node)
    }

    /// Look up the leaf for `key`
    ///
    /// Returns [`TrieError::NotFound`] if there is none.
    pub fn find<I: BlockIo + ?Sized>(&self, io: &I, key: &[u8]) -> Result<TrieEntry, TrieError> {
        self.check_key(key)?;
        let mut node = TrieNode::load(&*io, &self.root)?;
        for &byte in key {
            let entry = *node.entry(byte);
            match entry.kind() {
                EntryKind::None => return Err(TrieError::NotFound),
                EntryKind::Item => {
                    return if self.keys.key_of(&*io, &entry)? == key {
                        Ok(entry)
                    } else {
                        Err(TrieError::NotFound)
                    };
                }
                EntryKind::More => node = TrieNode::load(&*io, entry.hash())?,
            }
        }
        Err(TrieError::Malformed(
            "key exhausted before reaching a leaf".to_string(),
        ))
    }

    /// Remove the leaf for `key`, returning it
    ///
    /// Children left empty are pruned and a child left holding a single leaf
    /// is folded back into its parent's slot, so the shape of the trie only
    /// depends on the keys it holds.
    pub fn remove<I: BlockIo + ?Sized>(
        &mut self,
        io: &mut I,
        key: &[u8],
    ) -> Result<TrieEntry, TrieError> {
        self.check_key(key)?;
        let root = TrieNode::load(&*io, &self.root)?;
        let (root, removed) = self.remove_from(io, root, 0, key)?;
        self.root = root.store(io)?;
        Ok(removed)
    }

    fn remove_from<I: BlockIo + ?Sized>(
        &self,
        io: &mut I,
        mut node: TrieNode,
        depth: usize,
        key: &[u8],
    ) -> Result<(TrieNode, TrieEntry), TrieError> {
        let slot = key[depth];
        let current = *node.entry(slot);
        let removed = match current.kind() {
            EntryKind::None => return Err(TrieError::NotFound),
            EntryKind::Item => {
                if self.keys.key_of(&*io, &current)? != key {
                    return Err(TrieError::NotFound);
                }
                node.set_entry(slot, TrieEntry::none());
                current
            }
            EntryKind::More => {
                let child = TrieNode::load(&*io, current.hash())?;
                let (child, removed) = self.remove_from(io, child, depth + 1, key)?;
                if child.is_empty() {
                    node.set_entry(slot, TrieEntry::none());
                } else if let Some(only) = child.single_item() {
                    node.set_entry(slot, only);
                } else {
                    node.set_entry(slot, TrieEntry::more(child.store(io)?));
                }
                removed
            }
        };
        Ok((node, removed))
    }

    /// Depth-first walk over every node block and leaf
    ///
    /// Returning `false` for a [`Visit::Node`] skips that node's subtree;
    /// the return value is ignored for leaves.
    pub fn walk<I, F, E>(&self, io: &I, mut f: F) -> Result<(), E>
    where
        I: BlockIo + ?Sized,
        F: FnMut(Visit<'_>) -> Result<bool, E>,
        E: From<TrieError>,
    {
        let mut stack = vec![self.root];
        while let Some(hash) = stack.pop() {
            if !f(Visit::Node(&hash))? {
                continue;
            }
            let node = TrieNode::load(&*io, &hash)?;
            let mut children = Vec::new();
            for (_, entry) in node.entries() {
                match entry.kind() {
                    EntryKind::None => {}
                    EntryKind::More => children.push(*entry.hash()),
                    EntryKind::Item => {
                        f(Visit::Leaf(entry))?;
                    }
                }
            }
            stack.extend(children.into_iter().rev());
        }
        Ok(())
    }

    /// Call `f` with every leaf in the trie
    pub fn visit_entries<I, F, E>(&self, io: &I, mut f: F) -> Result<(), E>
    where
        I: BlockIo + ?Sized,
        F: FnMut(&TrieEntry) -> Result<(), E>,
        E: From<TrieError>,
    {
        self.walk(io, |visit| match visit {
            Visit::Node(_) => Ok(true),
            Visit::Leaf(entry) => f(entry).map(|_| true),
        })
    }

    /// Collect every leaf in the trie
    pub fn entries<I: BlockIo + ?Sized>(&self, io: &I) -> Result<Vec<TrieEntry>, TrieError> {
        let mut out = Vec::new();
        self.visit_entries(io, |entry| {
            out.push(*entry);
            Ok::<_, TrieError>(())
        })?;
        Ok(out)
    }
}
