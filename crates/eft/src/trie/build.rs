use crate::block::BlockIo;
use crate::crypto::Hash;

use super::engine::{KeySource, Trie};
use super::entry::TrieEntry;
use super::node::{TrieNode, FANOUT};
use super::TrieError;

enum PendingSlot {
    Empty,
    Leaf(Vec<u8>, TrieEntry),
    Branch(Box<PendingNode>),
}

struct PendingNode {
    slots: Vec<PendingSlot>,
}

impl PendingNode {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(FANOUT);
        slots.resize_with(FANOUT, || PendingSlot::Empty);
        PendingNode { slots }
    }
}

/// Builds a whole trie in memory and persists it in one bottom-up pass
///
/// Inserting n leaves one by one through [`Trie::insert`] rewrites the root
/// n times; a builder writes every node exactly once. The resulting shape is
/// the same as inserting the leaves in any order.
pub struct TrieBuilder<K> {
    keys: K,
    root: PendingNode,
    len: usize,
}

impl<K: KeySource> TrieBuilder<K> {
    pub fn new(keys: K) -> Self {
        TrieBuilder {
            keys,
            root: PendingNode::new(),
            len: 0,
        }
    }

    /// Number of distinct keys inserted so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or replace the leaf for `key`
    pub fn insert(&mut self, key: &[u8], entry: TrieEntry) -> Result<(), TrieError> {
        if key.len() != self.keys.key_len() {
            return Err(TrieError::KeyLength {
                expected: self.keys.key_len(),
                got: key.len(),
            });
        }
        if !entry.is_item() {
            return Err(TrieError::Malformed(
                "only leaf entries can be inserted".to_string(),
            ));
        }
        if insert_pending(&mut self.root, 0, key.to_vec(), entry)? {
            self.len += 1;
        }
        Ok(())
    }

    /// Persist every node, children first, and open the result
    pub fn finish<I: BlockIo + ?Sized>(
        self,
        io: &mut I,
        header: &[u8],
    ) -> Result<Trie<K>, TrieError> {
        let root = store_pending(io, self.root, header)?;
        Ok(Trie::open(root, self.keys))
    }
}

/// Returns true if `key` was not present before
fn insert_pending(
    node: &mut PendingNode,
    depth: usize,
    key: Vec<u8>,
    entry: TrieEntry,
) -> Result<bool, TrieError> {
    let slot = &mut node.slots[key[depth] as usize];
    let (replace, fresh) = match slot {
        PendingSlot::Empty => (true, true),
        PendingSlot::Leaf(occupant, _) => (*occupant == key, false),
        PendingSlot::Branch(_) => (false, false),
    };
    if replace {
        *slot = PendingSlot::Leaf(key, entry);
        return Ok(fresh);
    }
    if let PendingSlot::Branch(child) = slot {
        return insert_pending(child, depth + 1, key, entry);
    }

    // a different leaf holds this slot: push both one level down
    let depth = depth + 1;
    if depth >= key.len() {
        return Err(TrieError::Malformed(
            "distinct keys collided on every byte".to_string(),
        ));
    }
    let mut child = PendingNode::new();
    if let PendingSlot::Leaf(old_key, old_entry) = std::mem::replace(slot, PendingSlot::Empty) {
        insert_pending(&mut child, depth, old_key, old_entry)?;
    }
    insert_pending(&mut child, depth, key, entry)?;
    *slot = PendingSlot::Branch(Box::new(child));
    Ok(true)
}

fn store_pending<I: BlockIo + ?Sized>(
    io: &mut I,
    node: PendingNode,
    header: &[u8],
) -> Result<Hash, TrieError> {
    let mut out = TrieNode::with_header(header)?;
    for (slot, pending) in node.slots.into_iter().enumerate() {
        let entry = match pending {
            PendingSlot::Empty => continue,
            PendingSlot::Leaf(_, entry) => entry,
            PendingSlot::Branch(child) => TrieEntry::more(store_pending(io, *child, &[])?),
        };
        out.set_entry(slot as u8, entry);
    }
    out.store(io)
}
