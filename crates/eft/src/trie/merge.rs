use crate::block::BlockIo;

use super::engine::{KeySource, Trie};
use super::entry::{EntryKind, TrieEntry};
use super::node::TrieNode;
use super::TrieError;

impl<K: KeySource> Trie<K> {
    /// Merge `incoming` into this trie, returning the merged trie
    ///
    /// Both tries are walked slot by slot. Identical entries (and therefore
    /// identical subtrees) are kept as they are, a slot empty on one side
    /// takes the other side's entry, and diverging slots are merged
    /// recursively. When both sides hold a leaf for the same key, `resolve`
    /// picks the surviving entry; it is called with `(io, key, base,
    /// incoming)`.
    ///
    /// The header of the merged root is this trie's header. Neither input
    /// is modified.
    pub fn merge<I, F>(&self, io: &mut I, incoming: &Trie<K>, mut resolve: F) -> Result<Self, TrieError>
    where
        I: BlockIo + ?Sized,
        K: Clone,
        F: FnMut(&mut I, &[u8], &TrieEntry, &TrieEntry) -> Result<TrieEntry, TrieError>,
    {
        if self.root() == incoming.root() {
            return Ok(self.clone());
        }
        let base = TrieNode::load(&*io, &self.root())?;
        let other = TrieNode::load(&*io, &incoming.root())?;
        let merged = self.merge_nodes(io, base.clone(), other, 0, &mut resolve)?;
        if merged == base {
            return Ok(self.clone());
        }
        let root = merged.store(io)?;
        Ok(Trie::open(root, self.keys().clone()))
    }

    fn merge_nodes<I, F>(
        &self,
        io: &mut I,
        base: TrieNode,
        incoming: TrieNode,
        depth: usize,
        resolve: &mut F,
    ) -> Result<TrieNode, TrieError>
    where
        I: BlockIo + ?Sized,
        F: FnMut(&mut I, &[u8], &TrieEntry, &TrieEntry) -> Result<TrieEntry, TrieError>,
    {
        if base == incoming {
            return Ok(base);
        }
        let mut out = base.clone();
        for slot in 0..=u8::MAX {
            let ours = *base.entry(slot);
            let theirs = *incoming.entry(slot);
            if ours == theirs {
                continue;
            }
            let merged = match (ours.kind(), theirs.kind()) {
                (_, EntryKind::None) => ours,
                (EntryKind::None, _) => theirs,
                (EntryKind::Item, EntryKind::Item) => {
                    let our_key = self.keys().key_of(&*io, &ours)?;
                    let their_key = self.keys().key_of(&*io, &theirs)?;
                    if our_key == their_key {
                        resolve(io, &our_key, &ours, &theirs)?
                    } else {
                        let child =
                            self.push_down(io, depth + 1, ours, &our_key, theirs, &their_key)?;
                        TrieEntry::more(child.store(io)?)
                    }
                }
                _ => {
                    let our_child = self.child_node(&*io, &ours, depth + 1)?;
                    let their_child = self.child_node(&*io, &theirs, depth + 1)?;
                    let child =
                        self.merge_nodes(io, our_child.clone(), their_child, depth + 1, resolve)?;
                    // unchanged subtree keeps its block
                    if ours.is_more() && child == our_child {
                        ours
                    } else {
                        TrieEntry::more(child.store(io)?)
                    }
                }
            };
            out.set_entry(slot, merged);
        }
        Ok(out)
    }

    /// View a slot as a node at `depth`: a MORE entry is loaded, a leaf is
    /// wrapped in a fresh node of its own
    fn child_node<I: BlockIo + ?Sized>(
        &self,
        io: &I,
        entry: &TrieEntry,
        depth: usize,
    ) -> Result<TrieNode, TrieError> {
        match entry.kind() {
            EntryKind::More => TrieNode::load(io, entry.hash()),
            EntryKind::Item => {
                let key = self.keys().key_of(io, entry)?;
                if depth >= key.len() {
                    return Err(TrieError::Malformed(
                        "leaf sits below the last key byte".to_string(),
                    ));
                }
                let mut node = TrieNode::new();
                node.set_entry(key[depth], *entry);
                Ok(node)
            }
            EntryKind::None => Ok(TrieNode::new()),
        }
    }
}
