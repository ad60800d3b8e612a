//! Persistent 256-ary byte trie
//!
//! The same engine indexes two things:
//!
//! - the **path trie**, keyed by `SHA-256(path)`, whose leaves point at item
//!   blocks (one root hash = one complete version of the file tree)
//! - the **chunk trie** of a large item, keyed by the 8-byte little-endian
//!   chunk index, whose leaves point at raw content blocks
//!
//! # Structure
//!
//! Every node is one block: a 2048-byte header, 256 [`TrieEntry`] slots and a
//! reserved overflow region. Slot `i` of a node at depth `d` holds keys whose
//! byte `d` equals `i`. A slot is either empty, a leaf (`ITEM`), or a pointer
//! to a child node one level deeper (`MORE`).
//!
//! ```text
//!              root (depth 0)
//!        [00]  [01]  ...  [a7]  ...  [ff]
//!         |           MORE |
//!       ITEM                v
//!              node (depth 1)
//!          [00] ... [3c] ... [ff]
//!                   ITEM
//! ```
//!
//! A leaf can sit above the last key byte, so lookups compare the full key
//! of the leaf they reach; the [`KeySource`] of the trie recovers it.
//!
//! # Copy-on-write
//!
//! Nodes are never modified in place. A mutation rewrites the touched path
//! bottom-up (children are persisted before the parent that references
//! them) and yields a new root hash, so older roots stay valid and a
//! transaction can be rolled back by deleting the blocks it wrote.

mod build;
mod engine;
mod entry;
mod merge;
mod node;

pub use build::TrieBuilder;
pub use engine::{ChunkKeys, KeySource, Trie, Visit};
pub use entry::{EntryKind, TrieEntry, AUX_SIZE, ENTRY_SIZE};
pub use node::{TrieNode, FANOUT, HEADER_SIZE, NODE_SIZE, OVERFLOW_SLOTS};

use crate::block::BlockStoreError;

#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    #[error("trie error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("block error: {0}")]
    Block(#[from] BlockStoreError),
    #[error("key not found")]
    NotFound,
    #[error("invalid key length, expected {expected}, got {got}")]
    KeyLength { expected: usize, got: usize },
    #[error("malformed trie: {0}")]
    Malformed(String),
}

impl TrieError {
    /// True for a missing key, and for a block missing underneath the trie
    pub fn is_not_found(&self) -> bool {
        match self {
            TrieError::NotFound => true,
            TrieError::Block(e) => e.is_not_found(),
            _ => false,
        }
    }
}
