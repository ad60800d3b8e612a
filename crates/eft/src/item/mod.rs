//! Item codec: packing file metadata and content into blocks
//!
//! An item is one file, directory or symlink. Its value in the path trie is
//! the hash of a single block whose first [`INFO_SIZE`] bytes are the packed
//! [`ItemInfo`]:
//!
//! - **small items** (at most [`SMALL_ITEM_MAX`] bytes) keep their content in
//!   the same block, starting at [`DATA_OFFSET`]
//! - **large items** are the root node of a chunk trie; the info lives in the
//!   root's header region and the leaves point at content chunks of one
//!   block payload each, keyed by chunk index
//!
//! Because both layouts put the info at offset 0, reading an item's header
//! never needs to know which layout it uses.

mod codec;
mod info;

pub use codec::{
    get_item, item_info, put_item, read_item, rewrite_item_path, visit_item_blocks, PathKeys,
    DATA_OFFSET, SMALL_ITEM_MAX,
};
pub use info::{path_key, ItemInfo, ItemType, INFO_SIZE, MODIFIED_BY_MAX, PATH_MAX};

use crate::block::BlockStoreError;
use crate::trie::TrieError;

#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("item error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("block error: {0}")]
    Block(#[from] BlockStoreError),
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("item not found")]
    NotFound,
    #[error("{field} too long: {len} bytes, at most {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch { expected: u64, got: u64 },
    #[error("content of {path} does not match its recorded hash")]
    Integrity { path: String },
    #[error("malformed item: {0}")]
    Malformed(String),
}

impl ItemError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ItemError::NotFound => true,
            ItemError::Block(e) => e.is_not_found(),
            ItemError::Trie(e) => e.is_not_found(),
            _ => false,
        }
    }
}
