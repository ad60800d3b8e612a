//! Path trie lookups shared by transactions and lock-guarded reads

use crate::block::BlockIo;
use crate::crypto::Hash;
use crate::item::{item_info, path_key, ItemError, ItemInfo, PathKeys};
use crate::trie::{Trie, TrieError};

use super::StoreError;

pub(crate) fn path_trie(root: Hash) -> Trie<PathKeys> {
    Trie::open(root, PathKeys)
}

/// The item hash stored under `path`
pub(crate) fn lookup<I: BlockIo + ?Sized>(
    io: &I,
    root: Option<Hash>,
    path: &str,
) -> Result<Hash, StoreError> {
    let root = root.ok_or(StoreError::NotFound)?;
    let entry = path_trie(root).find(io, path_key(path).as_bytes())?;
    Ok(*entry.hash())
}

/// Every item header in the tree, sorted by path
pub(crate) fn list<I: BlockIo + ?Sized>(
    io: &I,
    root: Option<Hash>,
) -> Result<Vec<ItemInfo>, StoreError> {
    let root = match root {
        Some(root) => root,
        None => return Ok(Vec::new()),
    };
    let mut items = Vec::new();
    path_trie(root).visit_entries(io, |entry| {
        items.push(item_info(io, entry.hash())?);
        Ok::<_, StoreError>(())
    })?;
    items.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(items)
}

/// Item errors surfacing inside trie callbacks (key recovery, merge
/// resolution) keep their block and trie causes
pub(crate) fn item_to_trie_error(e: ItemError) -> TrieError {
    match e {
        ItemError::Trie(e) => e,
        ItemError::Block(e) => TrieError::Block(e),
        ItemError::NotFound => TrieError::NotFound,
        e => TrieError::Default(e.into()),
    }
}
