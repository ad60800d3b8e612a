use crate::crypto::Hash;

use super::{BlockStore, BlockStoreError};

/// Read/write access to plaintext blocks
///
/// The trie engine and the item codec only ever talk to blocks through this
/// seam. [`BlockStore`] implements it directly (writes go untracked); a
/// [`Transaction`](crate::store::Transaction) implements it by recording every
/// written hash in its ledger so the transaction can be rolled back.
pub trait BlockIo {
    /// Read and decrypt one block
    fn get_block(&self, hash: &Hash) -> Result<Vec<u8>, BlockStoreError>;

    /// Encrypt and persist one block payload
    fn put_block(&mut self, plaintext: &[u8]) -> Result<Hash, BlockStoreError>;
}

impl BlockIo for BlockStore {
    fn get_block(&self, hash: &Hash) -> Result<Vec<u8>, BlockStoreError> {
        self.get(hash)
    }

    fn put_block(&mut self, plaintext: &[u8]) -> Result<Hash, BlockStoreError> {
        self.put(plaintext)
    }
}
