/**
 * Block archives: the wire format for moving
 *  encrypted blocks between stores that share a key.
 */
pub mod archive;
/**
 * Fixed-size encrypted blocks on disk, addressed
 *  by the hash of their ciphertext.
 */
pub mod block;
/**
 * Store configuration, loaded from and saved to TOML.
 */
pub mod config;
/**
 * Cryptographic types and operations.
 *  - SHA-256 hashes
 *  - XChaCha20-Poly1305 block sealing
 */
pub mod crypto;
/**
 * Pulling a remote tree into a local store,
 *  one trie level at a time.
 */
pub mod fetch;
/**
 * Mark-and-sweep garbage collection and
 *  replication checkpoints.
 */
pub mod gc;
/**
 * Packing file metadata and contents into blocks.
 *  Small items live in a single block, large ones
 *  in a trie of chunks.
 */
pub mod item;
/**
 * Per-writer logs of created blocks, used to roll
 *  back aborted transactions.
 */
pub mod ledger;
/**
 * Exclusive and shared store locks, in process
 *  and across processes.
 */
pub mod lock;
/**
 * Named, persisted tree roots.
 */
pub mod snapshot;
/**
 * The store handle: transactions, reads and merges.
 */
pub mod store;
/**
 * Persistent copy-on-write 256-ary byte trie.
 *  Indexes both paths and the chunks of large items.
 */
pub mod trie;

pub mod prelude {
    pub use crate::block::{BlockSet, BlockStore};
    pub use crate::config::StoreConfig;
    pub use crate::crypto::{Hash, Key};
    pub use crate::fetch::BlockFetcher;
    pub use crate::gc::{Checkpoint, GcReport};
    pub use crate::item::{ItemInfo, ItemType};
    pub use crate::snapshot::{MAIN, REMOTE};
    pub use crate::store::{
        BaseWins, ConflictFile, ConflictResolver, LastWriteWins, Store, StoreError, Transaction,
    };
}
