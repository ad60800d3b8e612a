//! Encrypted block storage
//!
//! - **[`BlockStore`]**: content-addressed, sharded on-disk store of
//!   fixed-size encrypted blocks
//! - **[`BlockIo`]**: the read/write seam higher layers go through
//! - **[`BlockSet`]**: an unordered set of block hashes

mod io;
mod set;
mod store;

pub use io::BlockIo;
pub use set::BlockSet;
pub use store::{BlockStore, BlockStoreError, BLOCKS_DIR_NAME};

pub use crate::crypto::{BLOCK_CIPHERTEXT_SIZE, BLOCK_PAYLOAD_SIZE};
