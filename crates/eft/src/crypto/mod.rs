//! Cryptographic primitives for EFT
//!
//! - **Hashing**: SHA-256 ([`Hash`]) addresses blocks, indexes paths and
//!   fingerprints item contents
//! - **Encryption**: XChaCha20-Poly1305 ([`Key`]) seals every fixed-size block
//!
//! # Content addressing
//!
//! Blocks are addressed by the hash of their ciphertext, and every encryption
//! draws a fresh random 24-byte nonce. Storing the same plaintext twice
//! therefore produces two distinct blocks: deduplication only happens when an
//! already-encrypted block is referenced again (unchanged subtrees and
//! chunks carried between versions). Stores opened with `dedup = true` use
//! [`Key::encrypt_deterministic`] instead, trading equality leakage for
//! cross-content deduplication.

mod hash;
mod key;

pub use hash::{Hash, HashError, HASH_SIZE};
pub use key::{
    Key, KeyError, BLOCK_CIPHERTEXT_SIZE, BLOCK_PAYLOAD_SIZE, KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
