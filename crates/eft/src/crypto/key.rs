//! Block encryption using XChaCha20-Poly1305
//!
//! Every block in the store is encrypted with the single store `Key`.
//! Plaintexts are always exactly [`BLOCK_PAYLOAD_SIZE`] bytes, so every
//! ciphertext on disk is exactly [`BLOCK_CIPHERTEXT_SIZE`] bytes:
//! `nonce (24 bytes) || encrypted(payload) || tag (16 bytes)`.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sha2::{Digest, Sha256};

/// Size of the XChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 24;
/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;
/// Size of the store key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;
/// Plaintext size of every block
pub const BLOCK_PAYLOAD_SIZE: usize = 16 * 1024;
/// On-disk size of every block
pub const BLOCK_CIPHERTEXT_SIZE: usize = NONCE_SIZE + BLOCK_PAYLOAD_SIZE + TAG_SIZE;

/// Errors that can occur during decryption
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid ciphertext size, expected {expected}, got {got}")]
    Size { expected: usize, got: usize },
    #[error("authentication failed")]
    Auth,
}

/// The 256-bit symmetric key every block is encrypted with
///
/// Serialized as a hex string so it can live in a TOML config file.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key(#[serde_as(as = "serde_with::hex::Hex")] [u8; KEY_SIZE]);

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

impl From<[u8; KEY_SIZE]> for Key {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Key(bytes)
    }
}

impl Key {
    /// Generate a new random key using the system RNG
    pub fn generate() -> Self {
        let mut buff = [0; KEY_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    /// Create a key from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `KEY_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, KeyError> {
        if data.len() != KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid key size, expected {}, got {}",
                KEY_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; KEY_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(self.bytes()))
    }

    /// Encrypt one block payload
    ///
    /// A fresh random nonce is drawn for every call, so encrypting the same
    /// payload twice yields two different ciphertexts.
    ///
    /// # Panics
    ///
    /// Panics if `plaintext` is not exactly [`BLOCK_PAYLOAD_SIZE`] bytes, or
    /// if the system RNG is unavailable.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes).expect("failed to generate nonce");
        self.seal(&nonce_bytes, plaintext)
    }

    /// Encrypt one block payload with a nonce derived from the key and the
    /// payload itself
    ///
    /// Identical payloads produce identical ciphertexts (and therefore
    /// identical block hashes), which lets the store deduplicate content.
    /// Distinct payloads still get distinct nonces. The cost is that an
    /// observer of the block directory learns which blocks are equal.
    ///
    /// # Panics
    ///
    /// Panics if `plaintext` is not exactly [`BLOCK_PAYLOAD_SIZE`] bytes.
    pub fn encrypt_deterministic(&self, plaintext: &[u8]) -> Vec<u8> {
        let digest = Sha256::new()
            .chain_update(b"eft-block-nonce")
            .chain_update(self.0)
            .chain_update(plaintext)
            .finalize();
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&digest[..NONCE_SIZE]);
        self.seal(&nonce_bytes, plaintext)
    }

    fn seal(&self, nonce_bytes: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
        assert_eq!(
            plaintext.len(),
            BLOCK_PAYLOAD_SIZE,
            "block payload must be exactly {} bytes",
            BLOCK_PAYLOAD_SIZE
        );
        let nonce = XNonce::from_slice(nonce_bytes);

        // Encryption of a bounded in-memory buffer cannot fail.
        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext)
            .expect("xchacha20poly1305 encryption failed");

        let mut out = Vec::with_capacity(BLOCK_CIPHERTEXT_SIZE);
        out.extend_from_slice(nonce.as_ref());
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypt one block
    ///
    /// # Errors
    ///
    /// - [`KeyError::Size`] if the ciphertext is not exactly one block
    /// - [`KeyError::Auth`] if the tag does not verify (tampering or wrong key)
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyError> {
        if ciphertext.len() != BLOCK_CIPHERTEXT_SIZE {
            return Err(KeyError::Size {
                expected: BLOCK_CIPHERTEXT_SIZE,
                got: ciphertext.len(),
            });
        }

        let nonce = XNonce::from_slice(&ciphertext[..NONCE_SIZE]);
        self.cipher()
            .decrypt(nonce, &ciphertext[NONCE_SIZE..])
            .map_err(|_| KeyError::Auth)
    }
}
