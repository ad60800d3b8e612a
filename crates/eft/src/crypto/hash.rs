use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// Size of a SHA-256 digest in bytes
pub const HASH_SIZE: usize = 32;

/// Errors that can occur parsing a hash
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("hash error: {0}")]
    Default(#[from] anyhow::Error),
}

/// A SHA-256 digest
///
/// Blocks are addressed by the hash of their *ciphertext*; paths are indexed
/// by the hash of the path string; item contents carry the hash of their
/// plaintext for end-to-end verification.
///
/// # Examples
///
/// ```
/// use eft::crypto::Hash;
///
/// let hash = Hash::digest(b"hai there");
/// let hex = hash.to_hex();
/// assert_eq!(hex.parse::<Hash>().unwrap(), hash);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Deref for Hash {
    type Target = [u8; HASH_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; HASH_SIZE]> for Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }
}

impl TryFrom<&[u8]> for Hash {
    type Error = HashError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != HASH_SIZE {
            return Err(anyhow::anyhow!(
                "invalid hash size, expected {}, got {}",
                HASH_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; HASH_SIZE];
        buff.copy_from_slice(bytes);
        Ok(buff.into())
    }
}

impl Hash {
    /// Hash arbitrary bytes with SHA-256
    pub fn digest(data: &[u8]) -> Self {
        Hash(Sha256::digest(data).into())
    }

    /// The all-zero hash, used as the "no content" marker
    pub fn zero() -> Self {
        Hash([0; HASH_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; HASH_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Parse a hash from a hexadecimal string
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let mut buff = [0; HASH_SIZE];
        hex::decode_to_slice(hex.trim(), &mut buff)
            .map_err(|e| anyhow::anyhow!("hash hex decode error: {}", e))?;
        Ok(buff.into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Hash {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..12])
    }
}
