use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::crypto::{Hash, Key, KeyError};

pub const BLOCKS_DIR_NAME: &str = "blocks";

#[derive(Debug, thiserror::Error)]
pub enum BlockStoreError {
    #[error("block store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("block store i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("block not found")]
    NotFound,
    #[error("block {hash} is corrupt: ciphertext hash mismatch")]
    Corrupt { hash: Hash },
    #[error("block {hash} failed to decrypt: {source}")]
    Decrypt {
        hash: Hash,
        #[source]
        source: KeyError,
    },
}

impl BlockStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlockStoreError::NotFound)
    }
}

/// Content-addressed store of encrypted, fixed-size blocks
///
/// Each block lives at `<dir>/blocks/<h[0:3]>/<h[3:6]>/<hex hash>`, where the
/// hash is the SHA-256 of the block's ciphertext. There is no separate index:
/// a block exists iff its file exists.
#[derive(Clone, Debug)]
pub struct BlockStore {
    root: PathBuf,
    key: Arc<Key>,
    dedup: bool,
    sync_writes: bool,
}

impl BlockStore {
    /// Open (creating if needed) the block directory under `dir`
    pub fn open(dir: &Path, key: Key) -> Result<Self, BlockStoreError> {
        let root = dir.join(BLOCKS_DIR_NAME);
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            key: Arc::new(key),
            dedup: false,
            sync_writes: true,
        })
    }

    /// Use payload-derived nonces, so identical payloads share one block
    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    /// Whether block files are fsynced before being renamed into place
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The on-disk location of a block
    pub fn path_for(&self, hash: &Hash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[0..3]).join(&hex[3..6]).join(hex)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.path_for(hash).is_file()
    }

    /// Encrypt and store one block payload, returning the ciphertext hash
    pub fn put(&self, plaintext: &[u8]) -> Result<Hash, BlockStoreError> {
        self.write(plaintext).map(|(hash, _)| hash)
    }

    /// Like [`put`](Self::put), also reporting whether the block file was
    /// created by this call (as opposed to already being on disk)
    pub fn write(&self, plaintext: &[u8]) -> Result<(Hash, bool), BlockStoreError> {
        let ciphertext = if self.dedup {
            self.key.encrypt_deterministic(plaintext)
        } else {
            self.key.encrypt(plaintext)
        };
        let hash = Hash::digest(&ciphertext);
        let created = self.write_file(&hash, &ciphertext)?;
        Ok((hash, created))
    }

    /// Read, verify and decrypt one block
    pub fn get(&self, hash: &Hash) -> Result<Vec<u8>, BlockStoreError> {
        let ciphertext = self.get_raw(hash)?;
        self.key
            .decrypt(&ciphertext)
            .map_err(|source| BlockStoreError::Decrypt {
                hash: *hash,
                source,
            })
    }

    /// Read one block's ciphertext, verifying it still hashes to `hash`
    pub fn get_raw(&self, hash: &Hash) -> Result<Vec<u8>, BlockStoreError> {
        let ciphertext = match fs::read(self.path_for(hash)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BlockStoreError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };
        if Hash::digest(&ciphertext) != *hash {
            return Err(BlockStoreError::Corrupt { hash: *hash });
        }
        Ok(ciphertext)
    }

    /// Store a ciphertext received from elsewhere
    ///
    /// The claimed hash is never trusted: the ciphertext is re-hashed and its
    /// tag verified against the store key before anything touches the disk.
    /// Returns `true` if the block was not present before.
    pub fn put_raw(&self, hash: &Hash, ciphertext: &[u8]) -> Result<bool, BlockStoreError> {
        if Hash::digest(ciphertext) != *hash {
            return Err(BlockStoreError::Corrupt { hash: *hash });
        }
        self.key
            .decrypt(ciphertext)
            .map_err(|source| BlockStoreError::Decrypt {
                hash: *hash,
                source,
            })?;
        self.write_file(hash, ciphertext)
    }

    /// Delete a block's file. Returns `false` if it did not exist.
    pub fn remove(&self, hash: &Hash) -> Result<bool, BlockStoreError> {
        match fs::remove_file(self.path_for(hash)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Call `f` with the hash of every block file on disk
    ///
    /// Files whose names are not a 64-character hex hash (e.g. temp files left
    /// by an interrupted write) are skipped.
    pub fn for_each_hash<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(Hash) -> Result<(), E>,
        E: From<BlockStoreError>,
    {
        for shard in read_dir_sorted(&self.root)? {
            if !shard.is_dir() {
                continue;
            }
            for sub in read_dir_sorted(&shard)? {
                if !sub.is_dir() {
                    continue;
                }
                for file in read_dir_sorted(&sub)? {
                    let name = match file.file_name().and_then(|n| n.to_str()) {
                        Some(name) => name,
                        None => continue,
                    };
                    if name.len() != 64 {
                        continue;
                    }
                    if let Ok(hash) = Hash::from_hex(name) {
                        f(hash)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn write_file(&self, hash: &Hash, ciphertext: &[u8]) -> Result<bool, BlockStoreError> {
        let path = self.path_for(hash);
        if path.is_file() {
            tracing::trace!("BlockStore::write_file: {} already present", hash);
            return Ok(false);
        }
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("block path has no parent: {:?}", path))?;
        fs::create_dir_all(parent)?;

        // Write to a sibling temp file and rename, so a crash never leaves a
        // truncated block under its final name.
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(parent)?;
        tmp.write_all(ciphertext)?;
        if self.sync_writes {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(&path).map_err(|e| BlockStoreError::Io(e.error))?;
        Ok(true)
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, BlockStoreError> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::BLOCK_PAYLOAD_SIZE;
    use tempfile::TempDir;

    fn setup() -> (BlockStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = BlockStore::open(temp.path(), Key::generate())
            .unwrap()
            .with_sync_writes(false);
        (store, temp)
    }

    fn payload(text: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; BLOCK_PAYLOAD_SIZE];
        buf[..text.len()].copy_from_slice(text);
        buf
    }

    fn count_blocks(store: &BlockStore) -> usize {
        let mut n = 0;
        store
            .for_each_hash(|_| Ok::<_, BlockStoreError>(n += 1))
            .unwrap();
        n
    }

    #[test]
    fn test_put_get() {
        let (store, _temp) = setup();
        let data = payload(b"hai there");
        let hash = store.put(&data).unwrap();

        assert!(store.contains(&hash));
        assert_eq!(store.get(&hash).unwrap(), data);

        let hex = hash.to_hex();
        let expected = store
            .root()
            .join(&hex[0..3])
            .join(&hex[3..6])
            .join(&hex);
        assert_eq!(store.path_for(&hash), expected);
        assert!(expected.is_file());
    }

    #[test]
    fn test_get_missing() {
        let (store, _temp) = setup();
        let err = store.get(&Hash::digest(b"nope")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_bit_flip_detected() {
        let (store, _temp) = setup();
        let hash = store.put(&payload(b"precious")).unwrap();
        let path = store.path_for(&hash);

        let original = fs::read(&path).unwrap();
        for bit in [0usize, 8 * 30, 8 * 5000 + 3, 8 * (original.len() - 1) + 7] {
            let mut corrupted = original.clone();
            corrupted[bit / 8] ^= 1 << (bit % 8);
            fs::write(&path, &corrupted).unwrap();
            let err = store.get(&hash).unwrap_err();
            assert!(matches!(err, BlockStoreError::Corrupt { .. }), "{err}");
        }
    }

    #[test]
    fn test_dedup_writes_are_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = BlockStore::open(temp.path(), Key::generate())
            .unwrap()
            .with_dedup(true)
            .with_sync_writes(false);

        let (a, created) = store.write(&payload(b"same")).unwrap();
        assert!(created);
        let (b, created) = store.write(&payload(b"same")).unwrap();
        assert!(!created);
        assert_eq!(a, b);
        assert_eq!(count_blocks(&store), 1);
    }

    #[test]
    fn test_random_nonce_writes_are_distinct() {
        let (store, _temp) = setup();
        let a = store.put(&payload(b"same")).unwrap();
        let b = store.put(&payload(b"same")).unwrap();
        assert_ne!(a, b);
        assert_eq!(count_blocks(&store), 2);
    }

    #[test]
    fn test_put_raw_verifies() {
        let (store, _temp) = setup();
        let (other, _other_temp) = setup();

        let hash = store.put(&payload(b"move me")).unwrap();
        let ciphertext = store.get_raw(&hash).unwrap();

        // wrong key -> tag check fails
        assert!(matches!(
            other.put_raw(&hash, &ciphertext),
            Err(BlockStoreError::Decrypt { .. })
        ));

        // wrong hash -> rejected before decrypting
        assert!(matches!(
            store.put_raw(&Hash::digest(b"lie"), &ciphertext),
            Err(BlockStoreError::Corrupt { .. })
        ));

        // already present -> no-op
        assert!(!store.put_raw(&hash, &ciphertext).unwrap());
        assert_eq!(count_blocks(&store), 1);
    }

    #[test]
    fn test_remove_and_walk() {
        let (store, _temp) = setup();
        let mut hashes: Vec<Hash> = (0..5u8)
            .map(|i| store.put(&payload(&[i])).unwrap())
            .collect();
        hashes.sort();

        let mut seen = Vec::new();
        store
            .for_each_hash(|h| Ok::<_, BlockStoreError>(seen.push(h)))
            .unwrap();
        seen.sort();
        assert_eq!(seen, hashes);

        assert!(store.remove(&hashes[0]).unwrap());
        assert!(!store.remove(&hashes[0]).unwrap());
        assert_eq!(count_blocks(&store), 4);
    }
}
