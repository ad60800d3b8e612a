//! Block archives
//!
//! An archive is a flat stream of `(hash, ciphertext)` records:
//!
//! ```text
//! [32-byte hash][16424-byte ciphertext] [32-byte hash][ciphertext] ...
//! ```
//!
//! Archives carry blocks between stores that share a key. Blocks stay
//! encrypted in transit; the receiving side re-hashes every ciphertext and
//! verifies its tag before anything touches the block directory.

use std::io::{self, Read, Write};

use crate::block::{BlockSet, BlockStore, BlockStoreError, BLOCK_CIPHERTEXT_SIZE};
use crate::crypto::{Hash, HASH_SIZE};

/// Bytes per archive record
pub const RECORD_SIZE: usize = HASH_SIZE + BLOCK_CIPHERTEXT_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("archive i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("block error: {0}")]
    Block(#[from] BlockStoreError),
    #[error("archive truncated after {records} records")]
    Truncated { records: usize },
    #[error("archive is missing {} wanted blocks", missing.len())]
    Incomplete { missing: BlockSet },
}

impl ArchiveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::Block(e) if e.is_not_found())
    }
}

/// Packs blocks into an archive stream
#[derive(Debug)]
pub struct ArchiveWriter<W: Write> {
    out: W,
    records: usize,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(out: W) -> Self {
        ArchiveWriter { out, records: 0 }
    }

    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn add(&mut self, hash: &Hash, ciphertext: &[u8]) -> Result<(), ArchiveError> {
        if ciphertext.len() != BLOCK_CIPHERTEXT_SIZE {
            return Err(anyhow::anyhow!(
                "block {} is {} bytes, expected {}",
                hash,
                ciphertext.len(),
                BLOCK_CIPHERTEXT_SIZE
            )
            .into());
        }
        self.out.write_all(hash.as_bytes())?;
        self.out.write_all(ciphertext)?;
        self.records += 1;
        Ok(())
    }

    /// Copy a block's ciphertext out of `blocks`
    pub fn add_from(&mut self, blocks: &BlockStore, hash: &Hash) -> Result<(), ArchiveError> {
        let ciphertext = blocks.get_raw(hash)?;
        self.add(hash, &ciphertext)
    }

    /// Flush and hand back the underlying writer
    pub fn finish(mut self) -> Result<W, ArchiveError> {
        self.out.flush()?;
        tracing::debug!("ArchiveWriter::finish: {} records", self.records);
        Ok(self.out)
    }
}

/// Unpacks an archive stream into a block store
#[derive(Debug)]
pub struct ArchiveReader<R: Read> {
    input: R,
    records: usize,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(input: R) -> Self {
        ArchiveReader { input, records: 0 }
    }

    /// The next record, or `None` at a clean end of stream
    pub fn next_record(&mut self) -> Result<Option<(Hash, Vec<u8>)>, ArchiveError> {
        let mut record = vec![0u8; RECORD_SIZE];
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.input.read(&mut record[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < RECORD_SIZE {
            return Err(ArchiveError::Truncated {
                records: self.records,
            });
        }
        let ciphertext = record.split_off(HASH_SIZE);
        let hash = Hash::try_from(record.as_slice()).map_err(anyhow::Error::from)?;
        self.records += 1;
        Ok(Some((hash, ciphertext)))
    }

    /// Verify and store every record, returning the hashes extracted
    ///
    /// Stops at the first record whose ciphertext does not hash to its
    /// claimed hash or fails authentication. Blocks stored before that
    /// point stay in place; they are valid and unreferenced until a root
    /// reaches them.
    pub fn extract(mut self, blocks: &BlockStore) -> Result<BlockSet, ArchiveError> {
        let mut extracted = BlockSet::new();
        let mut created = 0;
        while let Some((hash, ciphertext)) = self.next_record()? {
            if blocks.put_raw(&hash, &ciphertext)? {
                created += 1;
            }
            extracted.insert(hash);
        }
        tracing::info!(
            "ArchiveReader::extract: {} records, {} new blocks",
            self.records,
            created
        );
        Ok(extracted)
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::crypto::{Key, BLOCK_PAYLOAD_SIZE};

    fn pair() -> (BlockStore, BlockStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let key = Key::generate();
        let a = BlockStore::open(&temp.path().join("a"), key.clone())
            .unwrap()
            .with_sync_writes(false);
        let b = BlockStore::open(&temp.path().join("b"), key)
            .unwrap()
            .with_sync_writes(false);
        (a, b, temp)
    }

    #[test]
    fn test_transfer_between_stores() {
        let (a, b, _temp) = pair();
        let hashes: Vec<Hash> = (0..4u8)
            .map(|i| a.put(&[i; BLOCK_PAYLOAD_SIZE]).unwrap())
            .collect();

        let mut writer = ArchiveWriter::new(Vec::new());
        for hash in &hashes {
            writer.add_from(&a, hash).unwrap();
        }
        assert_eq!(writer.len(), 4);
        let archive = writer.finish().unwrap();
        assert_eq!(archive.len(), 4 * RECORD_SIZE);

        let extracted = ArchiveReader::new(archive.as_slice()).extract(&b).unwrap();
        assert_eq!(extracted.len(), 4);
        for (i, hash) in hashes.iter().enumerate() {
            assert_eq!(b.get(hash).unwrap(), vec![i as u8; BLOCK_PAYLOAD_SIZE]);
        }
    }

    #[test]
    fn test_tampered_record_rejected() {
        let (a, b, _temp) = pair();
        let good = a.put(&[1; BLOCK_PAYLOAD_SIZE]).unwrap();
        let bad = a.put(&[2; BLOCK_PAYLOAD_SIZE]).unwrap();

        let mut writer = ArchiveWriter::new(Vec::new());
        writer.add_from(&a, &good).unwrap();
        writer.add_from(&a, &bad).unwrap();
        let mut archive = writer.finish().unwrap();
        archive[RECORD_SIZE + HASH_SIZE + 100] ^= 0x01;

        let err = ArchiveReader::new(archive.as_slice()).extract(&b).unwrap_err();
        assert!(matches!(err, ArchiveError::Block(BlockStoreError::Corrupt { hash }) if hash == bad));
        assert!(b.contains(&good));
        assert!(!b.contains(&bad));
    }

    #[test]
    fn test_foreign_key_rejected() {
        let (a, _b, temp) = pair();
        let stranger = BlockStore::open(&temp.path().join("c"), Key::generate()).unwrap();
        let hash = a.put(&[3; BLOCK_PAYLOAD_SIZE]).unwrap();

        let mut writer = ArchiveWriter::new(Vec::new());
        writer.add_from(&a, &hash).unwrap();
        let archive = writer.finish().unwrap();

        let err = ArchiveReader::new(archive.as_slice())
            .extract(&stranger)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Block(BlockStoreError::Decrypt { .. })));
        assert!(!stranger.contains(&hash));
    }

    #[test]
    fn test_truncated_archive() {
        let (a, b, _temp) = pair();
        let hash = a.put(&[4; BLOCK_PAYLOAD_SIZE]).unwrap();
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.add_from(&a, &hash).unwrap();
        let mut archive = writer.finish().unwrap();
        archive.truncate(RECORD_SIZE - 10);

        let err = ArchiveReader::new(archive.as_slice()).extract(&b).unwrap_err();
        assert!(matches!(err, ArchiveError::Truncated { records: 0 }));
    }

    #[test]
    fn test_wrong_size_ciphertext() {
        let mut writer = ArchiveWriter::new(Vec::new());
        assert!(writer.add(&Hash::digest(b"x"), b"short").is_err());
        assert!(writer.is_empty());
    }
}
