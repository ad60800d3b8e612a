use std::io::{Read, Write};

use sha2::{Digest, Sha256};

use crate::block::{BlockIo, BLOCK_PAYLOAD_SIZE};
use crate::crypto::Hash;
use crate::trie::{ChunkKeys, KeySource, Trie, TrieBuilder, TrieEntry, TrieError, Visit};

use super::info::{ItemInfo, INFO_SIZE};
use super::ItemError;

/// Offset of the content inside a small item's block
pub const DATA_OFFSET: usize = 4096;
/// Largest item stored inline in a single block
pub const SMALL_ITEM_MAX: u64 = (BLOCK_PAYLOAD_SIZE - DATA_OFFSET) as u64;

/// Recovers a path-trie key from the item an entry points at
///
/// Both item layouts start with the packed [`ItemInfo`], so the key is always
/// `SHA-256(path)` of the header at offset 0 of the referenced block.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathKeys;

impl PathKeys {
    pub const KEY_LEN: usize = 32;
}

impl KeySource for PathKeys {
    fn key_len(&self) -> usize {
        Self::KEY_LEN
    }

    fn key_of<I: BlockIo + ?Sized>(
        &self,
        io: &I,
        entry: &TrieEntry,
    ) -> Result<Vec<u8>, TrieError> {
        let block = io.get_block(entry.hash())?;
        let info = ItemInfo::from_bytes(&block)
            .map_err(|e| TrieError::Malformed(format!("item {}: {}", entry.hash(), e)))?;
        Ok(info.path_key().to_vec())
    }
}

/// Store an item's content and header, returning the value to put in a
/// path trie and the header as written
///
/// Exactly `info.size` bytes are read from `source`; a source that ends
/// early or has bytes left over fails with [`ItemError::SizeMismatch`]. The
/// content hash of the returned info is computed here.
pub fn put_item<I, R>(io: &mut I, info: &ItemInfo, mut source: R) -> Result<(Hash, ItemInfo), ItemError>
where
    I: BlockIo + ?Sized,
    R: Read,
{
    let mut info = info.clone();
    if info.size <= SMALL_ITEM_MAX {
        let len = info.size as usize;
        let mut block = vec![0u8; BLOCK_PAYLOAD_SIZE];
        let got = read_full(&mut source, &mut block[DATA_OFFSET..DATA_OFFSET + len])?;
        if got != len {
            return Err(ItemError::SizeMismatch {
                expected: info.size,
                got: got as u64,
            });
        }
        ensure_drained(&mut source, info.size)?;
        info.content_hash = Hash::digest(&block[DATA_OFFSET..DATA_OFFSET + len]);
        block[..INFO_SIZE].copy_from_slice(&info.to_bytes()?);
        let hash = io.put_block(&block)?;
        tracing::debug!("put_item: {} small ({} bytes) -> {}", info.path, info.size, hash);
        return Ok((hash, info));
    }

    // Validate the header before writing any chunk.
    info.to_bytes()?;

    let mut hasher = Sha256::new();
    let mut builder = TrieBuilder::new(ChunkKeys);
    let mut total: u64 = 0;
    let mut index: u64 = 0;
    let mut chunk = vec![0u8; BLOCK_PAYLOAD_SIZE];
    while total < info.size {
        let want = (info.size - total).min(BLOCK_PAYLOAD_SIZE as u64) as usize;
        chunk.fill(0);
        let got = read_full(&mut source, &mut chunk[..want])?;
        if got != want {
            return Err(ItemError::SizeMismatch {
                expected: info.size,
                got: total + got as u64,
            });
        }
        hasher.update(&chunk[..got]);
        let hash = io.put_block(&chunk)?;
        builder.insert(&ChunkKeys::key(index), ChunkKeys::entry(index, hash)?)?;
        total += got as u64;
        index += 1;
    }
    ensure_drained(&mut source, info.size)?;

    info.content_hash = Hash::from(<[u8; 32]>::from(hasher.finalize()));
    let trie = builder.finish(io, &info.to_bytes()?)?;
    tracing::debug!(
        "put_item: {} large ({} bytes, {} chunks) -> {}",
        info.path,
        info.size,
        index,
        trie.root()
    );
    Ok((trie.root(), info))
}

/// Read an item's header without touching its content
pub fn item_info<I: BlockIo + ?Sized>(io: &I, hash: &Hash) -> Result<ItemInfo, ItemError> {
    let block = io.get_block(hash)?;
    ItemInfo::from_bytes(&block)
}

/// Write an item's content to `dest`, returning its header
///
/// The content is checked against the header's size and content hash; a
/// mismatch fails after `dest` may already have received data.
pub fn get_item<I, W>(io: &I, hash: &Hash, mut dest: W) -> Result<ItemInfo, ItemError>
where
    I: BlockIo + ?Sized,
    W: Write,
{
    let block = io.get_block(hash)?;
    let info = ItemInfo::from_bytes(&block)?;
    let mut hasher = Sha256::new();

    if info.size <= SMALL_ITEM_MAX {
        let data = &block[DATA_OFFSET..DATA_OFFSET + info.size as usize];
        hasher.update(data);
        dest.write_all(data)?;
    } else {
        let trie = Trie::open(*hash, ChunkKeys);
        let mut written: u64 = 0;
        let mut index: u64 = 0;
        loop {
            let entry = match trie.find(io, &ChunkKeys::key(index)) {
                Ok(entry) => entry,
                Err(TrieError::NotFound) => break,
                Err(e) => return Err(e.into()),
            };
            if written >= info.size {
                return Err(ItemError::SizeMismatch {
                    expected: info.size,
                    got: (index + 1) * BLOCK_PAYLOAD_SIZE as u64,
                });
            }
            let chunk = io.get_block(entry.hash())?;
            let take = (info.size - written).min(chunk.len() as u64) as usize;
            hasher.update(&chunk[..take]);
            dest.write_all(&chunk[..take])?;
            written += take as u64;
            index += 1;
        }
        if written != info.size {
            return Err(ItemError::SizeMismatch {
                expected: info.size,
                got: written,
            });
        }
    }
    dest.flush()?;

    let content_hash = Hash::from(<[u8; 32]>::from(hasher.finalize()));
    if content_hash != info.content_hash {
        return Err(ItemError::Integrity {
            path: info.path.clone(),
        });
    }
    Ok(info)
}

/// Convenience wrapper around [`get_item`] collecting the content in memory
pub fn read_item<I: BlockIo + ?Sized>(io: &I, hash: &Hash) -> Result<(ItemInfo, Vec<u8>), ItemError> {
    let mut data = Vec::new();
    let info = get_item(io, hash, &mut data)?;
    Ok((info, data))
}

/// Call `f` with every block that belongs to an item
///
/// That is the item block itself and, for a large item, every node and chunk
/// of its chunk trie.
pub fn visit_item_blocks<I, F, E>(io: &I, hash: &Hash, mut f: F) -> Result<(), E>
where
    I: BlockIo + ?Sized,
    F: FnMut(&Hash) -> Result<(), E>,
    E: From<ItemError> + From<TrieError>,
{
    let info = item_info(io, hash)?;
    if info.size <= SMALL_ITEM_MAX {
        return f(hash);
    }
    Trie::open(*hash, ChunkKeys).walk(io, |visit| {
        match visit {
            Visit::Node(node) => f(node)?,
            Visit::Leaf(entry) => f(entry.hash())?,
        }
        Ok(true)
    })
}

/// Re-home an item under `path`, returning the new item hash
///
/// Only the header is rewritten; the content blocks of a large item are
/// shared with the original.
pub fn rewrite_item_path<I: BlockIo + ?Sized>(
    io: &mut I,
    hash: &Hash,
    path: &str,
) -> Result<(Hash, ItemInfo), ItemError> {
    let mut block = io.get_block(hash)?;
    let info = ItemInfo::from_bytes(&block)?.renamed(path);
    let header = info.to_bytes()?;
    if info.size <= SMALL_ITEM_MAX {
        block[..INFO_SIZE].copy_from_slice(&header);
        return Ok((io.put_block(&block)?, info));
    }
    let mut trie = Trie::open(*hash, ChunkKeys);
    trie.set_header(io, &header)?;
    Ok((trie.root(), info))
}

fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize, ItemError> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn ensure_drained<R: Read>(source: &mut R, expected: u64) -> Result<(), ItemError> {
    let mut probe = [0u8; 1];
    if read_full(source, &mut probe)? != 0 {
        return Err(ItemError::SizeMismatch {
            expected,
            got: expected + 1,
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::block::BlockStore;
    use crate::crypto::Key;
    use crate::item::ItemType;

    fn setup() -> (BlockStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = BlockStore::open(temp.path(), Key::generate())
            .unwrap()
            .with_sync_writes(false);
        (store, temp)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_small_item_roundtrip() {
        let (mut io, _temp) = setup();
        let info = ItemInfo::file("/hi.txt", 9).with_modified_by("test");
        let (hash, stored) = put_item(&mut io, &info, &b"hai there"[..]).unwrap();
        assert_eq!(stored.content_hash, Hash::digest(b"hai there"));

        let (read, data) = read_item(&io, &hash).unwrap();
        assert_eq!(data, b"hai there");
        assert_eq!(read, stored);
        assert_eq!(item_info(&io, &hash).unwrap().size, 9);

        let block = io.get(&hash).unwrap();
        assert_eq!(&block[DATA_OFFSET..DATA_OFFSET + 9], b"hai there");
    }

    #[test]
    fn test_size_boundary() {
        let (mut io, _temp) = setup();
        for len in [0, SMALL_ITEM_MAX as usize, SMALL_ITEM_MAX as usize + 1] {
            let data = pattern(len);
            let info = ItemInfo::file("/edge", len as u64);
            let (hash, _) = put_item(&mut io, &info, &data[..]).unwrap();
            let (_, read) = read_item(&io, &hash).unwrap();
            assert_eq!(read, data, "len {}", len);
        }
    }

    #[test]
    fn test_large_item_roundtrip() {
        let (mut io, _temp) = setup();
        let len = 3 * BLOCK_PAYLOAD_SIZE + 17;
        let data = pattern(len);
        let info = ItemInfo::file("/big.bin", len as u64);
        let (hash, stored) = put_item(&mut io, &info, &data[..]).unwrap();

        let (read_info, read) = read_item(&io, &hash).unwrap();
        assert_eq!(read.len(), len);
        assert_eq!(read, data);
        assert_eq!(read_info, stored);

        // root + 4 chunks; the four chunk keys differ in their first byte
        let mut blocks = Vec::new();
        visit_item_blocks(&io, &hash, |h| {
            blocks.push(*h);
            Ok::<_, ItemError>(())
        })
        .unwrap();
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0], hash);
    }

    #[test]
    fn test_size_mismatch() {
        let (mut io, _temp) = setup();
        let short = ItemInfo::file("/short", 10);
        assert!(matches!(
            put_item(&mut io, &short, &b"only5"[..]),
            Err(ItemError::SizeMismatch { expected: 10, got: 5 })
        ));
        let long = ItemInfo::file("/long", 2);
        assert!(matches!(
            put_item(&mut io, &long, &b"abc"[..]),
            Err(ItemError::SizeMismatch { expected: 2, .. })
        ));
        let data = pattern(BLOCK_PAYLOAD_SIZE);
        let large = ItemInfo::file("/large", 2 * BLOCK_PAYLOAD_SIZE as u64);
        assert!(matches!(
            put_item(&mut io, &large, &data[..]),
            Err(ItemError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_chunk_is_reported() {
        let (mut io, _temp) = setup();
        let data = pattern(2 * BLOCK_PAYLOAD_SIZE);
        let info = ItemInfo::file("/f", data.len() as u64);
        let (hash, _) = put_item(&mut io, &info, &data[..]).unwrap();

        let chunk = Trie::open(hash, ChunkKeys)
            .find(&io, &ChunkKeys::key(1))
            .unwrap();
        io.remove(chunk.hash()).unwrap();

        let err = read_item(&io, &hash).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rewrite_path_shares_content() {
        let (mut io, _temp) = setup();
        let data = pattern(BLOCK_PAYLOAD_SIZE + 1);
        let info = ItemInfo::file("/a.bin", data.len() as u64);
        let (hash, _) = put_item(&mut io, &info, &data[..]).unwrap();

        let (moved, moved_info) = rewrite_item_path(&mut io, &hash, "/b.bin").unwrap();
        assert_ne!(moved, hash);
        assert_eq!(moved_info.path, "/b.bin");
        let (read_info, read) = read_item(&io, &moved).unwrap();
        assert_eq!(read, data);
        assert_eq!(read_info.path, "/b.bin");

        let key = PathKeys
            .key_of(&io, &TrieEntry::item(moved))
            .unwrap();
        assert_eq!(key, Hash::digest(b"/b.bin").to_vec());
    }

    #[test]
    fn test_link_content_is_target() {
        let (mut io, _temp) = setup();
        let info = ItemInfo::link("/current", "releases/v2");
        let (hash, _) = put_item(&mut io, &info, "releases/v2".as_bytes()).unwrap();
        let (read_info, data) = read_item(&io, &hash).unwrap();
        assert_eq!(read_info.item_type, ItemType::Link);
        assert_eq!(data, b"releases/v2");
    }
}
