use crate::block::{BlockIo, BLOCK_PAYLOAD_SIZE};
use crate::crypto::{Hash, HASH_SIZE};

use super::entry::{TrieEntry, ENTRY_SIZE};
use super::TrieError;

/// Size of the header region at the start of every node
pub const HEADER_SIZE: usize = 2048;
/// Number of slots per node, one per key byte value
pub const FANOUT: usize = 256;
/// Number of reserved overflow hash slots
pub const OVERFLOW_SLOTS: usize = 16;
/// Serialized size of a node before padding to a block payload
pub const NODE_SIZE: usize = HEADER_SIZE + FANOUT * ENTRY_SIZE + OVERFLOW_SLOTS * HASH_SIZE;

const ENTRIES_OFFSET: usize = HEADER_SIZE;
const OVERFLOW_OFFSET: usize = ENTRIES_OFFSET + FANOUT * ENTRY_SIZE;

const _: () = assert!(NODE_SIZE <= BLOCK_PAYLOAD_SIZE);

/// One fixed-size trie node
///
/// Layout: `header (2048) || 256 x entry (48) || 16 x overflow hash (32)`,
/// zero padded to one block payload. The header is free space for the
/// owner of the trie (a large item's root embeds its metadata there).
#[derive(Clone, PartialEq, Eq)]
pub struct TrieNode {
    header: Box<[u8; HEADER_SIZE]>,
    entries: Box<[TrieEntry; FANOUT]>,
}

impl std::fmt::Debug for TrieNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieNode")
            .field("occupied", &self.occupied())
            .finish()
    }
}

impl Default for TrieNode {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieNode {
    pub fn new() -> Self {
        TrieNode {
            header: Box::new([0; HEADER_SIZE]),
            entries: Box::new([TrieEntry::none(); FANOUT]),
        }
    }

    pub fn with_header(header: &[u8]) -> Result<Self, TrieError> {
        let mut node = Self::new();
        node.set_header(header)?;
        Ok(node)
    }

    pub fn header(&self) -> &[u8; HEADER_SIZE] {
        &self.header
    }

    /// Replace the header; shorter input is zero padded
    pub fn set_header(&mut self, header: &[u8]) -> Result<(), TrieError> {
        if header.len() > HEADER_SIZE {
            return Err(TrieError::Malformed(format!(
                "node header too long: {} > {}",
                header.len(),
                HEADER_SIZE
            )));
        }
        self.header.fill(0);
        self.header[..header.len()].copy_from_slice(header);
        Ok(())
    }

    pub fn entry(&self, slot: u8) -> &TrieEntry {
        &self.entries[slot as usize]
    }

    pub fn set_entry(&mut self, slot: u8, entry: TrieEntry) {
        self.entries[slot as usize] = entry;
    }

    pub fn entries(&self) -> impl Iterator<Item = (u8, &TrieEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(slot, entry)| (slot as u8, entry))
    }

    /// Number of non-empty slots
    pub fn occupied(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_none()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// The sole occupant, if this node holds exactly one leaf and nothing else
    pub fn single_item(&self) -> Option<TrieEntry> {
        let mut occupants = self.entries.iter().filter(|e| !e.is_none());
        match (occupants.next(), occupants.next()) {
            (Some(entry), None) if entry.is_item() => Some(*entry),
            _ => None,
        }
    }

    /// Serialize into a full block payload
    pub fn to_block(&self) -> Vec<u8> {
        let mut buf = vec![0u8; BLOCK_PAYLOAD_SIZE];
        buf[..HEADER_SIZE].copy_from_slice(&self.header[..]);
        for (i, entry) in self.entries.iter().enumerate() {
            let start = ENTRIES_OFFSET + i * ENTRY_SIZE;
            entry.write_to(&mut buf[start..start + ENTRY_SIZE]);
        }
        buf
    }

    pub fn from_block(buf: &[u8]) -> Result<Self, TrieError> {
        if buf.len() != BLOCK_PAYLOAD_SIZE {
            return Err(TrieError::Malformed(format!(
                "node block must be {} bytes, got {}",
                BLOCK_PAYLOAD_SIZE,
                buf.len()
            )));
        }
        if buf[OVERFLOW_OFFSET..NODE_SIZE].iter().any(|b| *b != 0) {
            return Err(TrieError::Malformed(
                "overflow hash region is in use".to_string(),
            ));
        }
        let mut node = Self::new();
        node.header.copy_from_slice(&buf[..HEADER_SIZE]);
        for i in 0..FANOUT {
            let start = ENTRIES_OFFSET + i * ENTRY_SIZE;
            node.entries[i] = TrieEntry::read_from(&buf[start..start + ENTRY_SIZE])?;
        }
        Ok(node)
    }

    pub fn load<I: BlockIo + ?Sized>(io: &I, hash: &Hash) -> Result<Self, TrieError> {
        let block = io.get_block(hash)?;
        Self::from_block(&block)
    }

    pub fn store<I: BlockIo + ?Sized>(&self, io: &mut I) -> Result<Hash, TrieError> {
        Ok(io.put_block(&self.to_block())?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_node_size_fits_block() {
        assert_eq!(NODE_SIZE, 2048 + 256 * 48 + 16 * 32);
    }

    #[test]
    fn test_node_block_roundtrip() {
        let mut node = TrieNode::with_header(b"header bytes").unwrap();
        node.set_entry(0, TrieEntry::item(Hash::digest(b"zero")));
        node.set_entry(255, TrieEntry::more(Hash::digest(b"last")));

        let block = node.to_block();
        assert_eq!(block.len(), BLOCK_PAYLOAD_SIZE);
        assert_eq!(&block[..12], b"header bytes");

        let decoded = TrieNode::from_block(&block).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.to_block(), block);
        assert_eq!(decoded.occupied(), 2);
    }

    #[test]
    fn test_single_item() {
        let mut node = TrieNode::new();
        assert!(node.is_empty());
        assert!(node.single_item().is_none());

        let item = TrieEntry::item(Hash::digest(b"a"));
        node.set_entry(4, item);
        assert_eq!(node.single_item(), Some(item));

        node.set_entry(5, TrieEntry::item(Hash::digest(b"b")));
        assert!(node.single_item().is_none());

        let mut node = TrieNode::new();
        node.set_entry(4, TrieEntry::more(Hash::digest(b"child")));
        assert!(node.single_item().is_none());
    }

    #[test]
    fn test_overflow_region_rejected() {
        let mut block = TrieNode::new().to_block();
        block[OVERFLOW_OFFSET] = 1;
        assert!(TrieNode::from_block(&block).is_err());
        assert!(TrieNode::from_block(&block[..100]).is_err());
    }

    #[test]
    fn test_header_too_long() {
        assert!(TrieNode::with_header(&[1u8; HEADER_SIZE + 1]).is_err());
    }
}
