use crate::crypto::{Hash, HASH_SIZE};

use super::TrieError;

/// Serialized size of one entry
pub const ENTRY_SIZE: usize = 48;
/// Bytes of entry-specific auxiliary data an entry can carry
pub const AUX_SIZE: usize = 14;

const KIND_OFFSET: usize = HASH_SIZE;
const AUX_LEN_OFFSET: usize = HASH_SIZE + 1;
const AUX_OFFSET: usize = HASH_SIZE + 2;

const TAG_NONE: u8 = 0;
const TAG_MORE: u8 = 1;
const TAG_OVERFLOW: u8 = 2;
const TAG_ITEM: u8 = 3;

/// What a node slot holds
///
/// The on-disk format reserves a fourth tag for overflow chains; nothing in
/// this crate writes it and decoding one fails with [`TrieError::Malformed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Empty slot
    None,
    /// Internal pointer to a child node one level deeper
    More,
    /// Leaf pointing at an item or content block
    Item,
}

/// One 48-byte slot of a [`TrieNode`](super::TrieNode)
///
/// Layout: `hash (32) || kind (1) || aux_len (1) || aux (14)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieEntry {
    kind: EntryKind,
    hash: Hash,
    aux_len: u8,
    aux: [u8; AUX_SIZE],
}

impl Default for TrieEntry {
    fn default() -> Self {
        Self::none()
    }
}

impl TrieEntry {
    pub fn none() -> Self {
        TrieEntry {
            kind: EntryKind::None,
            hash: Hash::zero(),
            aux_len: 0,
            aux: [0; AUX_SIZE],
        }
    }

    pub fn more(child: Hash) -> Self {
        TrieEntry {
            kind: EntryKind::More,
            hash: child,
            ..Self::none()
        }
    }

    pub fn item(value: Hash) -> Self {
        TrieEntry {
            kind: EntryKind::Item,
            hash: value,
            ..Self::none()
        }
    }

    /// A leaf carrying auxiliary bytes (e.g. a chunk index)
    pub fn item_with_aux(value: Hash, aux: &[u8]) -> Result<Self, TrieError> {
        if aux.len() > AUX_SIZE {
            return Err(TrieError::Malformed(format!(
                "aux data too long: {} > {}",
                aux.len(),
                AUX_SIZE
            )));
        }
        let mut entry = Self::item(value);
        entry.aux[..aux.len()].copy_from_slice(aux);
        entry.aux_len = aux.len() as u8;
        Ok(entry)
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn aux(&self) -> &[u8] {
        &self.aux[..self.aux_len as usize]
    }

    pub fn is_none(&self) -> bool {
        self.kind == EntryKind::None
    }

    pub fn is_item(&self) -> bool {
        self.kind == EntryKind::Item
    }

    pub fn is_more(&self) -> bool {
        self.kind == EntryKind::More
    }

    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), ENTRY_SIZE);
        out[..HASH_SIZE].copy_from_slice(self.hash.as_bytes());
        out[KIND_OFFSET] = match self.kind {
            EntryKind::None => TAG_NONE,
            EntryKind::More => TAG_MORE,
            EntryKind::Item => TAG_ITEM,
        };
        out[AUX_LEN_OFFSET] = self.aux_len;
        out[AUX_OFFSET..].copy_from_slice(&self.aux);
    }

    pub fn read_from(buf: &[u8]) -> Result<Self, TrieError> {
        if buf.len() != ENTRY_SIZE {
            return Err(TrieError::Malformed(format!(
                "entry must be {} bytes, got {}",
                ENTRY_SIZE,
                buf.len()
            )));
        }
        let kind = match buf[KIND_OFFSET] {
            TAG_NONE => return Ok(Self::none()),
            TAG_MORE => EntryKind::More,
            TAG_ITEM => EntryKind::Item,
            TAG_OVERFLOW => {
                return Err(TrieError::Malformed(
                    "overflow entries are not supported".to_string(),
                ))
            }
            tag => return Err(TrieError::Malformed(format!("unknown entry tag {}", tag))),
        };
        let aux_len = buf[AUX_LEN_OFFSET];
        if aux_len as usize > AUX_SIZE {
            return Err(TrieError::Malformed(format!(
                "entry aux length {} out of range",
                aux_len
            )));
        }
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&buf[..HASH_SIZE]);
        let mut aux = [0u8; AUX_SIZE];
        aux.copy_from_slice(&buf[AUX_OFFSET..]);
        Ok(TrieEntry {
            kind,
            hash: hash.into(),
            aux_len,
            aux,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(entry: &TrieEntry) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        entry.write_to(&mut buf);
        buf
    }

    #[test]
    fn test_entry_layout() {
        let hash = Hash::digest(b"chunk");
        let entry = TrieEntry::item_with_aux(hash, &7u64.to_le_bytes()).unwrap();
        let buf = encode(&entry);

        assert_eq!(&buf[..32], hash.as_bytes());
        assert_eq!(buf[32], TAG_ITEM);
        assert_eq!(buf[33], 8);
        assert_eq!(&buf[34..42], &7u64.to_le_bytes());
        assert_eq!(TrieEntry::read_from(&buf).unwrap(), entry);
        assert_eq!(entry.aux(), &7u64.to_le_bytes());
    }

    #[test]
    fn test_none_is_all_zero() {
        assert_eq!(encode(&TrieEntry::none()), [0u8; ENTRY_SIZE]);
        assert!(TrieEntry::read_from(&[0u8; ENTRY_SIZE]).unwrap().is_none());
    }

    #[test]
    fn test_overflow_rejected() {
        let mut buf = encode(&TrieEntry::more(Hash::digest(b"x")));
        buf[32] = TAG_OVERFLOW;
        assert!(matches!(
            TrieEntry::read_from(&buf),
            Err(TrieError::Malformed(_))
        ));
        buf[32] = 9;
        assert!(TrieEntry::read_from(&buf).is_err());
    }

    #[test]
    fn test_aux_too_long() {
        assert!(TrieEntry::item_with_aux(Hash::zero(), &[0u8; AUX_SIZE + 1]).is_err());
        assert!(TrieEntry::item_with_aux(Hash::zero(), &[0u8; AUX_SIZE]).is_ok());
    }
}
