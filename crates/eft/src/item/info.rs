use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::crypto::{Hash, HASH_SIZE};

use super::ItemError;

/// Size of the packed [`ItemInfo`] header
pub const INFO_SIZE: usize = 2048;

const TYPE_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = 1;
const SIZE_OFFSET: usize = 8;
const MTIME_OFFSET: usize = 16;
const CONTENT_HASH_OFFSET: usize = 32;
const MODIFIED_BY_OFFSET: usize = CONTENT_HASH_OFFSET + HASH_SIZE;
const PATH_OFFSET: usize = 320;

/// Maximum encoded length of the attribution string
pub const MODIFIED_BY_MAX: usize = PATH_OFFSET - MODIFIED_BY_OFFSET - 2;
/// Maximum encoded length of an item path
pub const PATH_MAX: usize = INFO_SIZE - PATH_OFFSET - 2;

const FLAG_EXECUTABLE: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    File,
    Dir,
    Link,
}

impl ItemType {
    fn tag(self) -> u8 {
        match self {
            ItemType::File => 1,
            ItemType::Dir => 2,
            ItemType::Link => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, ItemError> {
        match tag {
            1 => Ok(ItemType::File),
            2 => Ok(ItemType::Dir),
            3 => Ok(ItemType::Link),
            tag => Err(ItemError::Malformed(format!("unknown item type {}", tag))),
        }
    }
}

/// Metadata stored in front of every item's content
///
/// Packed layout (little endian):
///
/// | offset | size | field                              |
/// |--------|------|------------------------------------|
/// | 0      | 1    | type (1 file, 2 dir, 3 link)       |
/// | 1      | 1    | flags (bit 0: executable)          |
/// | 8      | 8    | size in bytes                      |
/// | 16     | 8    | mtime, ns since the Unix epoch     |
/// | 32     | 32   | SHA-256 of the content             |
/// | 64     | 2+254| attribution, length prefixed       |
/// | 320    | 2+1726| path, length prefixed             |
///
/// Everything else is zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub item_type: ItemType,
    pub executable: bool,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub mtime: u64,
    /// Filled in by [`put_item`](super::put_item)
    pub content_hash: Hash,
    pub path: String,
    /// Who last modified the item (device or user name)
    pub modified_by: String,
}

impl ItemInfo {
    pub fn new(item_type: ItemType, path: impl Into<String>, size: u64) -> Self {
        ItemInfo {
            item_type,
            executable: false,
            size,
            mtime: 0,
            content_hash: Hash::zero(),
            path: path.into(),
            modified_by: String::new(),
        }
    }

    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self::new(ItemType::File, path, size)
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self::new(ItemType::Dir, path, 0)
    }

    /// A symlink; its content is the link target
    pub fn link(path: impl Into<String>, target: &str) -> Self {
        Self::new(ItemType::Link, path, target.len() as u64)
    }

    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self
    }

    pub fn with_executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    pub fn with_modified_by(mut self, modified_by: impl Into<String>) -> Self {
        self.modified_by = modified_by.into();
        self
    }

    pub fn mtime(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.mtime)
    }

    pub fn is_file(&self) -> bool {
        self.item_type == ItemType::File
    }

    pub fn is_dir(&self) -> bool {
        self.item_type == ItemType::Dir
    }

    /// The same item re-homed under `path`
    pub fn renamed(&self, path: impl Into<String>) -> Self {
        ItemInfo {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Key of this item in a path trie
    pub fn path_key(&self) -> Hash {
        path_key(&self.path)
    }

    pub fn to_bytes(&self) -> Result<[u8; INFO_SIZE], ItemError> {
        let mut buf = [0u8; INFO_SIZE];
        buf[TYPE_OFFSET] = self.item_type.tag();
        if self.executable {
            buf[FLAGS_OFFSET] |= FLAG_EXECUTABLE;
        }
        buf[SIZE_OFFSET..SIZE_OFFSET + 8].copy_from_slice(&self.size.to_le_bytes());
        buf[MTIME_OFFSET..MTIME_OFFSET + 8].copy_from_slice(&self.mtime.to_le_bytes());
        buf[CONTENT_HASH_OFFSET..CONTENT_HASH_OFFSET + HASH_SIZE]
            .copy_from_slice(self.content_hash.as_bytes());
        write_window(
            &mut buf,
            MODIFIED_BY_OFFSET,
            MODIFIED_BY_MAX,
            "modified_by",
            &self.modified_by,
        )?;
        write_window(&mut buf, PATH_OFFSET, PATH_MAX, "path", &self.path)?;
        Ok(buf)
    }

    /// Decode a header; `buf` may be longer than [`INFO_SIZE`]
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ItemError> {
        if buf.len() < INFO_SIZE {
            return Err(ItemError::Malformed(format!(
                "item header needs {} bytes, got {}",
                INFO_SIZE,
                buf.len()
            )));
        }
        let item_type = ItemType::from_tag(buf[TYPE_OFFSET])?;
        let flags = buf[FLAGS_OFFSET];
        let size = read_u64(buf, SIZE_OFFSET);
        let mtime = read_u64(buf, MTIME_OFFSET);
        let content_hash = Hash::try_from(&buf[CONTENT_HASH_OFFSET..CONTENT_HASH_OFFSET + HASH_SIZE])
            .map_err(|e| ItemError::Malformed(e.to_string()))?;
        let modified_by = read_window(buf, MODIFIED_BY_OFFSET, MODIFIED_BY_MAX, "modified_by")?;
        let path = read_window(buf, PATH_OFFSET, PATH_MAX, "path")?;
        Ok(ItemInfo {
            item_type,
            executable: flags & FLAG_EXECUTABLE != 0,
            size,
            mtime,
            content_hash,
            path,
            modified_by,
        })
    }
}

/// Key of `path` in a path trie
pub fn path_key(path: &str) -> Hash {
    Hash::digest(path.as_bytes())
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn write_window(
    buf: &mut [u8],
    offset: usize,
    max: usize,
    field: &'static str,
    value: &str,
) -> Result<(), ItemError> {
    let bytes = value.as_bytes();
    if bytes.len() > max {
        return Err(ItemError::FieldTooLong {
            field,
            len: bytes.len(),
            max,
        });
    }
    buf[offset..offset + 2].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf[offset + 2..offset + 2 + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn read_window(
    buf: &[u8],
    offset: usize,
    max: usize,
    field: &'static str,
) -> Result<String, ItemError> {
    let len = u16::from_le_bytes([buf[offset], buf[offset + 1]]) as usize;
    if len > max {
        return Err(ItemError::FieldTooLong { field, len, max });
    }
    String::from_utf8(buf[offset + 2..offset + 2 + len].to_vec())
        .map_err(|_| ItemError::Malformed(format!("{} is not valid utf-8", field)))
}
