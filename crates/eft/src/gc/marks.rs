use std::io::{BufWriter, Write};
use std::mem::size_of;
use std::path::Path;

use memmap2::MmapMut;

use crate::block::BlockStore;
use crate::crypto::{Hash, HASH_SIZE};

use super::GcError;

/// One scanned block: its hash and whether a live root reaches it
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct MarkEntry {
    hash: [u8; HASH_SIZE],
    mark: u8,
}

pub const MARK_RECORD_SIZE: usize = HASH_SIZE + 1;

const _: () = assert!(size_of::<MarkEntry>() == MARK_RECORD_SIZE);

/// Sorted, memory-mapped list of every block on disk
///
/// The list lives in an anonymous temp file in the scratch directory, so
/// its size is bounded by disk rather than memory. Lookups are binary
/// searches over the sorted records.
#[derive(Debug)]
pub struct MarkList {
    map: Option<MmapMut>,
    len: usize,
    marked: usize,
}

impl MarkList {
    /// Scan the block directory into a fresh, sorted, unmarked list
    pub fn scan(blocks: &BlockStore, scratch_dir: &Path) -> Result<Self, GcError> {
        let file = tempfile::tempfile_in(scratch_dir)?;
        let mut out = BufWriter::new(file);
        let mut len = 0usize;
        blocks.for_each_hash(|hash| {
            out.write_all(hash.as_bytes())?;
            out.write_all(&[0])?;
            len += 1;
            Ok::<_, GcError>(())
        })?;
        let file = out.into_inner().map_err(|e| e.into_error())?;

        // zero-length maps are rejected on some platforms
        if len == 0 {
            return Ok(MarkList {
                map: None,
                len,
                marked: 0,
            });
        }
        // SAFETY: the file is an unlinked temp file private to this list;
        // nothing else can truncate or remap it.
        let map = unsafe { MmapMut::map_mut(&file)? };
        let mut list = MarkList {
            map: Some(map),
            len,
            marked: 0,
        };
        list.entries_mut()
            .sort_unstable_by(|a, b| a.hash.cmp(&b.hash));
        tracing::debug!("MarkList::scan: {} blocks", len);
        Ok(list)
    }

    /// Number of scanned blocks
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of blocks marked so far
    pub fn marked(&self) -> usize {
        self.marked
    }

    /// Mark `hash` live
    ///
    /// Returns `false` if it was already marked. A hash that was not
    /// scanned is a reference to a block that does not exist.
    pub fn mark(&mut self, hash: &Hash) -> Result<bool, GcError> {
        let index = self
            .find(hash)
            .ok_or(GcError::MissingBlock { hash: *hash })?;
        let entry = &mut self.entries_mut()[index];
        if entry.mark != 0 {
            return Ok(false);
        }
        entry.mark = 1;
        self.marked += 1;
        Ok(true)
    }

    pub fn is_marked(&self, hash: &Hash) -> bool {
        self.find(hash)
            .map(|index| self.entries()[index].mark != 0)
            .unwrap_or(false)
    }

    /// Every scanned hash that was never marked, in ascending order
    pub fn unmarked(&self) -> Vec<Hash> {
        self.entries()
            .iter()
            .filter(|entry| entry.mark == 0)
            .map(|entry| Hash::from(entry.hash))
            .collect()
    }

    fn find(&self, hash: &Hash) -> Option<usize> {
        self.entries()
            .binary_search_by(|entry| entry.hash.cmp(hash.as_bytes()))
            .ok()
    }

    fn entries(&self) -> &[MarkEntry] {
        match &self.map {
            // SAFETY: MarkEntry is repr(C) over bytes only (alignment 1, no
            // padding, every bit pattern valid) and the map holds exactly
            // `len` records.
            Some(map) => unsafe {
                std::slice::from_raw_parts(map.as_ptr().cast::<MarkEntry>(), self.len)
            },
            None => &[],
        }
    }

    fn entries_mut(&mut self) -> &mut [MarkEntry] {
        match &mut self.map {
            // SAFETY: as in `entries`; the map is borrowed mutably for the
            // lifetime of the slice.
            Some(map) => unsafe {
                std::slice::from_raw_parts_mut(map.as_mut_ptr().cast::<MarkEntry>(), self.len)
            },
            None => &mut [],
        }
    }
}
