//! Conflict resolution for tree merges
//!
//! When two roots being merged hold different items at the same path, a
//! [`ConflictResolver`] decides which one the merged tree keeps.
//!
//! # Built-in Strategies
//!
//! - **[`LastWriteWins`]**: newer modification time wins (the default)
//! - **[`BaseWins`]**: the base side always wins
//! - **[`ConflictFile`]**: the base keeps the path and the incoming item is
//!   re-homed to `<name>@<timestamp>`
//!
//! Implement [`ConflictResolver`] for anything else.

use std::path::Path;

use crate::crypto::Hash;
use crate::item::ItemInfo;

/// Two different items stored at the same path
#[derive(Debug, Clone)]
pub struct Conflict {
    pub path: String,
    /// Item hash and header on the base side
    pub base: (Hash, ItemInfo),
    /// Item hash and header on the incoming side
    pub incoming: (Hash, ItemInfo),
}

impl Conflict {
    pub fn new(base: (Hash, ItemInfo), incoming: (Hash, ItemInfo)) -> Self {
        Conflict {
            path: base.1.path.clone(),
            base,
            incoming,
        }
    }

    pub fn base_info(&self) -> &ItemInfo {
        &self.base.1
    }

    pub fn incoming_info(&self) -> &ItemInfo {
        &self.incoming.1
    }

    /// Both sides carry the same bytes (only metadata differs)
    pub fn same_content(&self) -> bool {
        self.base.1.item_type == self.incoming.1.item_type
            && self.base.1.content_hash == self.incoming.1.content_hash
    }

    /// Whether the incoming item is the newer write
    ///
    /// Ties on mtime are broken by the larger content hash, so both peers
    /// of a sync pick the same winner.
    pub fn incoming_is_newer(&self) -> bool {
        let base = self.base_info();
        let incoming = self.incoming_info();
        (incoming.mtime, incoming.content_hash) > (base.mtime, base.content_hash)
    }
}

/// Resolution decision for a conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    UseBase,
    UseIncoming,
    /// Keep the base at the path and store the incoming item at `new_path`
    RenameIncoming { new_path: String },
}

/// A conflict together with how it was resolved
#[derive(Debug, Clone)]
pub struct ResolvedConflict {
    pub conflict: Conflict,
    pub resolution: Resolution,
}

pub trait ConflictResolver: std::fmt::Debug + Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> Resolution;
}

/// Newer modification time wins
#[derive(Debug, Clone, Default)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn resolve(&self, conflict: &Conflict) -> Resolution {
        if conflict.incoming_is_newer() {
            Resolution::UseIncoming
        } else {
            Resolution::UseBase
        }
    }
}

/// The base side always wins
#[derive(Debug, Clone, Default)]
pub struct BaseWins;

impl ConflictResolver for BaseWins {
    fn resolve(&self, _conflict: &Conflict) -> Resolution {
        Resolution::UseBase
    }
}

/// Keep both versions of a file
///
/// The base keeps the original path; the incoming version moves to
/// `<stem>@<mtime secs>.<ext>`. Directories, links and conflicts where only
/// metadata differs fall back to [`LastWriteWins`].
///
/// # Example
///
/// If `/docs/report.txt` conflicts:
/// - base version stays at `/docs/report.txt`
/// - incoming version becomes `/docs/report@1700000000.txt`
#[derive(Debug, Clone, Default)]
pub struct ConflictFile;

impl ConflictFile {
    /// Format: `<stem>@<timestamp>.<ext>` or `<stem>@<timestamp>` if there is
    /// no extension
    pub fn conflict_path(path: &str, timestamp: u64) -> String {
        with_stem_suffix(path, &format!("@{}", timestamp))
    }

    /// Format: `<stem>-<n>.<ext>`, used when a conflict path is taken
    pub fn numbered_path(path: &str, n: u32) -> String {
        with_stem_suffix(path, &format!("-{}", n))
    }
}

fn with_stem_suffix(path: &str, suffix: &str) -> String {
    let path = Path::new(path);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext),
        None => format!("{}{}", stem, suffix),
    };

    match path.parent().and_then(|p| p.to_str()) {
        Some("") | None => name,
        Some("/") => format!("/{}", name),
        Some(parent) => format!("{}/{}", parent, name),
    }
}

impl ConflictResolver for ConflictFile {
    fn resolve(&self, conflict: &Conflict) -> Resolution {
        let incoming = conflict.incoming_info();
        if !incoming.is_file() || !conflict.base_info().is_file() || conflict.same_content() {
            return LastWriteWins.resolve(conflict);
        }
        let secs = incoming.mtime / 1_000_000_000;
        Resolution::RenameIncoming {
            new_path: Self::conflict_path(&conflict.path, secs),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn item(path: &str, content: &[u8], mtime: u64) -> (Hash, ItemInfo) {
        let mut info = ItemInfo::file(path, content.len() as u64);
        info.mtime = mtime;
        info.content_hash = Hash::digest(content);
        (Hash::digest(path.as_bytes()), info)
    }

    #[test]
    fn test_last_write_wins() {
        let older = item("/a.txt", b"old", 10);
        let newer = item("/a.txt", b"new", 20);

        let conflict = Conflict::new(older.clone(), newer.clone());
        assert_eq!(LastWriteWins.resolve(&conflict), Resolution::UseIncoming);

        let conflict = Conflict::new(newer, older);
        assert_eq!(LastWriteWins.resolve(&conflict), Resolution::UseBase);
    }

    #[test]
    fn test_last_write_wins_tie_is_symmetric() {
        let a = item("/a.txt", b"one", 10);
        let b = item("/a.txt", b"two", 10);
        let forward = LastWriteWins.resolve(&Conflict::new(a.clone(), b.clone()));
        let backward = LastWriteWins.resolve(&Conflict::new(b, a));
        // exactly one side wins in both directions
        assert_ne!(forward, backward);
    }

    #[test]
    fn test_base_wins() {
        let conflict = Conflict::new(item("/a", b"1", 1), item("/a", b"2", 2));
        assert_eq!(BaseWins.resolve(&conflict), Resolution::UseBase);
    }

    #[test]
    fn test_conflict_file() {
        let conflict = Conflict::new(
            item("/docs/report.txt", b"mine", 5_000_000_000),
            item("/docs/report.txt", b"theirs", 1_700_000_000_000_000_000),
        );
        assert_eq!(
            ConflictFile.resolve(&conflict),
            Resolution::RenameIncoming {
                new_path: "/docs/report@1700000000.txt".to_string()
            }
        );

        // same bytes: nothing to preserve
        let conflict = Conflict::new(item("/x", b"same", 1), item("/x", b"same", 2));
        assert_eq!(ConflictFile.resolve(&conflict), Resolution::UseIncoming);
    }

    #[test]
    fn test_conflict_path() {
        assert_eq!(ConflictFile::conflict_path("/a/b.tar", 7), "/a/b@7.tar");
        assert_eq!(ConflictFile::conflict_path("/README", 7), "/README@7");
        assert_eq!(ConflictFile::conflict_path("notes.md", 7), "notes@7.md");
        assert_eq!(
            ConflictFile::numbered_path("/notes@200.txt", 2),
            "/notes@200-2.txt"
        );
        assert_eq!(ConflictFile::numbered_path("/README@7", 1), "/README@7-1");
    }
}
