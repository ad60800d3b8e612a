use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::crypto::Hash;

pub const SNAPS_DIR_NAME: &str = "snaps";
/// The snapshot local mutations apply to
pub const MAIN: &str = "main";
/// The snapshot fetched from a remote peer
pub const REMOTE: &str = "remote";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("snapshot i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid snapshot name: {0:?}")]
    InvalidName(String),
    #[error("snapshot {name} is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

/// The `snaps/` directory: one file per named root, holding its hex hash
#[derive(Debug, Clone)]
pub struct Snapshots {
    dir: PathBuf,
    sync_writes: bool,
}

impl Snapshots {
    pub fn open(store_dir: &Path, sync_writes: bool) -> Result<Self, SnapshotError> {
        let dir = store_dir.join(SNAPS_DIR_NAME);
        fs::create_dir_all(&dir)?;
        Ok(Snapshots { dir, sync_writes })
    }

    /// Names may not be empty, start with a dot, or contain a separator
    pub fn check_name(name: &str) -> Result<(), SnapshotError> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.chars().any(char::is_control)
        {
            return Err(SnapshotError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<Hash>, SnapshotError> {
        Self::check_name(name)?;
        let contents = match fs::read_to_string(self.dir.join(name)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Hash::from_hex(&contents)
            .map(Some)
            .map_err(|e| SnapshotError::Malformed {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Every named root
    pub fn load(&self) -> Result<BTreeMap<String, Hash>, SnapshotError> {
        let mut roots = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            // leftovers of an interrupted write
            if Self::check_name(&name).is_err() {
                continue;
            }
            if let Some(hash) = self.get(&name)? {
                roots.insert(name, hash);
            }
        }
        Ok(roots)
    }

    /// Point `name` at `root`, replacing the file atomically
    pub fn set(&self, name: &str, root: &Hash) -> Result<(), SnapshotError> {
        Self::check_name(name)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".snap-")
            .tempfile_in(&self.dir)?;
        writeln!(tmp, "{}", root.to_hex())?;
        if self.sync_writes {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(self.dir.join(name))
            .map_err(|e| SnapshotError::Io(e.error))?;
        Ok(())
    }

    /// Returns false if there was no such snapshot
    pub fn remove(&self, name: &str) -> Result<bool, SnapshotError> {
        Self::check_name(name)?;
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
