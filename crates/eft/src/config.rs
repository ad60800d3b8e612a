use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::Key;
use crate::ledger::TMP_DIR_NAME;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Everything needed to open a store
///
/// ```toml
/// dir = "/var/lib/eft"
/// key = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
/// sync_writes = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store directory; holds `blocks/`, `snaps/`, `added`, `lock` and `tmp/`
    pub dir: PathBuf,
    /// Key every block is encrypted with, hex encoded
    pub key: Key,
    /// Where the collector puts its mark list (defaults to `<dir>/tmp`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    /// fsync block and snapshot files before renaming them into place
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,
    /// Derive nonces from block contents so identical blocks are stored once
    #[serde(default)]
    pub dedup: bool,
}

fn default_sync_writes() -> bool {
    true
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>, key: Key) -> Self {
        StoreConfig {
            dir: dir.into(),
            key,
            scratch_dir: None,
            sync_writes: default_sync_writes(),
            dedup: false,
        }
    }

    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(scratch_dir.into());
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| self.dir.join(TMP_DIR_NAME))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
