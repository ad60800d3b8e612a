use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::crypto::Hash;
use crate::ledger::{is_stale, owned_name, TMP_DIR_NAME};

pub const ROOTS_DIR_NAME: &str = "roots";

/// Per-job root markers under `tmp/roots/<pid>-<uuid>/`
///
/// Each marker is an empty file named after a root hash. The collector
/// treats every marked root as live, so blocks written by a job that does
/// not hold the exclusive lock survive until the job ends. Dropping the
/// markers removes the job directory.
#[derive(Debug)]
pub struct RootMarkers {
    dir: PathBuf,
}

impl RootMarkers {
    pub fn create(store_dir: &Path) -> io::Result<Self> {
        let dir = roots_dir(store_dir).join(owned_name(&Uuid::new_v4()));
        fs::create_dir_all(&dir)?;
        Ok(RootMarkers { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn protect(&self, root: &Hash) -> io::Result<()> {
        fs::write(self.dir.join(root.to_hex()), b"")
    }
}

impl Drop for RootMarkers {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("RootMarkers::drop: failed to remove {:?}: {}", self.dir, e);
            }
        }
    }
}

pub fn roots_dir(store_dir: &Path) -> PathBuf {
    store_dir.join(TMP_DIR_NAME).join(ROOTS_DIR_NAME)
}

/// Remove the marker directories of jobs whose process is gone
///
/// The caller holds the exclusive lock. Returns the number removed.
pub fn remove_stale(store_dir: &Path) -> io::Result<usize> {
    let jobs = match fs::read_dir(roots_dir(store_dir)) {
        Ok(jobs) => jobs,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for job in jobs {
        let job = job?.path();
        let stale = job
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(is_stale);
        if stale && job.is_dir() {
            tracing::warn!("remove_stale: removing markers of dead job {:?}", job);
            fs::remove_dir_all(&job)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Every root currently marked by any job, including jobs of other
/// processes and stale markers left by crashed ones
pub fn marked_roots(store_dir: &Path) -> io::Result<Vec<Hash>> {
    let mut roots = Vec::new();
    let jobs = match fs::read_dir(roots_dir(store_dir)) {
        Ok(jobs) => jobs,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(roots),
        Err(e) => return Err(e),
    };
    for job in jobs {
        let job = job?.path();
        if !job.is_dir() {
            continue;
        }
        let markers = match fs::read_dir(&job) {
            Ok(markers) => markers,
            // job finished while we were listing
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for marker in markers {
            let name = marker?.file_name();
            if let Some(hash) = name.to_str().and_then(|n| Hash::from_hex(n).ok()) {
                roots.push(hash);
            }
        }
    }
    roots.sort();
    roots.dedup();
    Ok(roots)
}
