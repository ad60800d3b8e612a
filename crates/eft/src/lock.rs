//! Store-wide reader/writer lock
//!
//! Two layers compose into one lock per store directory:
//!
//! - an in-process [`parking_lot::RwLock`] looked up in a global registry by
//!   canonical directory path, so every handle on the same directory in this
//!   process shares it
//! - an OS advisory `flock(2)` on `<dir>/lock`, which excludes other
//!   processes; the exclusive holder writes its pid into the file
//!
//! The in-process layer is taken first, so a process never contends with
//! itself on the file lock.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};

pub const LOCK_FILE_NAME: &str = "lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("failed to lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers, no writer
    Shared,
    /// One writer, no readers
    Exclusive,
}

/// Live locks by canonical directory; an entry goes away with the last
/// handle or guard on its lock
type Registry = Mutex<HashMap<PathBuf, Weak<RwLock<()>>>>;

fn registry() -> &'static Registry {
    static LOCKS: OnceLock<Registry> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Handle on the lock of one store directory
#[derive(Debug, Clone)]
pub struct StoreLock {
    dir: PathBuf,
    path: PathBuf,
    local: Arc<RwLock<()>>,
}

impl StoreLock {
    pub fn new(dir: &Path) -> Result<Self, LockError> {
        let dir = fs::canonicalize(dir).map_err(|source| LockError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut locks = registry().lock();
        locks.retain(|_, lock| lock.strong_count() > 0);
        let local = match locks.get(&dir).and_then(Weak::upgrade) {
            Some(local) => local,
            None => {
                let local = Arc::new(RwLock::new(()));
                locks.insert(dir.clone(), Arc::downgrade(&local));
                local
            }
        };
        Ok(StoreLock {
            path: dir.join(LOCK_FILE_NAME),
            dir,
            local,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held in `mode`
    pub fn acquire(&self, mode: LockMode) -> Result<LockGuard, LockError> {
        tracing::debug!("StoreLock::acquire: waiting for {:?} lock on {:?}", mode, self.path);
        let local = match mode {
            LockMode::Shared => LocalGuard::Shared(self.local.read_arc()),
            LockMode::Exclusive => LocalGuard::Exclusive(self.local.write_arc()),
        };
        let file = self.lock_file(mode).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!("StoreLock::acquire: holding {:?} lock on {:?}", mode, self.path);
        Ok(LockGuard {
            file,
            mode,
            _local: local,
        })
    }

    pub fn shared(&self) -> Result<LockGuard, LockError> {
        self.acquire(LockMode::Shared)
    }

    pub fn exclusive(&self) -> Result<LockGuard, LockError> {
        self.acquire(LockMode::Exclusive)
    }

    fn lock_file(&self, mode: LockMode) -> io::Result<File> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        flock(&file, mode)?;
        if mode == LockMode::Exclusive {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            writeln!(file, "{}", std::process::id())?;
        }
        Ok(file)
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let mut locks = registry().lock();
        // no other handle or guard shares the lock
        if Arc::strong_count(&self.local) == 1 {
            locks.remove(&self.dir);
        }
    }
}

enum LocalGuard {
    Shared(#[allow(dead_code)] ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(#[allow(dead_code)] ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// A held store lock; released on drop
pub struct LockGuard {
    file: File,
    mode: LockMode,
    // released after the file lock
    _local: LocalGuard,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("mode", &self.mode).finish()
    }
}

impl LockGuard {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_exclusive(&self) -> bool {
        self.mode == LockMode::Exclusive
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = funlock(&self.file) {
            tracing::warn!("LockGuard::drop: failed to release file lock: {}", e);
        }
    }
}

#[cfg(unix)]
fn flock(file: &File, mode: LockMode) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };
    loop {
        // SAFETY: the descriptor is owned by `file` and open for the call
        let ret = unsafe { libc::flock(file.as_raw_fd(), op) };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn funlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: as above
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _mode: LockMode) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn funlock(_file: &File) -> io::Result<()> {
    Ok(())
}
