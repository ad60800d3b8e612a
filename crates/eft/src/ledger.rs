use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::crypto::Hash;

pub const TMP_DIR_NAME: &str = "tmp";
/// Append-only log of blocks added since the last checkpoint
pub const ADDED_FILE_NAME: &str = "added";
/// Unreachable blocks as of the last checkpoint
pub const DEAD_FILE_NAME: &str = "dead";
const LEDGER_PREFIX: &str = "added-";

/// A temporary list of the blocks one writer has created
///
/// Every hash is written through to `tmp/added-<pid>-<uuid>` as soon as its
/// block exists, so a crashed writer leaves a record of what it wrote (see
/// [`recover_stale`]). The ledger ends
/// either appended to the store's `added` log (commit) or deleted along with
/// the blocks it lists (rollback).
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    writer: BufWriter<File>,
    count: usize,
}

impl Ledger {
    pub fn create(store_dir: &Path) -> io::Result<Self> {
        let tmp = store_dir.join(TMP_DIR_NAME);
        fs::create_dir_all(&tmp)?;
        let path = tmp.join(format!(
            "{}{}",
            LEDGER_PREFIX,
            owned_name(&Uuid::new_v4())
        ));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Ledger {
            path,
            writer: BufWriter::new(file),
            count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of hashes recorded
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn record(&mut self, hash: &Hash) -> io::Result<()> {
        writeln!(self.writer, "{}", hash.to_hex())?;
        self.writer.flush()?;
        self.count += 1;
        Ok(())
    }

    /// Every recorded hash, in write order
    pub fn hashes(&mut self) -> io::Result<Vec<Hash>> {
        self.writer.flush()?;
        read_hashes(&self.path)
    }

    /// Append the recorded hashes to `log` and delete the ledger
    pub fn append_to(mut self, log: &Path, sync: bool) -> io::Result<()> {
        self.writer.flush()?;
        if self.count > 0 {
            let mut out = OpenOptions::new().create(true).append(true).open(log)?;
            io::copy(&mut File::open(&self.path)?, &mut out)?;
            if sync {
                out.sync_all()?;
            }
        }
        self.discard()
    }

    pub fn discard(self) -> io::Result<()> {
        let Ledger { path, writer, .. } = self;
        drop(writer);
        remove_if_exists(&path)
    }
}

/// `<pid>-<uuid>`: a temp name tagged with the process that owns it
pub(crate) fn owned_name(id: &Uuid) -> String {
    format!("{}-{}", std::process::id(), id)
}

/// The owning pid of a name made by [`owned_name`]
pub(crate) fn owner_pid(name: &str) -> Option<u32> {
    let (pid, id) = name.split_once('-')?;
    Uuid::parse_str(id).ok()?;
    pid.parse().ok()
}

/// Whether the owner of a temp name is gone
///
/// Names owned by this process are never stale: another handle in this
/// process may still be using them.
pub(crate) fn is_stale(name: &str) -> bool {
    match owner_pid(name) {
        Some(pid) => pid != std::process::id() && !process_alive(pid),
        None => false,
    }
}

/// Fold the ledgers of crashed writers into the `added` log
///
/// The blocks they list are kept: a writer can die after publishing roots
/// but before appending its ledger. Whatever is unreachable is left to the
/// collector. A torn last line is dropped. The caller holds the exclusive
/// lock. Returns the number of ledgers recovered.
pub fn recover_stale(store_dir: &Path, sync: bool) -> io::Result<usize> {
    let entries = match fs::read_dir(store_dir.join(TMP_DIR_NAME)) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut recovered = 0;
    for entry in entries {
        let path = entry?.path();
        let stale = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(LEDGER_PREFIX))
            .is_some_and(is_stale);
        if !stale || !path.is_file() {
            continue;
        }
        let hashes: Vec<Hash> = BufReader::new(File::open(&path)?)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| Hash::from_hex(line.trim()).ok())
            .collect();
        if !hashes.is_empty() {
            let mut out = OpenOptions::new()
                .create(true)
                .append(true)
                .open(store_dir.join(ADDED_FILE_NAME))?;
            for hash in &hashes {
                writeln!(out, "{}", hash.to_hex())?;
            }
            if sync {
                out.sync_all()?;
            }
        }
        remove_if_exists(&path)?;
        tracing::warn!(
            "recover_stale: recovered {} blocks from {:?}",
            hashes.len(),
            path
        );
        recovered += 1;
    }
    Ok(recovered)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let pid = match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 0 => pid,
        _ => return false,
    };
    // SAFETY: signal 0 only checks that the process exists
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Read a file of hex hashes, one per line; blank lines are skipped
pub fn read_hashes(path: &Path) -> io::Result<Vec<Hash>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut hashes = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let hash = Hash::from_hex(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        hashes.push(hash);
    }
    Ok(hashes)
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_record_and_append() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join(ADDED_FILE_NAME);

        let mut first = Ledger::create(temp.path()).unwrap();
        first.record(&Hash::digest(b"1")).unwrap();
        first.record(&Hash::digest(b"2")).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(
            first.hashes().unwrap(),
            vec![Hash::digest(b"1"), Hash::digest(b"2")]
        );
        let first_path = first.path().to_path_buf();
        first.append_to(&log, false).unwrap();
        assert!(!first_path.exists());

        let mut second = Ledger::create(temp.path()).unwrap();
        second.record(&Hash::digest(b"3")).unwrap();
        second.append_to(&log, false).unwrap();

        assert_eq!(
            read_hashes(&log).unwrap(),
            vec![Hash::digest(b"1"), Hash::digest(b"2"), Hash::digest(b"3")]
        );
    }

    /// A pid that no longer belongs to a running process
    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_record_is_written_through() {
        let temp = TempDir::new().unwrap();
        let mut ledger = Ledger::create(temp.path()).unwrap();
        ledger.record(&Hash::digest(b"1")).unwrap();
        // readable from the file without going through the ledger
        assert_eq!(read_hashes(ledger.path()).unwrap(), vec![Hash::digest(b"1")]);
    }

    #[test]
    fn test_owner_pid() {
        let id = Uuid::new_v4();
        assert_eq!(owner_pid(&owned_name(&id)), Some(std::process::id()));
        assert_eq!(owner_pid("not-a-ledger"), None);
        assert_eq!(owner_pid(&id.to_string()), None);
        assert!(!is_stale(&owned_name(&id)));
    }

    #[test]
    fn test_recover_stale() {
        let temp = TempDir::new().unwrap();
        let mut live = Ledger::create(temp.path()).unwrap();
        live.record(&Hash::digest(b"live")).unwrap();

        let crashed = temp
            .path()
            .join(TMP_DIR_NAME)
            .join(format!("added-{}-{}", dead_pid(), Uuid::new_v4()));
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        fs::write(&crashed, format!("{}\n{}\n3f0", a.to_hex(), b.to_hex())).unwrap();

        assert_eq!(recover_stale(temp.path(), false).unwrap(), 1);
        assert!(!crashed.exists());
        assert!(live.path().exists());
        assert_eq!(
            read_hashes(&temp.path().join(ADDED_FILE_NAME)).unwrap(),
            vec![a, b]
        );
        assert_eq!(recover_stale(temp.path(), false).unwrap(), 0);
    }

    #[test]
    fn test_discard() {
        let temp = TempDir::new().unwrap();
        let mut ledger = Ledger::create(temp.path()).unwrap();
        ledger.record(&Hash::digest(b"x")).unwrap();
        let path = ledger.path().to_path_buf();
        ledger.discard().unwrap();
        assert!(!path.exists());
        assert!(read_hashes(&temp.path().join(ADDED_FILE_NAME))
            .unwrap()
            .is_empty());
    }
}
