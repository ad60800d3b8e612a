use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::ops::Deref;
use std::path::Path;

use crate::crypto::Hash;

/// An unordered set of unique block hashes
///
/// Describes "blocks required" (e.g. what a remote fetch still needs) or
/// "blocks unique to one tree".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSet(HashSet<Hash>);

impl Deref for BlockSet {
    type Target = HashSet<Hash>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<Hash> for BlockSet {
    fn from_iter<I: IntoIterator<Item = Hash>>(iter: I) -> Self {
        BlockSet(iter.into_iter().collect())
    }
}

impl IntoIterator for BlockSet {
    type Item = Hash;
    type IntoIter = std::collections::hash_set::IntoIter<Hash>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl BlockSet {
    pub fn new() -> Self {
        BlockSet(HashSet::new())
    }

    /// Insert a single hash, returning whether it was new
    pub fn insert(&mut self, hash: Hash) -> bool {
        self.0.insert(hash)
    }

    pub fn remove(&mut self, hash: &Hash) -> bool {
        self.0.remove(hash)
    }

    pub fn extend<I>(&mut self, hashes: I)
    where
        I: IntoIterator<Item = Hash>,
    {
        self.0.extend(hashes)
    }

    /// Hashes in `self` that are not in `other`
    pub fn difference(&self, other: &BlockSet) -> BlockSet {
        self.0.difference(&other.0).copied().collect()
    }

    /// The hashes in ascending byte order
    pub fn to_sorted_vec(&self) -> Vec<Hash> {
        let mut hashes: Vec<Hash> = self.0.iter().copied().collect();
        hashes.sort();
        hashes
    }

    /// Write the set as one hex hash per line
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(fs::File::create(path)?);
        for hash in self.to_sorted_vec() {
            writeln!(out, "{}", hash)?;
        }
        out.flush()
    }

    /// Read a file of one hex hash per line, ignoring blank lines
    pub fn read_from(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(fs::File::open(path)?);
        let mut set = BlockSet::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let hash = Hash::from_hex(&line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            set.insert(hash);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_semantics() {
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");

        let mut set = BlockSet::new();
        assert!(set.insert(a));
        assert!(!set.insert(a));
        set.extend([b, a]);
        assert_eq!(set.len(), 2);

        let only_a: BlockSet = [a].into_iter().collect();
        let diff = set.difference(&only_a);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains(&b));
    }

    #[test]
    fn test_hex_lines_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("set");

        let set: BlockSet = (0..10u8).map(|i| Hash::digest(&[i])).collect();
        set.write_to(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 10);
        assert_eq!(BlockSet::read_from(&path).unwrap(), set);
    }
}
