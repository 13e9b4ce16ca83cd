//! Local index: the last catalog state this client synchronized
//!
//! Stored as `index.txt` in the working directory, one line per file:
//!
//! ```text
//! <filename>,<version>,<hash> <hash> ...
//! ```
//!
//! A deleted file keeps a line whose hash list is `0`. Filenames may not
//! contain `,`, `/` or line breaks (see [`validate_filename`]); the scanner
//! never tracks such files, so they never reach the index.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write as _;
use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, eyre};

use crate::meta::{BlockHashList, Catalog, FileMetaData, validate_filename};

/// Name of the index file inside the working directory
pub const INDEX_FILE: &str = "index.txt";

/// Prefix of in-flight temp files in the working directory
pub const TEMP_PREFIX: &str = ".blocksync-tmp";

/// One line of the index file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry(pub FileMetaData);

impl IndexEntry {
    /// Parse a single line (without its newline)
    ///
    /// # Errors
    /// Returns an error if a field is missing, the version is not a positive
    /// integer, the filename is unusable or a hash is malformed.
    pub fn parse(line: &str) -> Result<Self> {
        let mut fields = line.splitn(3, ',');
        let (Some(filename), Some(version), Some(hashes)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(eyre!("expected `filename,version,hashes`"));
        };

        validate_filename(filename)?;
        let version: u64 = version
            .trim()
            .parse()
            .wrap_err_with(|| format!("bad version {version:?}"))?;
        let block_hash_list = BlockHashList::parse(hashes)?;

        let meta = FileMetaData {
            filename: filename.to_string(),
            version,
            block_hash_list,
        };
        meta.validate()?;
        Ok(Self(meta))
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.0.filename, self.0.version, self.0.block_hash_list
        )
    }
}

/// The last-synced catalog as seen by this client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIndex {
    /// filename -> metadata at last sync
    pub files: BTreeMap<String, FileMetaData>,
}

impl LocalIndex {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index that mirrors a catalog snapshot
    #[must_use]
    pub fn from_catalog(catalog: Catalog) -> Self {
        Self { files: catalog }
    }

    /// Load the index from a working directory, or return an empty index if
    /// there is none yet.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(root: &Path) -> Result<Self> {
        let index_path = root.join(INDEX_FILE);

        if !index_path.exists() {
            return Ok(Self::new());
        }

        let text = std::fs::read_to_string(&index_path)
            .wrap_err_with(|| format!("failed to read {}", index_path.display()))?;
        Self::parse(&text).wrap_err_with(|| format!("failed to parse {}", index_path.display()))
    }

    /// Parse index text
    ///
    /// # Errors
    /// Returns an error naming the first malformed line.
    pub fn parse(text: &str) -> Result<Self> {
        let mut files = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let IndexEntry(meta) =
                IndexEntry::parse(line).wrap_err_with(|| format!("line {}", lineno + 1))?;
            files.insert(meta.filename.clone(), meta);
        }
        Ok(Self { files })
    }

    /// Write the index, replacing any previous one atomically.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, root: &Path) -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(root)?;
        tmp.write_all(self.to_string().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(root.join(INDEX_FILE))
            .map_err(|e| e.error)
            .wrap_err("failed to replace index file")?;
        Ok(())
    }

    /// Get the synced state for a file
    #[must_use]
    pub fn get(&self, filename: &str) -> Option<&FileMetaData> {
        self.files.get(filename)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl fmt::Display for LocalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for meta in self.files.values() {
            writeln!(f, "{}", IndexEntry(meta.clone()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;

    fn sample() -> LocalIndex {
        let mut index = LocalIndex::new();
        let h1 = ContentHash::from_bytes(b"one");
        let h2 = ContentHash::from_bytes(b"two");
        for meta in [
            FileMetaData::new("a.txt", 3, vec![h1, h2]),
            FileMetaData::new("empty", 1, Vec::new()),
            FileMetaData::tombstone("gone.txt", 5),
            FileMetaData::new("with space.md", 2, vec![h2]),
        ] {
            index.files.insert(meta.filename.clone(), meta);
        }
        index
    }

    #[test]
    fn test_index_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample();

        index.save(dir.path()).unwrap();
        let loaded = LocalIndex::load(dir.path()).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_index_line_format() {
        let h1 = ContentHash::from_bytes(b"one");
        let line = IndexEntry(FileMetaData::new("a.txt", 3, vec![h1])).to_string();
        assert_eq!(line, format!("a.txt,3,{h1}"));

        let tomb = IndexEntry(FileMetaData::tombstone("b.txt", 2)).to_string();
        assert_eq!(tomb, "b.txt,2,0");
    }

    #[test]
    fn test_missing_index_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalIndex::load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_save_replaces_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        sample().save(dir.path()).unwrap();
        LocalIndex::new().save(dir.path()).unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join(INDEX_FILE)).unwrap(), "");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
    }

    #[test]
    fn test_trailing_space_lines_parse() {
        let h1 = ContentHash::from_bytes(b"one");
        let index = LocalIndex::parse(&format!("a.txt,1,{h1} \n")).unwrap();
        assert_eq!(index.get("a.txt").unwrap().block_hash_list.hashes(), &[h1]);
    }

    #[test]
    fn test_parse_error_names_line() {
        let text = "ok.txt,1,\nbroken line\n";
        let err = LocalIndex::parse(text).unwrap_err();
        assert!(format!("{err:?}").contains("line 2"), "{err:?}");

        assert!(LocalIndex::parse("a.txt,zero,\n").is_err());
        assert!(LocalIndex::parse("a.txt,1,nothex\n").is_err());
    }

    #[test]
    fn test_parse_rejects_unusable_entries() {
        assert!(LocalIndex::parse(&format!("a.txt,{},0\n", u64::MAX)).is_err());
        assert!(LocalIndex::parse("index.txt,1,0\n").is_err());
        assert!(LocalIndex::parse(".blocksync.toml,2,0\n").is_err());
    }
}
