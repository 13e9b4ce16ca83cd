//! Scanning the flat working directory into chunked file metadata

use std::collections::HashMap;
use std::path::PathBuf;

use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use tracing::{debug, warn};

use crate::block::Block;
use crate::chunker::{ChunkConfig, chunk_file};
use crate::hash::ContentHash;
use crate::meta::{Catalog, FileMetaData, is_reserved_name, validate_filename};

/// Result of scanning a working directory
#[derive(Debug, Default)]
pub struct LocalFiles {
    /// Every tracked file at provisional version 1
    pub files: Catalog,
    /// Block payloads of the scanned files, by hash
    pub blocks: HashMap<ContentHash, Block>,
}

impl LocalFiles {
    /// Total number of distinct blocks
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Total bytes across distinct blocks
    #[must_use]
    pub fn block_bytes(&self) -> u64 {
        self.blocks.values().map(|b| b.size as u64).sum()
    }
}

/// Scanner for a flat working directory.
///
/// Subdirectories, symlinks and reserved files are skipped.
pub struct Scanner {
    root: PathBuf,
    config: ChunkConfig,
}

impl Scanner {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, config: ChunkConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Whether a directory entry name is owned by blocksync itself
    #[must_use]
    pub fn is_reserved(name: &str) -> bool {
        is_reserved_name(name)
    }

    /// Scan the directory, chunking every tracked file
    ///
    /// # Errors
    /// Returns an error if the directory or a file cannot be read
    pub fn scan(&self) -> Result<LocalFiles> {
        let mut local = LocalFiles::default();

        let entries = std::fs::read_dir(&self.root)
            .wrap_err_with(|| format!("failed to read {}", self.root.display()))?;

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let Ok(name) = entry.file_name().into_string() else {
                warn!("Skipping non UTF-8 filename {:?}", entry.file_name());
                continue;
            };
            if Self::is_reserved(&name) {
                continue;
            }
            if validate_filename(&name).is_err() {
                warn!("Skipping {name:?}: filename contains a reserved character");
                continue;
            }

            let blocks = chunk_file(&entry.path(), self.config)
                .wrap_err_with(|| format!("failed to chunk {name}"))?;
            debug!("Chunked {name} into {} blocks", blocks.len());

            let mut hashes = Vec::with_capacity(blocks.len());
            for (hash, block) in blocks {
                hashes.push(hash);
                local.blocks.entry(hash).or_insert(block);
            }
            local
                .files
                .insert(name.clone(), FileMetaData::new(name, 1, hashes));
        }

        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;
    use crate::index::{INDEX_FILE, TEMP_PREFIX};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_simple_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file1.txt"), "hello").unwrap();
        fs::write(dir.path().join("file2.txt"), "world").unwrap();

        let local = Scanner::new(dir.path(), ChunkConfig::default()).scan().unwrap();

        assert_eq!(local.files.len(), 2);
        let meta = &local.files["file1.txt"];
        assert_eq!(meta.version, 1);
        assert_eq!(
            meta.block_hash_list.hashes(),
            &[ContentHash::from_bytes(b"hello")]
        );
    }

    #[test]
    fn test_scan_skips_reserved_and_nested() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(INDEX_FILE), "").unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "block_size = 8").unwrap();
        fs::write(dir.path().join(format!("{TEMP_PREFIX}abc")), "partial").unwrap();
        fs::write(dir.path().join("a,b.txt"), "comma").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "nested").unwrap();
        fs::write(dir.path().join("keep.txt"), "keep").unwrap();

        let local = Scanner::new(dir.path(), ChunkConfig::default()).scan().unwrap();
        let names: Vec<_> = local.files.keys().cloned().collect();
        assert_eq!(names, vec!["keep.txt".to_string()]);
    }

    #[test]
    fn test_shared_blocks_deduplicated() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), "samesame").unwrap();
        fs::write(dir.path().join("b"), "samesame").unwrap();
        fs::write(dir.path().join("empty"), "").unwrap();

        let local = Scanner::new(dir.path(), ChunkConfig::new(4).unwrap())
            .scan()
            .unwrap();

        assert_eq!(local.files["a"].block_hash_list.hashes().len(), 2);
        assert_eq!(
            local.files["a"].block_hash_list,
            local.files["b"].block_hash_list
        );
        assert!(local.files["empty"].block_hash_list.hashes().is_empty());
        // "same" twice across two files is a single block
        assert_eq!(local.block_count(), 1);
        assert_eq!(local.block_bytes(), 4);
    }
}
