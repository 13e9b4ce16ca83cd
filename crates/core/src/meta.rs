//! File metadata as tracked by the catalog and the local index

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::CONFIG_FILE;
use crate::error::SurfError;
use crate::hash::ContentHash;
use crate::index::{INDEX_FILE, TEMP_PREFIX};

/// Textual sentinel that marks a tombstone in hash lists
pub const TOMBSTONE_HASH: &str = "0";

/// Snapshot of the catalog: filename -> metadata
pub type Catalog = BTreeMap<String, FileMetaData>;

/// Placement hint: block store address -> hashes it should hold
pub type BlockStoreMap = BTreeMap<String, Vec<ContentHash>>;

/// Ordered block hashes of a file, or the deletion marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockHashList {
    Blocks(Vec<ContentHash>),
    Tombstone,
}

impl BlockHashList {
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone)
    }

    /// Hashes in byte order; empty for tombstones
    #[must_use]
    pub fn hashes(&self) -> &[ContentHash] {
        match self {
            Self::Blocks(hashes) => hashes,
            Self::Tombstone => &[],
        }
    }

    /// Parse the space separated form used by the index file
    ///
    /// # Errors
    /// Returns an error if any token is neither the tombstone sentinel nor a
    /// hex digest, or if the sentinel is mixed with real hashes.
    pub fn parse(text: &str) -> Result<Self, SurfError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            [TOMBSTONE_HASH] => Ok(Self::Tombstone),
            tokens => tokens
                .iter()
                .map(|t| ContentHash::from_hex(t))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Blocks),
        }
    }
}

impl fmt::Display for BlockHashList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tombstone => f.write_str(TOMBSTONE_HASH),
            Self::Blocks(hashes) => {
                for (i, hash) in hashes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{hash}")?;
                }
                Ok(())
            }
        }
    }
}

/// Catalog entry for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    pub filename: String,
    pub version: u64,
    pub block_hash_list: BlockHashList,
}

impl FileMetaData {
    #[must_use]
    pub fn new(filename: impl Into<String>, version: u64, hashes: Vec<ContentHash>) -> Self {
        Self {
            filename: filename.into(),
            version,
            block_hash_list: BlockHashList::Blocks(hashes),
        }
    }

    #[must_use]
    pub fn tombstone(filename: impl Into<String>, version: u64) -> Self {
        Self {
            filename: filename.into(),
            version,
            block_hash_list: BlockHashList::Tombstone,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.block_hash_list.is_tombstone()
    }

    /// Check the invariants a store enforces before accepting a candidate
    ///
    /// # Errors
    /// Returns an error for an unusable filename, a zero version, or a
    /// version with no successor.
    pub fn validate(&self) -> Result<(), SurfError> {
        validate_filename(&self.filename)?;
        if self.version == 0 {
            return Err(SurfError::InvalidMetadata(format!(
                "{}: version must be at least 1",
                self.filename
            )));
        }
        if self.version == u64::MAX {
            return Err(SurfError::InvalidMetadata(format!(
                "{}: version {} leaves no room for another update",
                self.filename, self.version
            )));
        }
        Ok(())
    }
}

/// Characters that would break the index line format or escape the flat
/// namespace.
const RESERVED_CHARS: [char; 5] = [',', '/', '\n', '\r', '\0'];

/// Names a client keeps for itself in the working directory: the index, the
/// config file and in-flight temp files. They are never synchronized.
#[must_use]
pub fn is_reserved_name(name: &str) -> bool {
    name == INDEX_FILE || name == CONFIG_FILE || name.starts_with(TEMP_PREFIX)
}

/// Check that a filename can live in the flat namespace and the index format.
///
/// # Errors
/// Returns [`SurfError::InvalidFilename`] for empty names, `.`/`..`, names
/// containing `,`, `/`, line breaks or NUL, and reserved client files.
pub fn validate_filename(name: &str) -> Result<(), SurfError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(RESERVED_CHARS)
        || is_reserved_name(name)
    {
        return Err(SurfError::InvalidFilename(name.to_string()));
    }
    Ok(())
}
