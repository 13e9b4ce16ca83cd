//! Errors surfaced by the stores and remote operations

use crate::hash::ContentHash;

/// Error returned by [`BlockStore`](crate::BlockStore),
/// [`MetaStore`](crate::MetaStore) and [`SurfClient`](crate::SurfClient)
/// operations.
///
/// `VersionConflict` is the only variant a caller is expected to recover
/// from; everything else aborts a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SurfError {
    #[error("block {0} not found")]
    NotFound(ContentHash),

    #[error("version conflict on {filename}: stored version is {current}")]
    VersionConflict { filename: String, current: u64 },

    #[error("invalid filename {0:?}")]
    InvalidFilename(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid hash {0}")]
    InvalidHash(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Lmdb(#[from] heed::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SurfError {
    /// Stored version carried by a conflict, if this is one
    #[must_use]
    pub fn conflict_version(&self) -> Option<u64> {
        match self {
            Self::VersionConflict { current, .. } => Some(*current),
            _ => None,
        }
    }
}
