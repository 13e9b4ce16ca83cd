//! Content-addressed block storage
//!
//! Blocks are keyed by the SHA-256 of their bytes, computed by the store on
//! every put. Two files sharing a block never store its bytes twice.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::block::Block;
use crate::error::SurfError;
use crate::hash::ContentHash;

/// Deduplicating block storage shared by concurrent clients.
pub trait BlockStore: Send + Sync {
    /// Fetch a block by hash.
    ///
    /// # Errors
    /// Returns [`SurfError::NotFound`] if no block has this hash.
    fn get(&self, hash: &ContentHash) -> Result<Block, SurfError>;

    /// Store a block under its recomputed hash. Re-storing identical content
    /// succeeds without changing anything.
    ///
    /// # Errors
    /// Returns an error only if the backend fails.
    fn put(&self, block: Block) -> Result<ContentHash, SurfError>;

    /// Return the elements of `hashes` that are present. Order is not
    /// significant; duplicates in the input are reported once.
    ///
    /// # Errors
    /// Returns an error only if the backend fails.
    fn has_blocks(&self, hashes: &[ContentHash]) -> Result<Vec<ContentHash>, SurfError>;
}

/// In-memory block store using per-shard locking.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<ContentHash, Block>,
}

impl MemoryBlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blocks held
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn get(&self, hash: &ContentHash) -> Result<Block, SurfError> {
        self.blocks
            .get(hash)
            .map(|entry| entry.value().clone())
            .ok_or(SurfError::NotFound(*hash))
    }

    fn put(&self, block: Block) -> Result<ContentHash, SurfError> {
        let hash = block.hash();
        self.blocks.entry(hash).or_insert(block);
        Ok(hash)
    }

    fn has_blocks(&self, hashes: &[ContentHash]) -> Result<Vec<ContentHash>, SurfError> {
        let mut seen = HashSet::new();
        Ok(hashes
            .iter()
            .filter(|h| self.blocks.contains_key(*h) && seen.insert(**h))
            .copied()
            .collect())
    }
}
