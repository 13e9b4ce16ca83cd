//! Remote operations consumed by the sync engine

use crate::block::Block;
use crate::error::SurfError;
use crate::hash::ContentHash;
use crate::meta::{BlockStoreMap, Catalog, FileMetaData};

/// The fixed set of remote calls a sync run makes.
///
/// Every call blocks until the response arrives. Implementations live in
/// `blocksync-transport` (in-process and TCP).
pub trait SurfClient {
    /// Fetch one block from the store at `store_addr`.
    ///
    /// # Errors
    /// [`SurfError::NotFound`] if the store does not hold the block.
    fn get_block(&mut self, hash: &ContentHash, store_addr: &str) -> Result<Block, SurfError>;

    /// Upload one block; the store computes and returns its hash.
    ///
    /// # Errors
    /// Transport or backend failure.
    fn put_block(&mut self, block: &Block, store_addr: &str) -> Result<ContentHash, SurfError>;

    /// Which of `hashes` the store at `store_addr` already holds.
    ///
    /// # Errors
    /// Transport or backend failure.
    fn has_blocks(
        &mut self,
        hashes: &[ContentHash],
        store_addr: &str,
    ) -> Result<Vec<ContentHash>, SurfError>;

    /// Snapshot of the remote catalog.
    ///
    /// # Errors
    /// Transport or backend failure.
    fn get_file_info_map(&mut self) -> Result<Catalog, SurfError>;

    /// Commit metadata under optimistic concurrency control.
    ///
    /// # Errors
    /// [`SurfError::VersionConflict`] with the stored version when `meta` is
    /// not exactly one version ahead of it.
    fn update_file(&mut self, meta: &FileMetaData) -> Result<u64, SurfError>;

    /// Placement of `hashes` across the configured block stores.
    ///
    /// # Errors
    /// Transport or backend failure.
    fn get_block_store_map(&mut self, hashes: &[ContentHash]) -> Result<BlockStoreMap, SurfError>;
}
