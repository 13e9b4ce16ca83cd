//! Local in-process transport
//!
//! `LocalClient` calls the stores directly, without a network hop. Used by
//! tests and for syncing against stores owned by the same process.

use std::collections::HashMap;
use std::sync::Arc;

use blocksync_core::{
    Block, BlockStore, BlockStoreMap, Catalog, ContentHash, FileMetaData, MemoryBlockStore,
    MemoryMetaStore, MetaStore, SurfClient, SurfError,
};

/// In-process client over shared store handles
#[derive(Clone)]
pub struct LocalClient {
    block_stores: HashMap<String, Arc<dyn BlockStore>>,
    meta_store: Arc<dyn MetaStore>,
}

impl LocalClient {
    /// Client for a catalog with no block stores attached yet
    pub fn new(meta_store: Arc<dyn MetaStore>) -> Self {
        Self {
            block_stores: HashMap::new(),
            meta_store,
        }
    }

    /// Attach the block store reachable under `addr`
    #[must_use]
    pub fn with_block_store(mut self, addr: impl Into<String>, store: Arc<dyn BlockStore>) -> Self {
        self.block_stores.insert(addr.into(), store);
        self
    }

    /// Fresh in-memory catalog and block store advertised as `addr`
    pub fn in_memory(addr: &str) -> Self {
        let meta = Arc::new(MemoryMetaStore::new(vec![addr.to_string()]));
        Self::new(meta).with_block_store(addr, Arc::new(MemoryBlockStore::new()))
    }

    fn store(&self, addr: &str) -> Result<&Arc<dyn BlockStore>, SurfError> {
        self.block_stores
            .get(addr)
            .ok_or_else(|| SurfError::Remote(format!("no block store at {addr}")))
    }
}

impl SurfClient for LocalClient {
    fn get_block(&mut self, hash: &ContentHash, store_addr: &str) -> Result<Block, SurfError> {
        self.store(store_addr)?.get(hash)
    }

    fn put_block(&mut self, block: &Block, store_addr: &str) -> Result<ContentHash, SurfError> {
        self.store(store_addr)?.put(block.clone())
    }

    fn has_blocks(
        &mut self,
        hashes: &[ContentHash],
        store_addr: &str,
    ) -> Result<Vec<ContentHash>, SurfError> {
        self.store(store_addr)?.has_blocks(hashes)
    }

    fn get_file_info_map(&mut self) -> Result<Catalog, SurfError> {
        self.meta_store.catalog()
    }

    fn update_file(&mut self, meta: &FileMetaData) -> Result<u64, SurfError> {
        self.meta_store.update_file(meta.clone())
    }

    fn get_block_store_map(&mut self, hashes: &[ContentHash]) -> Result<BlockStoreMap, SurfError> {
        self.meta_store.block_store_map(hashes)
    }
}
