//! blocksync-core: Core sync engine
//!
//! Provides content hashing, fixed-size chunking, the block and metadata
//! stores, the local index, the wire protocol and the client sync engine.

pub mod block;
pub mod block_store;
pub mod chunker;
pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod index;
pub mod lmdb;
pub mod meta;
pub mod meta_store;
pub mod protocol;
pub mod scan;
pub mod sync;
pub mod sync_state;

pub use block::Block;
pub use block_store::{BlockStore, MemoryBlockStore};
pub use chunker::{ChunkConfig, DEFAULT_BLOCK_SIZE};
pub use client::SurfClient;
pub use config::ClientConfig;
pub use error::SurfError;
pub use hash::ContentHash;
pub use index::LocalIndex;
pub use lmdb::{LmdbBlockStore, LmdbMetaStore};
pub use meta::{BlockHashList, BlockStoreMap, Catalog, FileMetaData};
pub use meta_store::{MemoryMetaStore, MetaStore};
pub use protocol::{Message, ProtocolReader, ProtocolWriter};
pub use scan::{LocalFiles, Scanner};
pub use sync::{SyncEngine, SyncReport};
