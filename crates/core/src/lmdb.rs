//! Persistent store backends on LMDB (via heed)
//!
//! Blocks are stored raw under their 32-byte hash. Catalog entries are stored
//! under the filename as rkyv archives. Each store owns its own environment
//! directory.

use std::collections::HashSet;
use std::path::Path;

use bytes::Bytes;
use heed::types::{Bytes as HeedBytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use tracing::debug;

use crate::block::Block;
use crate::block_store::BlockStore;
use crate::error::SurfError;
use crate::hash::ContentHash;
use crate::meta::{BlockHashList, BlockStoreMap, Catalog, FileMetaData};
use crate::meta_store::{MetaStore, check_version, place_blocks};

fn open_env(path: &Path, map_size: usize) -> Result<Env, SurfError> {
    std::fs::create_dir_all(path)?;

    // SAFETY: Standard LMDB memory-mapped I/O. The environment directory is
    // owned by this process for as long as the store is open.
    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(map_size)
            .max_dbs(1)
            .open(path)?
    };
    Ok(env)
}

/// Content-addressed block store using LMDB.
///
/// Key: hash (32 bytes)
/// Value: raw block bytes
pub struct LmdbBlockStore {
    env: Env,
    blocks: Database<HeedBytes, HeedBytes>,
}

impl LmdbBlockStore {
    /// Open or create a block store at the given path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or created.
    pub fn open(path: &Path) -> Result<Self, SurfError> {
        let env = open_env(path, 4 * 1024 * 1024 * 1024)?; // 4GB max

        let mut wtxn = env.write_txn()?;
        let blocks: Database<HeedBytes, HeedBytes> = env
            .database_options()
            .types::<HeedBytes, HeedBytes>()
            .name("blocks")
            .create(&mut wtxn)?;
        wtxn.commit()?;

        Ok(Self { env, blocks })
    }
}

impl BlockStore for LmdbBlockStore {
    fn get(&self, hash: &ContentHash) -> Result<Block, SurfError> {
        let rtxn = self.env.read_txn()?;
        let data = self
            .blocks
            .get(&rtxn, hash.as_bytes())?
            .ok_or(SurfError::NotFound(*hash))?;
        Ok(Block::new(Bytes::copy_from_slice(data)))
    }

    fn put(&self, block: Block) -> Result<ContentHash, SurfError> {
        let hash = block.hash();
        let mut wtxn = self.env.write_txn()?;

        if self.blocks.get(&wtxn, hash.as_bytes())?.is_some() {
            return Ok(hash);
        }

        self.blocks.put(&mut wtxn, hash.as_bytes(), &block.data)?;
        wtxn.commit()?;
        Ok(hash)
    }

    fn has_blocks(&self, hashes: &[ContentHash]) -> Result<Vec<ContentHash>, SurfError> {
        let rtxn = self.env.read_txn()?;
        let mut seen = HashSet::new();
        let mut present = Vec::new();
        for hash in hashes {
            if self.blocks.get(&rtxn, hash.as_bytes())?.is_some() && seen.insert(*hash) {
                present.push(*hash);
            }
        }
        Ok(present)
    }
}

/// Catalog entry as archived in LMDB
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
struct CatalogRecord {
    version: u64,
    tombstone: bool,
    hashes: Vec<[u8; 32]>,
}

impl CatalogRecord {
    fn from_meta(meta: &FileMetaData) -> Self {
        Self {
            version: meta.version,
            tombstone: meta.is_tombstone(),
            hashes: meta
                .block_hash_list
                .hashes()
                .iter()
                .map(|h| *h.as_bytes())
                .collect(),
        }
    }

    fn into_meta(self, filename: &str) -> FileMetaData {
        let block_hash_list = if self.tombstone {
            BlockHashList::Tombstone
        } else {
            BlockHashList::Blocks(self.hashes.into_iter().map(ContentHash::from_raw).collect())
        };
        FileMetaData {
            filename: filename.to_string(),
            version: self.version,
            block_hash_list,
        }
    }

    fn encode(&self) -> Result<AlignedVec, SurfError> {
        rkyv::to_bytes::<RkyvError>(self)
            .map_err(|e| SurfError::Archive(format!("failed to serialize catalog record: {e}")))
    }

    fn decode(bytes: &[u8]) -> Result<Self, SurfError> {
        // LMDB values carry no alignment guarantee
        let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);

        let archived = rkyv::access::<ArchivedCatalogRecord, RkyvError>(&aligned)
            .map_err(|e| SurfError::Archive(format!("failed to access catalog record: {e}")))?;
        rkyv::deserialize::<Self, RkyvError>(archived)
            .map_err(|e| SurfError::Archive(format!("failed to deserialize catalog record: {e}")))
    }
}

/// Catalog persisted in LMDB.
///
/// `update_file` runs its check-and-set inside a single write transaction.
/// LMDB admits one writer at a time, so this is a whole-catalog lock.
pub struct LmdbMetaStore {
    env: Env,
    files: Database<Str, HeedBytes>,
    block_stores: Vec<String>,
}

impl LmdbMetaStore {
    /// Open or create a catalog at the given path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or created.
    pub fn open(path: &Path, block_stores: Vec<String>) -> Result<Self, SurfError> {
        let env = open_env(path, 256 * 1024 * 1024)?; // 256MB max

        let mut wtxn = env.write_txn()?;
        let files: Database<Str, HeedBytes> = env
            .database_options()
            .types::<Str, HeedBytes>()
            .name("catalog")
            .create(&mut wtxn)?;
        wtxn.commit()?;

        Ok(Self {
            env,
            files,
            block_stores,
        })
    }
}

impl MetaStore for LmdbMetaStore {
    fn catalog(&self) -> Result<Catalog, SurfError> {
        let rtxn = self.env.read_txn()?;
        let mut catalog = Catalog::new();
        for entry in self.files.iter(&rtxn)? {
            let (filename, bytes) = entry?;
            let meta = CatalogRecord::decode(bytes)?.into_meta(filename);
            catalog.insert(filename.to_string(), meta);
        }
        Ok(catalog)
    }

    fn update_file(&self, candidate: FileMetaData) -> Result<u64, SurfError> {
        candidate.validate()?;

        let mut wtxn = self.env.write_txn()?;
        let stored = self
            .files
            .get(&wtxn, &candidate.filename)?
            .map(|bytes| CatalogRecord::decode(bytes).map(|r| r.into_meta(&candidate.filename)))
            .transpose()?;
        check_version(stored.as_ref(), &candidate)?;

        let record = CatalogRecord::from_meta(&candidate);
        self.files.put(&mut wtxn, &candidate.filename, &record.encode()?)?;
        wtxn.commit()?;

        debug!(file = %candidate.filename, version = candidate.version, "catalog commit");
        Ok(candidate.version)
    }

    fn block_store_map(&self, hashes: &[ContentHash]) -> Result<BlockStoreMap, SurfError> {
        Ok(place_blocks(hashes, &self.block_stores))
    }
}
