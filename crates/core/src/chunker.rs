//! Fixed-size chunking

use std::path::Path;

use crate::block::Block;
use crate::hash::ContentHash;
use crate::protocol::MAX_FRAME_LEN;

/// Block size used when nothing else is configured
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Largest block that still fits in one protocol frame
pub const MAX_BLOCK_SIZE: usize = MAX_FRAME_LEN as usize;

/// Configuration for fixed-size chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChunkConfig {
    /// Size of every block except possibly the last one
    pub block_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl ChunkConfig {
    /// # Errors
    /// Returns an error if `block_size` is zero or larger than
    /// [`MAX_BLOCK_SIZE`].
    pub fn new(block_size: usize) -> color_eyre::Result<Self> {
        color_eyre::eyre::ensure!(block_size > 0, "block size must be positive");
        color_eyre::eyre::ensure!(
            block_size <= MAX_BLOCK_SIZE,
            "block size {block_size} exceeds the {MAX_BLOCK_SIZE}-byte frame limit"
        );
        Ok(Self { block_size })
    }
}

/// A fixed-size chunk with its location and hash
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Chunk {
    /// Byte offset in the source data
    pub offset: u64,
    /// Length of this chunk in bytes
    pub length: u32,
    /// SHA-256 hash of the chunk content
    pub hash: ContentHash,
}

/// Split data into consecutive blocks of `config.block_size` bytes.
///
/// Returns an iterator over chunks. Empty input yields no chunks.
pub fn chunk_data(data: &[u8], config: ChunkConfig) -> impl Iterator<Item = Chunk> + '_ {
    let block_size = config.block_size.clamp(1, MAX_BLOCK_SIZE);
    data.chunks(block_size).enumerate().map(move |(i, piece)| Chunk {
        offset: (i * block_size) as u64,
        length: piece.len() as u32,
        hash: ContentHash::from_bytes(piece),
    })
}

/// Read a file and split it into owned blocks in byte order.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn chunk_file(path: &Path, config: ChunkConfig) -> color_eyre::Result<Vec<(ContentHash, Block)>> {
    let data = bytes::Bytes::from(std::fs::read(path)?);
    let blocks = chunk_data(&data, config)
        .map(|chunk| {
            let start = chunk.offset as usize;
            let end = start + chunk.length as usize;
            (chunk.hash, Block::new(data.slice(start..end)))
        })
        .collect();
    Ok(blocks)
}
