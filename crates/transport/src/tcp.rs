//! TCP transport
//!
//! One framed connection to the metadata server, plus one lazily dialed
//! connection per block store address the placement map names. A block
//! store that shares the metadata server's address reuses its connection.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::{BufReader, BufWriter};
use std::net::TcpStream;

use blocksync_core::{
    Block, BlockStoreMap, Catalog, ContentHash, FileMetaData, Message, ProtocolReader,
    ProtocolWriter, SurfClient, SurfError,
};
use tracing::{debug, warn};

/// One request/response connection
struct Connection {
    addr: String,
    reader: ProtocolReader<BufReader<TcpStream>>,
    writer: ProtocolWriter<BufWriter<TcpStream>>,
}

impl Connection {
    fn open(addr: &str) -> Result<Self, SurfError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let read_half = stream.try_clone()?;
        debug!("Connected to {addr}");

        Ok(Self {
            addr: addr.to_string(),
            reader: ProtocolReader::new(BufReader::new(read_half)),
            writer: ProtocolWriter::new(BufWriter::new(stream)),
        })
    }

    /// Send a request and wait for its response
    fn call(&mut self, request: &Message) -> Result<Message, SurfError> {
        self.writer.send(request)?;
        match self.reader.read_message()? {
            Message::Error(reason) => Err(SurfError::Remote(format!("{}: {reason}", self.addr))),
            response => Ok(response),
        }
    }
}

fn unexpected(request: &str, response: &Message) -> SurfError {
    SurfError::Protocol(format!(
        "unexpected {} response to {request}",
        response.name()
    ))
}

/// Client for `blocksync-server` over TCP
pub struct TcpClient {
    meta: Connection,
    block_conns: HashMap<String, Connection>,
}

impl TcpClient {
    /// Connect to the metadata server
    ///
    /// # Errors
    /// Returns an error if the server cannot be reached.
    pub fn connect(meta_addr: &str) -> Result<Self, SurfError> {
        Ok(Self {
            meta: Connection::open(meta_addr)?,
            block_conns: HashMap::new(),
        })
    }

    /// Address of the metadata server
    #[must_use]
    pub fn meta_addr(&self) -> &str {
        &self.meta.addr
    }

    fn block_conn(&mut self, addr: &str) -> Result<&mut Connection, SurfError> {
        if addr == self.meta.addr {
            return Ok(&mut self.meta);
        }
        match self.block_conns.entry(addr.to_string()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => Ok(e.insert(Connection::open(addr)?)),
        }
    }

    /// Close every connection politely
    ///
    /// # Errors
    /// Returns an error if the metadata server does not acknowledge.
    pub fn shutdown(mut self) -> Result<(), SurfError> {
        for (addr, mut conn) in self.block_conns.drain() {
            if let Err(e) = conn.call(&Message::Shutdown) {
                warn!("Block store {addr} did not acknowledge shutdown: {e}");
            }
        }
        match self.meta.call(&Message::Shutdown)? {
            Message::Ok => Ok(()),
            other => Err(unexpected("Shutdown", &other)),
        }
    }
}

impl SurfClient for TcpClient {
    fn get_block(&mut self, hash: &ContentHash, store_addr: &str) -> Result<Block, SurfError> {
        match self
            .block_conn(store_addr)?
            .call(&Message::GetBlock { hash: *hash })?
        {
            Message::Block(data) => Ok(Block::new(data)),
            Message::NotFound(missing) => Err(SurfError::NotFound(missing)),
            other => Err(unexpected("GetBlock", &other)),
        }
    }

    fn put_block(&mut self, block: &Block, store_addr: &str) -> Result<ContentHash, SurfError> {
        let request = Message::PutBlock {
            data: block.data.clone(),
        };
        match self.block_conn(store_addr)?.call(&request)? {
            Message::Stored(hash) => Ok(hash),
            other => Err(unexpected("PutBlock", &other)),
        }
    }

    fn has_blocks(
        &mut self,
        hashes: &[ContentHash],
        store_addr: &str,
    ) -> Result<Vec<ContentHash>, SurfError> {
        let request = Message::HasBlocks {
            hashes: hashes.to_vec(),
        };
        match self.block_conn(store_addr)?.call(&request)? {
            Message::Hashes(present) => Ok(present),
            other => Err(unexpected("HasBlocks", &other)),
        }
    }

    fn get_file_info_map(&mut self) -> Result<Catalog, SurfError> {
        match self.meta.call(&Message::GetFileInfoMap)? {
            Message::FileInfoMap(catalog) => Ok(catalog),
            other => Err(unexpected("GetFileInfoMap", &other)),
        }
    }

    fn update_file(&mut self, meta: &FileMetaData) -> Result<u64, SurfError> {
        match self.meta.call(&Message::UpdateFile(meta.clone()))? {
            Message::Version(version) => Ok(version),
            Message::Conflict { current } => Err(SurfError::VersionConflict {
                filename: meta.filename.clone(),
                current,
            }),
            other => Err(unexpected("UpdateFile", &other)),
        }
    }

    fn get_block_store_map(&mut self, hashes: &[ContentHash]) -> Result<BlockStoreMap, SurfError> {
        let request = Message::GetBlockStoreMap {
            hashes: hashes.to_vec(),
        };
        match self.meta.call(&request)? {
            Message::BlockStoreMap(map) => Ok(map),
            other => Err(unexpected("GetBlockStoreMap", &other)),
        }
    }
}
