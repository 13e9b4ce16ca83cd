//! Binary protocol between sync clients and the block/meta server
//!
//! Wire format (all integers are big-endian):
//!
//! Request/Response frame:
//! ```text
//! +--------+--------+------------------+
//! | type   | length | payload          |
//! | 1 byte | 4 bytes| variable         |
//! +--------+--------+------------------+
//! ```
//!
//! Payload building blocks: strings are `len:2` + UTF-8, hashes are 32 raw
//! bytes, lists are `count:4` + items, versions are 8 bytes. File metadata is
//! `name, version:8, tombstone:1, count:4, hashes`.
//!
//! Requests:
//! - 0x01: GetBlock (hash)
//! - 0x02: PutBlock (data)
//! - 0x03: HasBlocks (count, hashes)
//! - 0x04: GetFileInfoMap (no payload)
//! - 0x05: UpdateFile (meta)
//! - 0x06: GetBlockStoreMap (count, hashes)
//! - 0x07: Shutdown (no payload)
//!
//! Responses:
//! - 0x81: Block (data)
//! - 0x82: Stored (hash)
//! - 0x83: Hashes (count, hashes)
//! - 0x84: FileInfoMap (count, metas)
//! - 0x85: Version (version)
//! - 0x86: Conflict (stored version)
//! - 0x87: NotFound (hash)
//! - 0x88: BlockStoreMap (count, (address, count, hashes)*)
//! - 0x89: Ok (no payload)
//! - 0x8F: Error (message)

use std::io::{Cursor, Read, Write};

use bytes::Bytes;

use crate::error::SurfError;
use crate::hash::ContentHash;
use crate::meta::{BlockHashList, BlockStoreMap, Catalog, FileMetaData};

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Message type identifiers
pub mod msg {
    pub const GET_BLOCK: u8 = 0x01;
    pub const PUT_BLOCK: u8 = 0x02;
    pub const HAS_BLOCKS: u8 = 0x03;
    pub const GET_FILE_INFO_MAP: u8 = 0x04;
    pub const UPDATE_FILE: u8 = 0x05;
    pub const GET_BLOCK_STORE_MAP: u8 = 0x06;
    pub const SHUTDOWN: u8 = 0x07;
    // Responses
    pub const BLOCK: u8 = 0x81;
    pub const STORED: u8 = 0x82;
    pub const HASHES: u8 = 0x83;
    pub const FILE_INFO_MAP: u8 = 0x84;
    pub const VERSION: u8 = 0x85;
    pub const CONFLICT: u8 = 0x86;
    pub const NOT_FOUND: u8 = 0x87;
    pub const BLOCK_STORE_MAP: u8 = 0x88;
    pub const OK: u8 = 0x89;
    pub const ERROR: u8 = 0x8F;
}

/// Message received from or sent over the protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    GetBlock { hash: ContentHash },
    PutBlock { data: Bytes },
    HasBlocks { hashes: Vec<ContentHash> },
    GetFileInfoMap,
    UpdateFile(FileMetaData),
    GetBlockStoreMap { hashes: Vec<ContentHash> },
    Shutdown,

    Block(Bytes),
    Stored(ContentHash),
    Hashes(Vec<ContentHash>),
    FileInfoMap(Catalog),
    Version(u64),
    /// Update rejected; carries the stored version
    Conflict { current: u64 },
    NotFound(ContentHash),
    BlockStoreMap(BlockStoreMap),
    Ok,
    Error(String),
}

impl Message {
    /// Wire type identifier
    #[must_use]
    pub fn type_id(&self) -> u8 {
        match self {
            Self::GetBlock { .. } => msg::GET_BLOCK,
            Self::PutBlock { .. } => msg::PUT_BLOCK,
            Self::HasBlocks { .. } => msg::HAS_BLOCKS,
            Self::GetFileInfoMap => msg::GET_FILE_INFO_MAP,
            Self::UpdateFile(_) => msg::UPDATE_FILE,
            Self::GetBlockStoreMap { .. } => msg::GET_BLOCK_STORE_MAP,
            Self::Shutdown => msg::SHUTDOWN,
            Self::Block(_) => msg::BLOCK,
            Self::Stored(_) => msg::STORED,
            Self::Hashes(_) => msg::HASHES,
            Self::FileInfoMap(_) => msg::FILE_INFO_MAP,
            Self::Version(_) => msg::VERSION,
            Self::Conflict { .. } => msg::CONFLICT,
            Self::NotFound(_) => msg::NOT_FOUND,
            Self::BlockStoreMap(_) => msg::BLOCK_STORE_MAP,
            Self::Ok => msg::OK,
            Self::Error(_) => msg::ERROR,
        }
    }

    /// Short name for log lines
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetBlock { .. } => "GetBlock",
            Self::PutBlock { .. } => "PutBlock",
            Self::HasBlocks { .. } => "HasBlocks",
            Self::GetFileInfoMap => "GetFileInfoMap",
            Self::UpdateFile(_) => "UpdateFile",
            Self::GetBlockStoreMap { .. } => "GetBlockStoreMap",
            Self::Shutdown => "Shutdown",
            Self::Block(_) => "Block",
            Self::Stored(_) => "Stored",
            Self::Hashes(_) => "Hashes",
            Self::FileInfoMap(_) => "FileInfoMap",
            Self::Version(_) => "Version",
            Self::Conflict { .. } => "Conflict",
            Self::NotFound(_) => "NotFound",
            Self::BlockStoreMap(_) => "BlockStoreMap",
            Self::Ok => "Ok",
            Self::Error(_) => "Error",
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, SurfError> {
        let mut buf = Vec::new();
        match self {
            Self::GetFileInfoMap | Self::Shutdown | Self::Ok => {}
            Self::GetBlock { hash } | Self::Stored(hash) | Self::NotFound(hash) => {
                buf.extend_from_slice(hash.as_bytes());
            }
            Self::PutBlock { data } | Self::Block(data) => buf.extend_from_slice(data),
            Self::HasBlocks { hashes }
            | Self::GetBlockStoreMap { hashes }
            | Self::Hashes(hashes) => encode_hashes(&mut buf, hashes)?,
            Self::UpdateFile(meta) => encode_meta(&mut buf, meta)?,
            Self::FileInfoMap(catalog) => {
                encode_count(&mut buf, catalog.len())?;
                for meta in catalog.values() {
                    encode_meta(&mut buf, meta)?;
                }
            }
            Self::Version(version) | Self::Conflict { current: version } => {
                buf.extend_from_slice(&version.to_be_bytes());
            }
            Self::BlockStoreMap(map) => {
                encode_count(&mut buf, map.len())?;
                for (addr, hashes) in map {
                    encode_str(&mut buf, addr)?;
                    encode_hashes(&mut buf, hashes)?;
                }
            }
            Self::Error(message) => buf.extend_from_slice(message.as_bytes()),
        }
        Ok(buf)
    }

    fn decode(msg_type: u8, payload: &[u8]) -> Result<Self, SurfError> {
        let mut r = Cursor::new(payload);

        let message = match msg_type {
            msg::GET_BLOCK => Self::GetBlock {
                hash: decode_hash(&mut r)?,
            },
            msg::PUT_BLOCK => Self::PutBlock {
                data: Bytes::copy_from_slice(payload),
            },
            msg::HAS_BLOCKS => Self::HasBlocks {
                hashes: decode_hashes(&mut r)?,
            },
            msg::GET_FILE_INFO_MAP => Self::GetFileInfoMap,
            msg::UPDATE_FILE => Self::UpdateFile(decode_meta(&mut r)?),
            msg::GET_BLOCK_STORE_MAP => Self::GetBlockStoreMap {
                hashes: decode_hashes(&mut r)?,
            },
            msg::SHUTDOWN => Self::Shutdown,

            msg::BLOCK => Self::Block(Bytes::copy_from_slice(payload)),
            msg::STORED => Self::Stored(decode_hash(&mut r)?),
            msg::HASHES => Self::Hashes(decode_hashes(&mut r)?),
            msg::FILE_INFO_MAP => {
                let count = decode_u32(&mut r)? as usize;
                let mut catalog = Catalog::new();
                for _ in 0..count {
                    let meta = decode_meta(&mut r)?;
                    catalog.insert(meta.filename.clone(), meta);
                }
                Self::FileInfoMap(catalog)
            }
            msg::VERSION => Self::Version(decode_u64(&mut r)?),
            msg::CONFLICT => Self::Conflict {
                current: decode_u64(&mut r)?,
            },
            msg::NOT_FOUND => Self::NotFound(decode_hash(&mut r)?),
            msg::BLOCK_STORE_MAP => {
                let count = decode_u32(&mut r)? as usize;
                let mut map = BlockStoreMap::new();
                for _ in 0..count {
                    let addr = decode_str(&mut r)?;
                    map.insert(addr, decode_hashes(&mut r)?);
                }
                Self::BlockStoreMap(map)
            }
            msg::OK => Self::Ok,
            msg::ERROR => Self::Error(String::from_utf8_lossy(payload).to_string()),

            _ => {
                return Err(SurfError::Protocol(format!(
                    "unknown message type: {msg_type:#04x}"
                )));
            }
        };

        // Raw payload messages consume everything by definition
        let raw = matches!(msg_type, msg::PUT_BLOCK | msg::BLOCK | msg::ERROR);
        if !raw && r.position() != payload.len() as u64 {
            return Err(SurfError::Protocol(format!(
                "{} bytes of trailing data in {}",
                payload.len() as u64 - r.position(),
                message.name()
            )));
        }
        Ok(message)
    }
}

/// Write a frame header (type + length)
fn write_header<W: Write>(w: &mut W, msg_type: u8, len: u32) -> std::io::Result<()> {
    w.write_all(&[msg_type])?;
    w.write_all(&len.to_be_bytes())?;
    Ok(())
}

/// Read a frame header, returns (type, length)
fn read_header<R: Read>(r: &mut R) -> std::io::Result<(u8, u32)> {
    let mut type_buf = [0u8; 1];
    r.read_exact(&mut type_buf)?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;

    Ok((type_buf[0], u32::from_be_bytes(len_buf)))
}

fn encode_count(buf: &mut Vec<u8>, count: usize) -> Result<(), SurfError> {
    let count = u32::try_from(count)
        .map_err(|_| SurfError::Protocol(format!("list of {count} items is too long")))?;
    buf.extend_from_slice(&count.to_be_bytes());
    Ok(())
}

fn encode_str(buf: &mut Vec<u8>, s: &str) -> Result<(), SurfError> {
    let len = u16::try_from(s.len())
        .map_err(|_| SurfError::Protocol(format!("string of {} bytes is too long", s.len())))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode_hashes(buf: &mut Vec<u8>, hashes: &[ContentHash]) -> Result<(), SurfError> {
    encode_count(buf, hashes.len())?;
    for hash in hashes {
        buf.extend_from_slice(hash.as_bytes());
    }
    Ok(())
}

fn encode_meta(buf: &mut Vec<u8>, meta: &FileMetaData) -> Result<(), SurfError> {
    encode_str(buf, &meta.filename)?;
    buf.extend_from_slice(&meta.version.to_be_bytes());
    buf.push(u8::from(meta.is_tombstone()));
    encode_hashes(buf, meta.block_hash_list.hashes())
}

fn decode_u32<R: Read>(r: &mut R) -> Result<u32, SurfError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn decode_u64<R: Read>(r: &mut R) -> Result<u64, SurfError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

fn decode_hash<R: Read>(r: &mut R) -> Result<ContentHash, SurfError> {
    let mut buf = [0u8; 32];
    r.read_exact(&mut buf)?;
    Ok(ContentHash::from_raw(buf))
}

fn decode_hashes(r: &mut Cursor<&[u8]>) -> Result<Vec<ContentHash>, SurfError> {
    let count = decode_u32(r)? as usize;
    let remaining = r.get_ref().len() as u64 - r.position();
    if count as u64 * 32 > remaining {
        return Err(SurfError::Protocol(format!(
            "hash list of {count} entries exceeds frame"
        )));
    }
    (0..count).map(|_| decode_hash(r)).collect()
}

fn decode_str<R: Read>(r: &mut R) -> Result<String, SurfError> {
    let mut len_buf = [0u8; 2];
    r.read_exact(&mut len_buf)?;
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| SurfError::Protocol(format!("invalid UTF-8 string: {e}")))
}

fn decode_meta(r: &mut Cursor<&[u8]>) -> Result<FileMetaData, SurfError> {
    let filename = decode_str(r)?;
    let version = decode_u64(r)?;

    let mut flag = [0u8; 1];
    r.read_exact(&mut flag)?;
    let hashes = decode_hashes(r)?;

    let block_hash_list = match flag[0] {
        0 => BlockHashList::Blocks(hashes),
        1 if hashes.is_empty() => BlockHashList::Tombstone,
        1 => {
            return Err(SurfError::Protocol(format!(
                "tombstone for {filename} carries block hashes"
            )));
        }
        other => {
            return Err(SurfError::Protocol(format!("bad tombstone flag {other}")));
        }
    };

    Ok(FileMetaData {
        filename,
        version,
        block_hash_list,
    })
}

/// Protocol writer for sending messages
pub struct ProtocolWriter<W> {
    inner: W,
}

impl<W: Write> ProtocolWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode and send one message, flushing the writer
    ///
    /// # Errors
    /// Returns an error if the message is too large or the write fails.
    pub fn send(&mut self, message: &Message) -> Result<(), SurfError> {
        let payload = message.encode_payload()?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| {
                SurfError::Protocol(format!(
                    "{} payload of {} bytes exceeds frame limit",
                    message.name(),
                    payload.len()
                ))
            })?;

        write_header(&mut self.inner, message.type_id(), len)?;
        self.inner.write_all(&payload)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Send error response
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn send_error(&mut self, message: &str) -> Result<(), SurfError> {
        self.send(&Message::Error(message.to_string()))
    }

    /// Get inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Protocol reader for receiving messages
pub struct ProtocolReader<R> {
    inner: R,
}

impl<R: Read> ProtocolReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read next message
    ///
    /// # Errors
    /// Returns [`SurfError::Io`] on EOF or read failure and
    /// [`SurfError::Protocol`] on malformed frames.
    pub fn read_message(&mut self) -> Result<Message, SurfError> {
        let (msg_type, len) = read_header(&mut self.inner)?;
        if len > MAX_FRAME_LEN {
            return Err(SurfError::Protocol(format!(
                "frame of {len} bytes exceeds limit"
            )));
        }

        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload)?;
        Message::decode(msg_type, &payload)
    }

    /// Get inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &Message) -> Message {
        let mut buf = Vec::new();
        ProtocolWriter::new(&mut buf).send(message).unwrap();
        ProtocolReader::new(Cursor::new(buf)).read_message().unwrap()
    }

    #[test]
    fn test_update_file_roundtrip() {
        let hashes = vec![ContentHash::from_bytes(b"a"), ContentHash::from_bytes(b"b")];
        let live = Message::UpdateFile(FileMetaData::new("report final.pdf", 12, hashes));
        assert_eq!(roundtrip(&live), live);

        let tomb = Message::UpdateFile(FileMetaData::tombstone("old.txt", 3));
        assert_eq!(roundtrip(&tomb), tomb);
    }

    #[test]
    fn test_catalog_and_placement_roundtrip() {
        let h = ContentHash::from_bytes(b"x");
        let mut catalog = Catalog::new();
        catalog.insert("a".into(), FileMetaData::new("a", 1, vec![h]));
        catalog.insert("b".into(), FileMetaData::tombstone("b", 2));
        catalog.insert("empty".into(), FileMetaData::new("empty", 1, Vec::new()));
        let message = Message::FileInfoMap(catalog);
        assert_eq!(roundtrip(&message), message);

        let mut map = BlockStoreMap::new();
        map.insert("127.0.0.1:9000".into(), vec![h]);
        map.insert("127.0.0.1:9001".into(), Vec::new());
        let message = Message::BlockStoreMap(map);
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_sequential_frames_on_one_stream() {
        let mut buf = Vec::new();
        let mut writer = ProtocolWriter::new(&mut buf);
        writer
            .send(&Message::PutBlock {
                data: Bytes::from_static(b"payload"),
            })
            .unwrap();
        writer.send(&Message::Conflict { current: 41 }).unwrap();
        writer.send_error("boom").unwrap();

        let mut reader = ProtocolReader::new(Cursor::new(buf));
        assert_eq!(
            reader.read_message().unwrap(),
            Message::PutBlock {
                data: Bytes::from_static(b"payload")
            }
        );
        assert_eq!(reader.read_message().unwrap(), Message::Conflict { current: 41 });
        assert_eq!(reader.read_message().unwrap(), Message::Error("boom".into()));
        assert!(matches!(reader.read_message(), Err(SurfError::Io(_))));
    }

    #[test]
    fn test_rejects_unknown_type_and_oversized_frame() {
        let mut reader = ProtocolReader::new(Cursor::new(vec![0x42, 0, 0, 0, 0]));
        assert!(matches!(reader.read_message(), Err(SurfError::Protocol(_))));

        let mut header = vec![msg::PUT_BLOCK];
        header.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut reader = ProtocolReader::new(Cursor::new(header));
        assert!(matches!(reader.read_message(), Err(SurfError::Protocol(_))));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut frame = vec![msg::VERSION];
        frame.extend_from_slice(&9u32.to_be_bytes());
        frame.extend_from_slice(&7u64.to_be_bytes());
        frame.push(0xff);
        let mut reader = ProtocolReader::new(Cursor::new(frame));
        assert!(matches!(reader.read_message(), Err(SurfError::Protocol(_))));
    }
}
