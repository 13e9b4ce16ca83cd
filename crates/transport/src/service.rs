//! Server-side request dispatch
//!
//! A [`Service`] answers protocol requests from the stores the server hosts.
//! One call to [`Service::serve_connection`] runs the request loop of a
//! single client connection until it disconnects or sends `Shutdown`.

use std::io::{Read, Write};
use std::sync::Arc;

use blocksync_core::{Block, BlockStore, Message, MetaStore, ProtocolReader, ProtocolWriter, SurfError};
use color_eyre::Result;
use tracing::{debug, trace, warn};

/// Stores hosted by one server process
#[derive(Clone, Default)]
pub struct Service {
    block_store: Option<Arc<dyn BlockStore>>,
    meta_store: Option<Arc<dyn MetaStore>>,
}

impl Service {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_block_store(mut self, store: Arc<dyn BlockStore>) -> Self {
        self.block_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_meta_store(mut self, store: Arc<dyn MetaStore>) -> Self {
        self.meta_store = Some(store);
        self
    }

    /// Serve requests until EOF or `Shutdown`
    ///
    /// # Errors
    /// Returns an error if a response cannot be written or a frame is
    /// malformed.
    pub fn serve_connection<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<()> {
        let mut reader = ProtocolReader::new(reader);
        let mut writer = ProtocolWriter::new(writer);

        loop {
            let request = match reader.read_message() {
                Ok(msg) => msg,
                Err(SurfError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("Client disconnected");
                    break;
                }
                Err(SurfError::Protocol(reason)) => {
                    warn!("Dropping connection: {reason}");
                    writer.send_error(&reason)?;
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            trace!("Request {}", request.name());
            let shutdown = matches!(request, Message::Shutdown);
            let response = self.handle(request);
            writer.send(&response)?;

            if shutdown {
                debug!("Client requested shutdown");
                break;
            }
        }
        Ok(())
    }

    /// Answer one request
    pub fn handle(&self, request: Message) -> Message {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(SurfError::NotFound(hash)) => Message::NotFound(hash),
            Err(SurfError::VersionConflict { filename, current }) => {
                debug!("Rejected update of {filename}: stored version is {current}");
                Message::Conflict { current }
            }
            Err(e) => {
                warn!("Request failed: {e}");
                Message::Error(e.to_string())
            }
        }
    }

    fn dispatch(&self, request: Message) -> Result<Message, SurfError> {
        match request {
            Message::GetBlock { hash } => Ok(Message::Block(self.blocks()?.get(&hash)?.data)),
            Message::PutBlock { data } => Ok(Message::Stored(self.blocks()?.put(Block::new(data))?)),
            Message::HasBlocks { hashes } => Ok(Message::Hashes(self.blocks()?.has_blocks(&hashes)?)),

            Message::GetFileInfoMap => Ok(Message::FileInfoMap(self.meta()?.catalog()?)),
            Message::UpdateFile(meta) => Ok(Message::Version(self.meta()?.update_file(meta)?)),
            Message::GetBlockStoreMap { hashes } => {
                Ok(Message::BlockStoreMap(self.meta()?.block_store_map(&hashes)?))
            }

            Message::Shutdown => Ok(Message::Ok),

            // These are responses, not requests - shouldn't receive them
            other => Err(SurfError::Protocol(format!(
                "unexpected {} message from client",
                other.name()
            ))),
        }
    }

    fn blocks(&self) -> Result<&Arc<dyn BlockStore>, SurfError> {
        self.block_store
            .as_ref()
            .ok_or_else(|| SurfError::Remote("this server does not host a block store".into()))
    }

    fn meta(&self) -> Result<&Arc<dyn MetaStore>, SurfError> {
        self.meta_store
            .as_ref()
            .ok_or_else(|| SurfError::Remote("this server does not host the catalog".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_core::{ContentHash, FileMetaData, MemoryBlockStore, MemoryMetaStore};
    use std::io::Cursor;

    fn both() -> Service {
        Service::new()
            .with_block_store(Arc::new(MemoryBlockStore::new()))
            .with_meta_store(Arc::new(MemoryMetaStore::new(vec!["here".into()])))
    }

    #[test]
    fn test_put_then_get() {
        let service = both();
        let Message::Stored(hash) = service.handle(Message::PutBlock {
            data: "abc".into(),
        }) else {
            panic!("expected Stored");
        };
        assert_eq!(hash, ContentHash::from_bytes(b"abc"));
        assert_eq!(
            service.handle(Message::GetBlock { hash }),
            Message::Block("abc".into())
        );
    }

    #[test]
    fn test_missing_block_and_conflict_map_to_messages() {
        let service = both();
        let hash = ContentHash::from_bytes(b"nope");
        assert_eq!(service.handle(Message::GetBlock { hash }), Message::NotFound(hash));

        let meta = FileMetaData::new("f", 1, Vec::new());
        assert_eq!(service.handle(Message::UpdateFile(meta.clone())), Message::Version(1));
        assert_eq!(
            service.handle(Message::UpdateFile(meta)),
            Message::Conflict { current: 1 }
        );
    }

    #[test]
    fn test_role_without_store_reports_error() {
        let meta_only = Service::new()
            .with_meta_store(Arc::new(MemoryMetaStore::new(vec!["blocks:1".into()])));
        let reply = meta_only.handle(Message::HasBlocks { hashes: Vec::new() });
        assert!(matches!(reply, Message::Error(_)), "{reply:?}");
    }

    #[test]
    fn test_response_messages_are_rejected() {
        assert!(matches!(both().handle(Message::Ok), Message::Error(_)));
    }

    #[test]
    fn test_serve_connection_until_shutdown() {
        let mut input = Vec::new();
        let mut w = ProtocolWriter::new(&mut input);
        w.send(&Message::GetFileInfoMap).unwrap();
        w.send(&Message::Shutdown).unwrap();
        w.send(&Message::GetFileInfoMap).unwrap();

        let mut output = Vec::new();
        both()
            .serve_connection(Cursor::new(input), &mut output)
            .unwrap();

        let mut r = ProtocolReader::new(Cursor::new(output));
        assert!(matches!(r.read_message().unwrap(), Message::FileInfoMap(m) if m.is_empty()));
        assert_eq!(r.read_message().unwrap(), Message::Ok);
        assert!(r.read_message().is_err());
    }
}
