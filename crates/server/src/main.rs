//! blocksync-server: Block store and metadata catalog server
//!
//! Accepts framed protocol connections over TCP. Each connection is served
//! by a blocking request loop on tokio's blocking pool; the stores are shared
//! between connections and do their own locking.

mod config;

use std::io::{BufReader, BufWriter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use blocksync_core::{
    BlockStore, LmdbBlockStore, LmdbMetaStore, MemoryBlockStore, MemoryMetaStore, MetaStore,
};
use blocksync_transport::Service;

use crate::config::{Role, ServerConfig};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "blocksync-server")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Block store and metadata catalog server for blocksync")]
struct Cli {
    /// Config file (TOML); flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on [default: 127.0.0.1:8080]
    #[arg(short, long)]
    listen: Option<String>,

    /// Stores to host [default: both]
    #[arg(short, long, value_enum)]
    role: Option<Role>,

    /// Block store address advertised by the catalog (repeatable)
    #[arg(short = 'b', long = "block-store")]
    block_stores: Vec<String>,

    /// Keep stores in LMDB under this directory instead of memory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(role) = self.role {
            config.role = role;
        }
        if !self.block_stores.is_empty() {
            config.block_stores = self.block_stores;
        }
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "warn,blocksync_server=debug,blocksync_core=debug,blocksync_transport=debug"
    } else {
        "warn,blocksync_server=info,blocksync_core=info,blocksync_transport=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = cli.into_config()?;

    let listener = TcpListener::bind(&config.listen)
        .await
        .wrap_err_with(|| format!("failed to listen on {}", config.listen))?;
    let bound = listener.local_addr()?;

    let service = build_service(&config, bound)?;
    info!("blocksync-server {} listening on {bound} (role: {})", env!("CARGO_PKG_VERSION"), config.role);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => spawn_connection(service.clone(), stream, peer),
                    Err(e) => warn!("Accept failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Construct the stores this server hosts
fn build_service(config: &ServerConfig, bound: SocketAddr) -> Result<Service> {
    let mut service = Service::new();

    if config.role.hosts_blocks() {
        let store: Arc<dyn BlockStore> = match &config.data_dir {
            Some(dir) => {
                let path = dir.join("blocks");
                info!("Block store at {}", path.display());
                Arc::new(LmdbBlockStore::open(&path).wrap_err("failed to open block store")?)
            }
            None => Arc::new(MemoryBlockStore::new()),
        };
        service = service.with_block_store(store);
    }

    if config.role.hosts_meta() {
        let block_stores = config.advertised_block_stores(bound)?;
        info!("Advertising block stores: {}", block_stores.join(", "));

        let store: Arc<dyn MetaStore> = match &config.data_dir {
            Some(dir) => {
                let path = dir.join("meta");
                info!("Catalog at {}", path.display());
                Arc::new(
                    LmdbMetaStore::open(&path, block_stores).wrap_err("failed to open catalog")?,
                )
            }
            None => Arc::new(MemoryMetaStore::new(block_stores)),
        };
        service = service.with_meta_store(store);
    }

    Ok(service)
}

/// Serve one connection on the blocking pool
fn spawn_connection(service: Service, stream: tokio::net::TcpStream, peer: SocketAddr) {
    debug!("Connection from {peer}");

    let stream = match stream.into_std().and_then(|s| {
        s.set_nonblocking(false)?;
        Ok(s)
    }) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Could not take over connection from {peer}: {e}");
            return;
        }
    };

    tokio::task::spawn_blocking(move || {
        let result = stream
            .try_clone()
            .map_err(Into::into)
            .and_then(|read_half| {
                service.serve_connection(BufReader::new(read_half), BufWriter::new(stream))
            });
        match result {
            Ok(()) => debug!("Connection from {peer} closed"),
            Err(e) => warn!("Connection from {peer} failed: {e:#}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_core::{Block, ContentHash, FileMetaData, Message};

    fn loopback() -> SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("blocksync-server").chain(args.iter().copied()))
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "listen = \"0.0.0.0:9000\"\nrole = \"meta\"\n").unwrap();

        let config = cli(&["--config", path.to_str().unwrap(), "--role", "block"])
            .into_config()
            .unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.role, Role::Block);
    }

    #[test]
    fn test_defaults_without_config() {
        let config = cli(&["-b", "a:1", "-b", "b:2"]).into_config().unwrap();
        assert_eq!(config.listen, config::DEFAULT_LISTEN);
        assert_eq!(config.block_stores, vec!["a:1".to_string(), "b:2".to_string()]);
    }

    #[test]
    fn test_lmdb_service_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..ServerConfig::default()
        };
        let block = Block::new(&b"persisted"[..]);
        let hash = ContentHash::from_bytes(b"persisted");

        {
            let service = build_service(&config, loopback()).unwrap();
            service.handle(Message::PutBlock { data: block.data.clone() });
            let meta = FileMetaData::new("kept.txt", 1, vec![hash]);
            assert_eq!(service.handle(Message::UpdateFile(meta)), Message::Version(1));
        }

        let service = build_service(&config, loopback()).unwrap();
        assert_eq!(service.handle(Message::GetBlock { hash }), Message::Block(block.data));
        let Message::FileInfoMap(catalog) = service.handle(Message::GetFileInfoMap) else {
            panic!("expected catalog");
        };
        assert_eq!(catalog["kept.txt"].version, 1);
    }

    #[test]
    fn test_meta_role_hosts_no_blocks() {
        let config = ServerConfig {
            role: Role::Meta,
            block_stores: vec!["elsewhere:1".into()],
            ..ServerConfig::default()
        };
        let service = build_service(&config, loopback()).unwrap();
        let reply = service.handle(Message::HasBlocks { hashes: Vec::new() });
        assert!(matches!(reply, Message::Error(_)));
        let Message::BlockStoreMap(map) = service.handle(Message::GetBlockStoreMap {
            hashes: Vec::new(),
        }) else {
            panic!("expected placement");
        };
        assert!(map.contains_key("elsewhere:1"));
    }

    #[test]
    fn test_wildcard_listen_refuses_to_start_without_block_stores() {
        let config = ServerConfig {
            listen: "0.0.0.0:8080".into(),
            ..ServerConfig::default()
        };
        let err = build_service(&config, "0.0.0.0:8080".parse().unwrap()).err().expect("expected build_service to fail");
        assert!(format!("{err:?}").contains("--block-store"), "{err:?}");

        let config = ServerConfig {
            block_stores: vec!["10.0.0.5:8080".into()],
            ..config
        };
        let service = build_service(&config, "0.0.0.0:8080".parse().unwrap()).unwrap();
        let Message::BlockStoreMap(map) = service.handle(Message::GetBlockStoreMap {
            hashes: Vec::new(),
        }) else {
            panic!("expected placement");
        };
        assert!(map.contains_key("10.0.0.5:8080"));
    }
}
