//! blocksync: Block-level file synchronization client
//!
//! Mirrors a flat local directory against a blocksync server:
//! - SHA-256 content-addressed blocks, uploaded only when missing
//! - Versioned catalog with optimistic concurrency
//! - Deletions propagated as tombstones

mod debug_log;
mod progress;

use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, ValueEnum, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, eyre};
use tracing::{debug, info, info_span};

use blocksync_core::config::CONFIG_FILE;
use blocksync_core::{ChunkConfig, ClientConfig, Scanner, SurfClient, SyncEngine};
use blocksync_transport::TcpClient;

use crate::progress::SyncProgress;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "blocksync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Block-level file sync against a blocksync server")]
#[command(long_about = r#"
blocksync keeps a flat directory in sync with a blocksync server.

Files are split into fixed-size blocks addressed by their SHA-256 hash; only
blocks the server lacks are uploaded. Every file carries a version, and a
stale update is rejected and replaced by the server's copy.

Examples:
  blocksync sync ./notes 127.0.0.1:8080   One sync pass
  blocksync scan ./notes --format json    Show local block lists
  blocksync catalog 127.0.0.1:8080        Show the server catalog
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass over a directory
    Sync {
        /// Local directory path
        dir: PathBuf,

        /// Metadata server (host:port); defaults to `server` in .blocksync.toml
        server: Option<String>,

        /// Block size in bytes
        #[arg(short, long)]
        block_size: Option<usize>,

        /// Config file [default: <dir>/.blocksync.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Scan a directory and print the metadata a sync would compute
    Scan {
        /// Directory to scan
        dir: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Summary)]
        format: Format,

        /// Block size in bytes
        #[arg(short, long)]
        block_size: Option<usize>,
    },

    /// Print the server's catalog
    Catalog {
        /// Metadata server (host:port)
        server: String,
    },

    /// Show version and build info
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Summary,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let session = debug_log::init(cli.verbose)?;
    debug!("Debug log at {}", session.log_path.display());

    match cli.command {
        Commands::Version => {
            eprintln!("blocksync {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Scan {
            dir,
            format,
            block_size,
        } => {
            let _span = info_span!("scan", dir = %dir.display()).entered();
            let config = ClientConfig::load(&dir)?;
            scan_command(&dir, format, resolve_block_size(block_size, &config)?)?;
        }
        Commands::Catalog { server } => {
            let _span = info_span!("catalog", server = %server).entered();
            catalog_command(&server)?;
        }
        Commands::Sync {
            dir,
            server,
            block_size,
            config,
        } => {
            let config = load_config(&dir, config.as_deref())?;
            let server = resolve_server(server, &config)?;
            let chunk = resolve_block_size(block_size, &config)?;

            let _span = info_span!(
                "sync",
                server = %server,
                dir = %dir.display(),
                block_size = chunk.block_size
            )
            .entered();
            sync_command(&dir, &server, chunk).wrap_err_with(|| {
                format!(
                    "session {}, debug log: {}",
                    session.session_id,
                    session.log_path.display()
                )
            })?;
        }
    }

    Ok(())
}

fn load_config(dir: &Path, explicit: Option<&Path>) -> Result<ClientConfig> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(eyre!("config file {} does not exist", path.display()));
            }
            ClientConfig::load_file(path)
        }
        None => ClientConfig::load(dir),
    }
}

/// Positional server argument wins over the config file
fn resolve_server(arg: Option<String>, config: &ClientConfig) -> Result<String> {
    arg.or_else(|| config.server.clone()).ok_or_else(|| {
        eyre!("no server given; pass host:port or set `server` in {CONFIG_FILE}")
    })
}

fn resolve_block_size(arg: Option<usize>, config: &ClientConfig) -> Result<ChunkConfig> {
    ChunkConfig::new(arg.unwrap_or(config.block_size))
}

fn scan_command(dir: &Path, format: Format, chunk: ChunkConfig) -> Result<()> {
    info!("Scanning {}...", dir.display());

    let local = Scanner::new(dir, chunk).scan()?;

    match format {
        Format::Json => {
            let json = serde_json::to_string_pretty(&local.files)?;
            println!("{json}");
        }
        Format::Summary => {
            progress::scanned(local.files.len(), local.block_count(), local.block_bytes());

            if local.files.len() <= 20 {
                for meta in local.files.values() {
                    eprintln!(
                        "  {} ({} blocks)",
                        meta.filename,
                        meta.block_hash_list.hashes().len()
                    );
                }
            }
        }
    }

    Ok(())
}

fn catalog_command(server: &str) -> Result<()> {
    let mut client = TcpClient::connect(server)
        .wrap_err_with(|| format!("failed to connect to {server}"))?;
    let catalog = client.get_file_info_map()?;
    client.shutdown()?;

    for meta in catalog.values() {
        let state = if meta.is_tombstone() {
            "deleted".to_string()
        } else {
            format!("{} blocks", meta.block_hash_list.hashes().len())
        };
        println!("{:>6}  {}  ({state})", format!("v{}", meta.version), meta.filename);
    }
    progress::print_status("Listed", &format!("{} entries from {server}", catalog.len()));
    Ok(())
}

fn sync_command(dir: &Path, server: &str, chunk: ChunkConfig) -> Result<()> {
    info!("Syncing {} with {server}", dir.display());

    let progress = SyncProgress::new();
    let mut client = TcpClient::connect(server)
        .wrap_err_with(|| format!("failed to connect to {server}"))?;

    let report = SyncEngine::new(&mut client, dir, chunk).run()?;
    client.shutdown()?;

    progress.finish(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_argument_overrides_config() {
        let config = ClientConfig {
            server: Some("from-config:1".into()),
            ..ClientConfig::default()
        };
        assert_eq!(
            resolve_server(Some("from-arg:2".into()), &config).unwrap(),
            "from-arg:2"
        );
        assert_eq!(resolve_server(None, &config).unwrap(), "from-config:1");
        assert!(resolve_server(None, &ClientConfig::default()).is_err());
    }

    #[test]
    fn test_block_size_resolution() {
        let config = ClientConfig {
            block_size: 1024,
            ..ClientConfig::default()
        };
        assert_eq!(resolve_block_size(None, &config).unwrap().block_size, 1024);
        assert_eq!(resolve_block_size(Some(64), &config).unwrap().block_size, 64);
        assert!(resolve_block_size(Some(0), &config).is_err());
        assert!(resolve_block_size(Some(blocksync_core::chunker::MAX_BLOCK_SIZE + 1), &config).is_err());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(dir.path(), Some(&dir.path().join("missing.toml"))).is_err());

        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "server = \"h:1\"").unwrap();
        let config = load_config(dir.path(), Some(&path)).unwrap();
        assert_eq!(config.server.as_deref(), Some("h:1"));
    }

    #[test]
    fn test_cli_parses_sync() {
        let cli = Cli::parse_from(["blocksync", "sync", "./dir", "host:1", "-b", "512"]);
        let Commands::Sync {
            server, block_size, ..
        } = cli.command
        else {
            panic!("expected sync");
        };
        assert_eq!(server.as_deref(), Some("host:1"));
        assert_eq!(block_size, Some(512));
    }
}
