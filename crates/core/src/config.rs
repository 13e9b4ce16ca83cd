//! Client configuration file parsing (.blocksync.toml)

use std::path::Path;

use color_eyre::eyre::WrapErr as _;

use crate::chunker::{ChunkConfig, DEFAULT_BLOCK_SIZE};

/// Config file name, looked up in the working directory and never synced
pub const CONFIG_FILE: &str = ".blocksync.toml";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Fixed block size used for chunking
    pub block_size: usize,

    /// Metadata server address (host:port)
    pub server: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            server: None,
        }
    }
}

impl ClientConfig {
    /// Load config from a working directory.
    ///
    /// Returns default config if .blocksync.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(root: &Path) -> color_eyre::Result<Self> {
        Self::load_file(&root.join(CONFIG_FILE))
    }

    /// Load config from an explicit path, defaulting when it is absent.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_file(path: &Path) -> color_eyre::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            ChunkConfig::new(config.block_size)
                .wrap_err_with(|| format!("invalid block_size in {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
