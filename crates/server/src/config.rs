//! Server configuration (server.toml)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, bail};

/// Default listen address
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Which stores this process hosts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Metadata catalog only
    Meta,
    /// Block store only
    Block,
    /// Both stores in one process
    #[default]
    Both,
}

impl Role {
    #[must_use]
    pub fn hosts_meta(self) -> bool {
        matches!(self, Self::Meta | Self::Both)
    }

    #[must_use]
    pub fn hosts_blocks(self) -> bool {
        matches!(self, Self::Block | Self::Both)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Meta => "meta",
            Self::Block => "block",
            Self::Both => "both",
        })
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to accept connections on
    pub listen: String,

    pub role: Role,

    /// Block store addresses the catalog advertises; empty means this
    /// server's own address
    pub block_stores: Vec<String>,

    /// LMDB directory; stores are kept in memory when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            role: Role::default(),
            block_stores: Vec::new(),
            data_dir: None,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).wrap_err_with(|| format!("failed to parse {}", path.display()))
    }

    /// Addresses the catalog advertises, given the address actually bound
    ///
    /// # Errors
    /// Without explicit `block_stores`, fails when this server hosts no
    /// blocks or is bound to an unspecified address such as `0.0.0.0`,
    /// which clients could not dial.
    pub fn advertised_block_stores(&self, bound: SocketAddr) -> Result<Vec<String>> {
        if !self.block_stores.is_empty() {
            return Ok(self.block_stores.clone());
        }
        if !self.role.hosts_blocks() {
            bail!("role `{}` hosts no blocks; pass --block-store <host:port>", self.role);
        }
        if bound.ip().is_unspecified() {
            bail!(
                "listening on {bound}, which clients cannot dial; \
                 pass --block-store <reachable host:port> to advertise this server"
            );
        }
        Ok(vec![bound.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
listen = "0.0.0.0:9000"
role = "meta"
block_stores = ["10.0.0.1:9001", "10.0.0.2:9001"]
data_dir = "/var/lib/blocksync"
"#;

        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.role, Role::Meta);
        assert_eq!(config.block_stores.len(), 2);
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/blocksync")));
    }

    #[test]
    fn test_parse_empty_config() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(config.role.hosts_meta() && config.role.hosts_blocks());
    }

    #[test]
    fn test_advertises_own_address_by_default() {
        let config = ServerConfig::default();
        assert_eq!(
            config.advertised_block_stores("127.0.0.1:4242".parse().unwrap()).unwrap(),
            vec!["127.0.0.1:4242".to_string()]
        );
    }

    #[test]
    fn test_unspecified_listen_address_not_advertised() {
        let mut config = ServerConfig {
            listen: "0.0.0.0:8080".into(),
            ..ServerConfig::default()
        };
        let err = config
            .advertised_block_stores("0.0.0.0:8080".parse().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("--block-store"), "{err}");
        assert!(config.advertised_block_stores("[::]:8080".parse().unwrap()).is_err());

        config.block_stores = vec!["files.example.com:8080".into()];
        assert_eq!(
            config.advertised_block_stores("0.0.0.0:8080".parse().unwrap()).unwrap(),
            vec!["files.example.com:8080".to_string()]
        );
    }

    #[test]
    fn test_meta_only_needs_explicit_block_stores() {
        let config = ServerConfig {
            role: Role::Meta,
            ..ServerConfig::default()
        };
        assert!(config.advertised_block_stores("127.0.0.1:8080".parse().unwrap()).is_err());
    }

    #[test]
    fn test_load_rejects_unknown_role() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, r#"role = "proxy""#).unwrap();
        assert!(ServerConfig::load(&path).is_err());
    }
}
