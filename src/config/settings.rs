use crate::error::{BlockchainError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:51151";
pub const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MAX_DIFFICULTY: u32 = 256;

/// Node settings. Missing keys in a config file fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Address we listen on and advertise in handshakes
    pub listen: String,
    pub peers: Vec<String>,
    pub data_dir: PathBuf,
    /// Required leading zero bits of a block hash
    pub difficulty: u32,
    pub mine_interval_ms: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub dial_retry_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            peers: Vec::new(),
            data_dir: PathBuf::from("./data"),
            difficulty: 4,
            mine_interval_ms: 1000,
            workers: 4,
            queue_capacity: 100,
            dial_retry_ms: 2000,
        }
    }
}

/// Values given explicitly on the command line; they win over everything.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub peers: Vec<String>,
    pub data_dir: Option<PathBuf>,
    pub difficulty: Option<u32>,
}

impl NodeConfig {
    pub fn from_toml_str(text: &str) -> Result<NodeConfig> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<NodeConfig> {
        let text = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        NodeConfig::from_toml_str(&text)
    }

    /// Defaults, then the optional file, then `NODE_ADDRESS`, then `overrides`.
    pub fn load(file: Option<&Path>, overrides: ConfigOverrides) -> Result<NodeConfig> {
        let mut config = match file {
            Some(path) => NodeConfig::from_file(path)?,
            None => NodeConfig::default(),
        };
        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            config.listen = addr;
        }
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        for peer in overrides.peers {
            if !self.peers.contains(&peer) {
                self.peers.push(peer);
            }
        }
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(difficulty) = overrides.difficulty {
            self.difficulty = difficulty;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.listen.parse::<SocketAddr>().map_err(|e| {
            BlockchainError::Config(format!("Invalid listen address {}: {e}", self.listen))
        })?;
        if self.workers == 0 {
            return Err(BlockchainError::Config("workers must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(BlockchainError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.difficulty > MAX_DIFFICULTY {
            return Err(BlockchainError::Config(format!(
                "difficulty {} exceeds the {MAX_DIFFICULTY} bits of a hash",
                self.difficulty
            )));
        }
        Ok(())
    }

    pub fn mine_interval(&self) -> Duration {
        Duration::from_millis(self.mine_interval_ms)
    }

    pub fn dial_retry(&self) -> Duration {
        Duration::from_millis(self.dial_retry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert_eq!(config.listen, "127.0.0.1:51151");
        assert_eq!(config.difficulty, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            peers = ["127.0.0.1:51152"]
            difficulty = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.peers, vec!["127.0.0.1:51152".to_string()]);
        assert_eq!(config.difficulty, 12);
        assert_eq!(config.workers, 4);
        assert_eq!(config.mine_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            NodeConfig::from_toml_str("colour = \"blue\""),
            Err(BlockchainError::Config(_))
        ));
    }

    #[test]
    fn test_overrides_win() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.toml");
        fs::write(&path, "listen = \"127.0.0.1:6000\"\npeers = [\"a:1\"]\n").unwrap();

        let mut config = NodeConfig::from_file(&path).unwrap();
        config.apply(ConfigOverrides {
            listen: Some("127.0.0.1:7000".to_string()),
            peers: vec!["a:1".to_string(), "b:2".to_string()],
            data_dir: Some(dir.path().to_path_buf()),
            difficulty: Some(0),
        });
        assert_eq!(config.listen, "127.0.0.1:7000");
        assert_eq!(config.peers, vec!["a:1".to_string(), "b:2".to_string()]);
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.difficulty, 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_listen = NodeConfig {
            listen: "not an address".to_string(),
            ..NodeConfig::default()
        };
        assert!(bad_listen.validate().is_err());

        let no_workers = NodeConfig {
            workers: 0,
            ..NodeConfig::default()
        };
        assert!(no_workers.validate().is_err());

        let too_hard = NodeConfig {
            difficulty: 257,
            ..NodeConfig::default()
        };
        assert!(too_hard.validate().is_err());
    }
}
