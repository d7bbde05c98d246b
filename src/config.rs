use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};
use crate::types::{Block, NodeId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    pub data_dir: PathBuf,
    pub key_path: PathBuf,
    pub server_id: NodeId,
    /// Block producing period in milliseconds.
    pub period_ms: u64,
    /// Maximum sleep per producer loop iteration in milliseconds.
    #[serde(default = "default_time_resolution_ms")]
    pub time_resolution_ms: u64,
    /// Number of heights after which an unacknowledged query expires.
    #[serde(default = "default_query_ttl")]
    pub query_ttl: i32,
    /// Whether this node produces blocks on its turns.
    #[serde(default)]
    pub block_producer: bool,
    /// Pre-signed genesis block anchoring the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genesis: Option<Block>,
}

fn default_time_resolution_ms() -> u64 {
    1_000
}

fn default_query_ttl() -> i32 {
    10
}

impl ChainConfig {
    pub fn load(path: &Path) -> ChainResult<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw).map_err(|err| {
            ChainError::Config(format!("malformed config {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ChainResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ChainError::Config(format!("unencodable config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    /// Rejects option sets the chain engine cannot run with.
    pub fn validate(&self) -> ChainResult<()> {
        if self.period_ms == 0 {
            return Err(ChainError::Config("period_ms must be positive".into()));
        }
        if self.time_resolution_ms == 0 {
            return Err(ChainError::Config(
                "time_resolution_ms must be positive".into(),
            ));
        }
        if self.query_ttl < 1 {
            return Err(ChainError::Config(format!(
                "query_ttl {} must be at least 1 height",
                self.query_ttl
            )));
        }
        if self.block_producer && self.server_id.as_str().is_empty() {
            return Err(ChainError::Config(
                "a block producer needs a server_id".into(),
            ));
        }
        if self.block_producer && self.genesis.is_none() {
            return Err(ChainError::Config(
                "a block producer needs a genesis block to anchor to".into(),
            ));
        }
        Ok(())
    }

    /// Creates the store directory. The key store creates its own
    /// parent on first save.
    pub fn ensure_directories(&self) -> ChainResult<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn genesis(&self) -> ChainResult<&Block> {
        self.genesis
            .as_ref()
            .ok_or_else(|| ChainError::Config("missing genesis block".into()))
    }

    pub fn period(&self) -> Duration {
        Duration::milliseconds(self.period_ms as i64)
    }

    pub fn time_resolution(&self) -> Duration {
        Duration::milliseconds(self.time_resolution_ms as i64)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            key_path: PathBuf::from("./keys/node.toml"),
            server_id: NodeId::default(),
            period_ms: 10_000,
            time_resolution_ms: default_time_resolution_ms(),
            query_ttl: default_query_ttl(),
            block_producer: false,
            genesis: None,
        }
    }
}
