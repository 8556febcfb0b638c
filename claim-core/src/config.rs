//! Configuration for the claim core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Claim core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Claim engine configuration
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/claims"),
            service_name: "claim-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// fsync the WAL on every commit
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64, // 64 MB
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
            sync_writes: true,
        }
    }
}

/// Claim engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded wait for one store transaction (milliseconds)
    pub store_timeout_ms: u64,

    /// Re-read the server clock at commit time for the expiry check
    pub recheck_server_clock: bool,

    /// Capacity of the invalidation channel
    pub invalidation_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 2_000,
            recheck_server_clock: true,
            invalidation_buffer: 1024,
        }
    }
}

impl EngineConfig {
    /// Store timeout as a duration
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("CLAIM_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(timeout) = std::env::var("CLAIM_STORE_TIMEOUT_MS") {
            config.engine.store_timeout_ms = timeout.parse().map_err(|e| {
                crate::Error::Config(format!("CLAIM_STORE_TIMEOUT_MS: {}", e))
            })?;
        }

        if let Ok(sync) = std::env::var("CLAIM_SYNC_WRITES") {
            config.rocksdb.sync_writes = sync
                .parse()
                .map_err(|e| crate::Error::Config(format!("CLAIM_SYNC_WRITES: {}", e)))?;
        }

        Ok(config)
    }
}
