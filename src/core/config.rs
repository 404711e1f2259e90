//! Configuration parsing and validation.
//!
//! Shoal configuration is loaded from TOML files with CLI overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level Shoal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-facing listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Snapshot replication configuration.
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// Coordinator-facing listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the coordinator listener.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// TCP nodelay (disable Nagle's algorithm).
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

/// Snapshot replication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Compress batch payloads before framing.
    #[serde(default = "default_compress")]
    pub compress: bool,

    /// Emit keepalive replies to the master link during long transfers.
    #[serde(default = "default_heartbeat")]
    pub heartbeat: bool,

    /// Keepalive cadence in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Batch threshold when compression is enabled.
    #[serde(default = "default_max_package_size")]
    pub max_package_size: usize,

    /// Batch threshold when compression is disabled.
    #[serde(default = "default_min_package_size")]
    pub min_package_size: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8888".to_string()
}

fn default_nodelay() -> bool {
    true
}

fn default_compress() -> bool {
    true
}

fn default_heartbeat() -> bool {
    true
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_max_package_size() -> usize {
    crate::repl::MAX_PACKAGE_SIZE
}

fn default_min_package_size() -> usize {
    crate::repl::MIN_PACKAGE_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            nodelay: default_nodelay(),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            compress: default_compress(),
            heartbeat: default_heartbeat(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_package_size: default_max_package_size(),
            min_package_size: default_min_package_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Batch threshold for the active compression setting.
    pub fn package_size(&self) -> usize {
        if self.compress {
            self.max_package_size
        } else {
            self.min_package_size
        }
    }

    /// Slave output buffer size beyond which iteration is paused.
    pub fn backpressure_limit(&self) -> usize {
        self.max_package_size * 3
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("server.bind is not a socket address: {}", self.server.bind))?;

        if self.replication.heartbeat_interval_ms == 0 {
            anyhow::bail!("replication.heartbeat_interval_ms must be > 0");
        }
        if self.replication.max_package_size == 0 || self.replication.min_package_size == 0 {
            anyhow::bail!("replication package sizes must be > 0");
        }
        if self.replication.min_package_size > self.replication.max_package_size {
            anyhow::bail!(
                "replication.min_package_size {} exceeds max_package_size {}",
                self.replication.min_package_size,
                self.replication.max_package_size
            );
        }
        Ok(())
    }
}
