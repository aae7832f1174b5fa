//! Node configuration
//!
//! JSON file, for example:
//!
//! ```json
//! {
//!     "shard_id": "shard-a",
//!     "cluster_role": "shard",
//!     "executor_max_wait_ms": 5000,
//!     "write_conflict_backoff_ms": 1,
//!     "sharding_enabled": true
//! }
//! ```
//!
//! Only `shard_id` is required.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::YieldPolicy;
use crate::observability::{log_event, Event};
use crate::placement::{ShardId, StaticShardIdentity};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Role of this node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    Shard,
    ConfigServer,
}

impl ClusterRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterRole::Shard => "shard",
            ClusterRole::ConfigServer => "config_server",
        }
    }
}

/// Placement and executor settings for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// This node's shard id (required)
    pub shard_id: String,

    /// "shard" or "config_server" (default: "shard")
    #[serde(default = "default_cluster_role")]
    pub cluster_role: ClusterRole,

    /// Upper bound on one executor retry loop (default: 5000)
    #[serde(default = "default_executor_max_wait_ms")]
    pub executor_max_wait_ms: u64,

    /// First pause between storage-conflict retries; doubles on each retry
    /// (default: 1, must be > 0)
    #[serde(default = "default_write_conflict_backoff_ms")]
    pub write_conflict_backoff_ms: u64,

    /// False while the node is recovering its shard identity (default: true)
    #[serde(default = "default_sharding_enabled")]
    pub sharding_enabled: bool,
}

fn default_cluster_role() -> ClusterRole {
    ClusterRole::Shard
}
fn default_executor_max_wait_ms() -> u64 {
    5000
}
fn default_write_conflict_backoff_ms() -> u64 {
    1
}
fn default_sharding_enabled() -> bool {
    true
}

impl ShardingConfig {
    /// Load and validate configuration from file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;

        let source = path.display().to_string();
        log_event(
            Event::ConfigLoaded,
            &[
                ("path", source.as_str()),
                ("shard_id", config.shard_id.as_str()),
                ("cluster_role", config.cluster_role.as_str()),
            ],
        );
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: ShardingConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.shard_id.trim().is_empty() {
            return Err(ConfigError::Invalid("shard_id must not be empty".into()));
        }

        if self.executor_max_wait_ms == 0 {
            return Err(ConfigError::Invalid(
                "executor_max_wait_ms must be > 0".into(),
            ));
        }

        if self.write_conflict_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "write_conflict_backoff_ms must be > 0".into(),
            ));
        }

        if self.write_conflict_backoff_ms > self.executor_max_wait_ms {
            return Err(ConfigError::Invalid(format!(
                "write_conflict_backoff_ms ({}) must not exceed executor_max_wait_ms ({})",
                self.write_conflict_backoff_ms, self.executor_max_wait_ms
            )));
        }

        Ok(())
    }

    pub fn is_config_server(&self) -> bool {
        self.cluster_role == ClusterRole::ConfigServer
    }

    /// Default yield policy for executors on this node.
    pub fn yield_policy(&self) -> YieldPolicy {
        YieldPolicy::new(
            Duration::from_millis(self.executor_max_wait_ms),
            Duration::from_millis(self.write_conflict_backoff_ms),
        )
    }

    /// Shard identity described by this configuration.
    pub fn shard_identity(&self) -> StaticShardIdentity {
        StaticShardIdentity::new(
            ShardId::new(self.shard_id.clone()),
            self.sharding_enabled,
            self.is_config_server(),
        )
    }
}
