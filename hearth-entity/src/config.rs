//! Runtime configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is a valid
//! single-node, in-memory configuration.

use crate::error::{EntityError, EntityResult};
use hearth_scheduler::SchedulerConfig;
use hearth_types::MAX_NODE_ID;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level Hearth configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HearthConfig {
    /// Node id baked into generated entity ids and distributed lock values.
    #[serde(default)]
    pub node_id: u64,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub relational: RelationalConfig,

    #[serde(default)]
    pub document: DocumentConfig,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub transaction: TransactionConfig,
}

/// Shared cache tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Idle time after which a cached group is dropped.
    #[serde(default = "default_idle_expire_secs")]
    pub idle_expire_secs: u64,

    /// Longest wait for a group lock while hydrating.
    #[serde(default = "default_group_lock_timeout_ms")]
    pub group_lock_timeout_ms: u64,

    /// Enables the distributed tier.
    #[serde(default)]
    pub distributed: bool,
}

/// Sharded relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalConfig {
    /// Directory holding one database file per shard. In-memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
}

/// Document store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Database file. In-memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Worker pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Write-behind workers.
    #[serde(default = "default_database_threads")]
    pub database_threads: usize,

    /// Workers running inbound messages (transactions).
    #[serde(default = "default_message_threads")]
    pub message_threads: usize,

    #[serde(default = "default_owner_idle_secs")]
    pub owner_idle_secs: u64,

    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// A worker busy on one task longer than this is reported as blocked.
    #[serde(default = "default_block_threshold_ms")]
    pub block_threshold_ms: u64,

    /// Backlog size above which the monitor warns.
    #[serde(default = "default_overflow_threshold")]
    pub overflow_threshold: usize,
}

/// Transaction retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Retries after the first attempt, for transactions that do not set
    /// their own.
    #[serde(default = "default_retry_count")]
    pub default_retry_count: u32,

    /// Pause between attempts. Zero retries immediately.
    #[serde(default)]
    pub retry_backoff_ms: u64,
}

fn default_idle_expire_secs() -> u64 {
    300
}

fn default_group_lock_timeout_ms() -> u64 {
    3000
}

fn default_shard_count() -> u32 {
    1
}

fn default_database_threads() -> usize {
    4
}

fn default_message_threads() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get())
}

fn default_owner_idle_secs() -> u64 {
    300
}

fn default_monitor_interval_ms() -> u64 {
    1000
}

fn default_block_threshold_ms() -> u64 {
    10_000
}

fn default_overflow_threshold() -> usize {
    10_000
}

fn default_retry_count() -> u32 {
    3
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_expire_secs: default_idle_expire_secs(),
            group_lock_timeout_ms: default_group_lock_timeout_ms(),
            distributed: false,
        }
    }
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            path: None,
            shard_count: default_shard_count(),
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            database_threads: default_database_threads(),
            message_threads: default_message_threads(),
            owner_idle_secs: default_owner_idle_secs(),
            monitor_interval_ms: default_monitor_interval_ms(),
            block_threshold_ms: default_block_threshold_ms(),
            overflow_threshold: default_overflow_threshold(),
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            default_retry_count: default_retry_count(),
            retry_backoff_ms: 0,
        }
    }
}

impl CacheConfig {
    pub fn idle_expire(&self) -> Duration {
        Duration::from_secs(self.idle_expire_secs)
    }

    pub fn group_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.group_lock_timeout_ms)
    }
}

impl SchedulerSection {
    /// Pool settings for a scheduler with `threads` workers.
    pub fn pool(&self, threads: usize) -> SchedulerConfig {
        SchedulerConfig {
            threads,
            owner_idle_timeout: Duration::from_secs(self.owner_idle_secs),
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
            block_threshold: Duration::from_millis(self.block_threshold_ms),
            overflow_threshold: self.overflow_threshold,
        }
    }
}

impl TransactionConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl HearthConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> EntityResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| EntityError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> EntityResult<Self> {
        let config: HearthConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> EntityResult<()> {
        self.validate_node()?;
        self.validate_cache()?;
        self.validate_relational()?;
        self.validate_scheduler()?;
        Ok(())
    }

    fn validate_node(&self) -> EntityResult<()> {
        if self.node_id >= MAX_NODE_ID {
            return Err(invalid(format!(
                "node_id must be below {MAX_NODE_ID}, got: {}",
                self.node_id
            )));
        }
        Ok(())
    }

    fn validate_cache(&self) -> EntityResult<()> {
        if self.cache.idle_expire_secs == 0 {
            return Err(invalid("cache.idle_expire_secs must be > 0"));
        }
        if self.cache.group_lock_timeout_ms == 0 {
            return Err(invalid("cache.group_lock_timeout_ms must be > 0"));
        }
        Ok(())
    }

    fn validate_relational(&self) -> EntityResult<()> {
        if self.relational.shard_count == 0 {
            return Err(invalid("relational.shard_count must be > 0"));
        }
        Ok(())
    }

    fn validate_scheduler(&self) -> EntityResult<()> {
        if self.scheduler.database_threads == 0 {
            return Err(invalid("scheduler.database_threads must be > 0"));
        }
        if self.scheduler.message_threads == 0 {
            return Err(invalid("scheduler.message_threads must be > 0"));
        }
        if self.scheduler.monitor_interval_ms == 0 {
            return Err(invalid("scheduler.monitor_interval_ms must be > 0"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> EntityError {
    EntityError::Config(message.into())
}
