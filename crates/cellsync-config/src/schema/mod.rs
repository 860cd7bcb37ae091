//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod schema_kernels;

pub use schema_kernels::*;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Disables every mutating operation and all write-permission grants.
    #[serde(default, alias = "readOnly")]
    pub read_only: bool,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub replica: ReplicaConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub kernels: KernelsConfig,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Document registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Time an unused replica stays resident after its last connection closes.
    #[serde(default = "default_eviction_grace", alias = "evictionGrace")]
    pub eviction_grace_ms: u64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            eviction_grace_ms: default_eviction_grace(),
        }
    }
}

impl ReplicaConfig {
    pub fn eviction_grace(&self) -> Duration {
        Duration::from_millis(self.eviction_grace_ms)
    }
}

fn default_eviction_grace() -> u64 {
    30_000
}

/// Persistence writer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Quiet period before a scheduled flush fires.
    #[serde(default = "default_debounce", alias = "persistDebounce")]
    pub debounce_ms: u64,

    /// Upper bound between the first unflushed change and its flush.
    #[serde(default = "default_max_wait", alias = "persistMaxWait")]
    pub max_wait_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce(),
            max_wait_ms: default_max_wait(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
        }
    }
}

impl PersistenceConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

fn default_debounce() -> u64 {
    10_000
}

fn default_max_wait() -> u64 {
    20_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_retry_max_delay() -> u64 {
    10_000
}

/// Metadata store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Storage backend: "sqlite" or "memory".
    #[serde(default = "default_store_backend")]
    pub backend: String,

    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

fn default_store_backend() -> String {
    "sqlite".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("~/.cellsync/metadata.db")
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines on the console instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: default_log_directory(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("~/.cellsync/logs")
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
