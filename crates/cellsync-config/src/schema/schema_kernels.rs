//! Kernel and orchestration platform configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use cellsync_protocols::KernelKind;

/// Number of fixed ports every kernel container exposes.
pub const KERNEL_PORT_COUNT: u16 = 5;

/// Kernel lifecycle and provisioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelsConfig {
    #[serde(default = "default_max_lifetime", alias = "kernelMaxLifetime")]
    pub max_lifetime_ms: u64,

    #[serde(default = "default_sweep_interval", alias = "recycleSweepInterval")]
    pub sweep_interval_ms: u64,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// First of the five consecutive kernel ports.
    #[serde(default = "default_port_base")]
    pub port_base: u16,

    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u64,

    /// Shared HMAC secret for wire messages. Empty disables signing.
    #[serde(default)]
    pub signing_key: String,

    #[serde(default = "default_service_domain")]
    pub service_domain: String,

    #[serde(default = "default_shared_cache_claim")]
    pub shared_cache_claim: String,

    #[serde(default = "default_public_assets_claim")]
    pub public_assets_claim: String,

    #[serde(default = "default_user_volume_size")]
    pub user_volume_size: String,

    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    #[serde(default = "default_readiness_interval")]
    pub readiness_interval_ms: u64,

    #[serde(default = "default_readiness_connect_timeout")]
    pub readiness_connect_timeout_ms: u64,

    /// Container image per kernel kind.
    #[serde(default)]
    pub images: HashMap<String, String>,
}

impl Default for KernelsConfig {
    fn default() -> Self {
        Self {
            max_lifetime_ms: default_max_lifetime(),
            sweep_interval_ms: default_sweep_interval(),
            namespace: default_namespace(),
            port_base: default_port_base(),
            memory_limit_mb: default_memory_limit(),
            signing_key: String::new(),
            service_domain: default_service_domain(),
            shared_cache_claim: default_shared_cache_claim(),
            public_assets_claim: default_public_assets_claim(),
            user_volume_size: default_user_volume_size(),
            readiness_attempts: default_readiness_attempts(),
            readiness_interval_ms: default_readiness_interval(),
            readiness_connect_timeout_ms: default_readiness_connect_timeout(),
            images: HashMap::new(),
        }
    }
}

impl KernelsConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn readiness_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_connect_timeout_ms)
    }

    /// Image configured for a kernel kind.
    pub fn image_for(&self, kind: KernelKind) -> Option<&str> {
        self.images.get(kind.as_str()).map(String::as_str)
    }
}

fn default_max_lifetime() -> u64 {
    3_600_000
}

fn default_sweep_interval() -> u64 {
    300_000
}

fn default_namespace() -> String {
    "notebooks".to_string()
}

fn default_port_base() -> u16 {
    9000
}

fn default_memory_limit() -> u64 {
    2048
}

fn default_service_domain() -> String {
    "svc.cluster.local".to_string()
}

fn default_shared_cache_claim() -> String {
    "shared-cache".to_string()
}

fn default_public_assets_claim() -> String {
    "public-assets".to_string()
}

fn default_user_volume_size() -> String {
    "1Gi".to_string()
}

fn default_readiness_attempts() -> u32 {
    60
}

fn default_readiness_interval() -> u64 {
    500
}

fn default_readiness_connect_timeout() -> u64 {
    1_000
}

/// Orchestration platform API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Bearer token. When empty the token is read from `token_path`.
    #[serde(default)]
    pub token: String,

    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: String::new(),
            token_path: default_token_path(),
        }
    }
}

fn default_api_url() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_token_path() -> PathBuf {
    PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token")
}
