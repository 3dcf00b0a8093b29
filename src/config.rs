//! Global constants and runtime configuration: bind address, port, default
//! common address, connection cap, and the store's batching parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-wide configuration. Every field has a sensible `Default`
/// matching the compile-time constants this gateway shipped with
/// historically; an operator may override via a YAML file loaded at
/// startup (see `main.rs`), but nothing here is hot-reloadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_address: String,
    pub port: u16,
    pub default_common_address: u16,
    pub max_connections: usize,
    pub listen_backlog: u32,
    pub batch_interval_ms: u64,
    pub worker_headroom: usize,
    pub listener_soft_leak_threshold: usize,
    pub rejection_log_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 2404,
            default_common_address: 1,
            max_connections: 10,
            listen_backlog: 10,
            batch_interval_ms: 100,
            worker_headroom: 24,
            listener_soft_leak_threshold: 10,
            rejection_log_interval_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_addr_string(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn rejection_log_interval(&self) -> Duration {
        Duration::from_secs(self.rejection_log_interval_secs)
    }

    /// Worker pool size: at least `max_connections + headroom`, per §6.
    pub fn worker_pool_size(&self) -> usize {
        (self.max_connections + self.worker_headroom).max(24)
    }

    /// Load from a YAML file, falling back to defaults for any field the
    /// file doesn't set (serde's `#[serde(default)]` on the struct).
    pub fn from_yaml_str(data: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(data)
    }
}
