//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::net::BindTarget;

/// Root configuration for the distributor process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DistributorConfig {
    /// Distributor key sent with every handoff. Derived from the listener
    /// target when unset.
    pub key: Option<String>,

    /// Shared listening socket.
    pub listener: ListenerConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// In-process workers started by the binary.
    pub workers: WorkerPoolConfig,
}

impl DistributorConfig {
    /// Key identifying this distributor to its workers.
    pub fn distributor_key(&self) -> String {
        match (&self.key, self.listener.bind_target()) {
            (Some(key), _) => key.clone(),
            (None, Some(target)) => target.to_string(),
            (None, None) => String::new(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0").
    pub address: Option<String>,

    /// Bind port. 0 picks an ephemeral port.
    pub port: Option<u16>,

    /// Inherited listening socket. Takes precedence over address/port.
    pub fd: Option<i32>,

    /// Maximum accepted connections not yet taken by a worker (backpressure).
    /// Each worker may hold an even share of it.
    pub max_pending: usize,
}

impl ListenerConfig {
    /// Resolve where to listen, if enough was configured.
    pub fn bind_target(&self) -> Option<BindTarget> {
        if let Some(fd) = self.fd {
            return Some(BindTarget::Fd(fd));
        }
        match (&self.address, self.port) {
            (Some(address), Some(port)) => Some(BindTarget::Address {
                address: address.clone(),
                port,
            }),
            _ => None,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: Some("0.0.0.0".to_string()),
            port: Some(8080),
            fd: None,
            max_pending: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Demo worker pool run by the binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of workers to register.
    pub count: usize,

    /// Reject every n-th handoff (0 = never). Exercises the retry path.
    pub reject_every: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            count: 4,
            reject_every: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: DistributorConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.max_pending, 10_000);
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.distributor_key(), "0.0.0.0:8080");
    }

    #[test]
    fn fd_takes_precedence() {
        let config: DistributorConfig = toml::from_str(
            r#"
            [listener]
            address = "127.0.0.1"
            port = 9000
            fd = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.bind_target(), Some(BindTarget::Fd(3)));
        assert_eq!(config.distributor_key(), "fd:3");
    }

    #[test]
    fn explicit_key_wins() {
        let config: DistributorConfig = toml::from_str(r#"key = "edge""#).unwrap();
        assert_eq!(config.distributor_key(), "edge");
    }
}
