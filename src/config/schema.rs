//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the manager.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest refresh throttle handed to the proxy runtime.
pub const MIN_REFRESH_THROTTLE: Duration = Duration::from_secs(1);

/// Root configuration for the proxy manager.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ManagerConfig {
    /// Local listener settings shared by every instance.
    pub listener: ListenerConfig,

    /// Instance discovery settings.
    pub instances: InstancesConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Static endpoint → `host:port` routes for the plain TCP dialer.
    pub backends: BTreeMap<String, String>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host every listener binds to.
    pub bind_host: String,

    /// Port for the first listener of an instance. 0 picks an ephemeral port.
    pub port: u16,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            port: 0,
            max_connections: 10_000,
        }
    }
}

/// Instance discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstancesConfig {
    /// Projects whose instances are listed through the SQL admin API.
    pub projects: Vec<String>,

    /// Metadata key watched for live instance list updates.
    pub metadata_source: Option<String>,

    /// Keep live connections in a shared container that Stop can close.
    pub track_connections: bool,

    /// SQL admin API base URL. Must end with `/`.
    pub api_host: Option<String>,

    /// Verify the instance region when fetching connection settings.
    pub check_region: bool,

    /// Preferred IP address types, in order.
    pub ip_address_types: Vec<String>,
}

impl Default for InstancesConfig {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            metadata_source: None,
            track_connections: false,
            api_host: None,
            check_region: false,
            ip_address_types: vec!["PUBLIC".to_string(), "PRIVATE".to_string()],
        }
    }
}

/// Timeout configuration for lifecycle operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long Stop waits for open connections to drain.
    pub term_timeout_secs: u64,

    /// Pause between metadata resubscriptions.
    pub watch_backoff_secs: u64,

    /// Minimum interval between connection settings refreshes.
    pub refresh_throttle_secs: u64,

    /// Backend dial timeout.
    pub dial_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            term_timeout_secs: 0,
            watch_backoff_secs: 5,
            refresh_throttle_secs: 60,
            dial_timeout_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn term_timeout(&self) -> Duration {
        Duration::from_secs(self.term_timeout_secs)
    }

    pub fn watch_backoff(&self) -> Duration {
        Duration::from_secs(self.watch_backoff_secs)
    }

    /// Refresh throttle, never below [`MIN_REFRESH_THROTTLE`].
    pub fn refresh_throttle(&self) -> Duration {
        Duration::from_secs(self.refresh_throttle_secs).max(MIN_REFRESH_THROTTLE)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// Filter used when `RUST_LOG` is not set.
    pub log_filter: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: "sqlproxy_manager=info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
