//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ManagerConfig (validated, immutable)
//!     → shared via Arc by the manager and every instance it starts
//!
//! Environment (read at the edges, never inside the registry):
//!     GOOGLE_APPLICATION_CREDENTIALS → ambient credential file
//!     INSTANCES                      → instance list when none is supplied
//!     SQLPROXY_MANAGER_CONFIG        → config path for the embedded host
//! ```
//!
//! # Design Decisions
//! - All fields have defaults so an empty file (or no file) is valid
//! - Validation separates syntactic (serde) from semantic checks
//! - Instance configuration is never persisted

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    InstancesConfig, ListenerConfig, LogFormat, ManagerConfig, ObservabilityConfig, TimeoutConfig,
};

/// Environment variable holding an instance list used when the caller supplies none.
pub const INSTANCES_ENV: &str = "INSTANCES";

/// Environment variable pointing at the config file for the embedded host.
pub const CONFIG_PATH_ENV: &str = "SQLPROXY_MANAGER_CONFIG";
