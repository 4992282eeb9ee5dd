//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, hosts and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ManagerConfig → Result<(), Vec<ValidationError>>

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;
use url::Url;

use crate::config::schema::ManagerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listener.bind_host {0:?} is not an IP address")]
    InvalidBindHost(String),

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("instances.api_host {0:?} should always end with /")]
    ApiHostMissingSlash(String),

    #[error("instances.api_host {0:?} is not a valid URL")]
    InvalidApiHost(String),

    #[error("backend {endpoint:?} has invalid address {address:?}")]
    InvalidBackendAddress { endpoint: String, address: String },

    #[error("timeouts.watch_backoff_secs must be greater than zero")]
    ZeroWatchBackoff,

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ManagerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_host.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::InvalidBindHost(
            config.listener.bind_host.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }

    if let Some(host) = &config.instances.api_host {
        if !host.ends_with('/') {
            errors.push(ValidationError::ApiHostMissingSlash(host.clone()));
        } else if Url::parse(host).is_err() {
            errors.push(ValidationError::InvalidApiHost(host.clone()));
        }
    }

    for (endpoint, address) in &config.backends {
        if address.rsplit_once(':').and_then(|(_, p)| p.parse::<u16>().ok()).is_none() {
            errors.push(ValidationError::InvalidBackendAddress {
                endpoint: endpoint.clone(),
                address: address.clone(),
            });
        }
    }

    if config.timeouts.watch_backoff_secs == 0 {
        errors.push(ValidationError::ZeroWatchBackoff);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
