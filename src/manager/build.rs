//! Listener specs from explicit and discovered endpoints.
//!
//! # Responsibilities
//! - Merge explicit entries with project-derived endpoints, explicit first
//! - Drop duplicate endpoints (first occurrence wins)
//! - Resolve each entry's binding against the listener configuration

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::config::ListenerConfig;
use crate::instance::{Binding, InstanceEntry};

/// Errors produced while building listener specs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("invalid bind host {0:?}")]
    InvalidBindHost(String),

    #[error("no instances to proxy: the instance list is empty and no metadata source is configured")]
    NoEndpoints,
}

/// One listener to open: which endpoint it serves and where it binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    pub endpoint: String,
    pub bind: SocketAddr,
}

/// Resolve a single binding. The configured port only applies to the first listener.
pub fn resolve_bind(
    binding: Binding,
    listener: &ListenerConfig,
    first: bool,
) -> Result<SocketAddr, BuildError> {
    let host = || {
        listener
            .bind_host
            .parse::<IpAddr>()
            .map_err(|_| BuildError::InvalidBindHost(listener.bind_host.clone()))
    };

    Ok(match binding {
        Binding::Addr(addr) => addr,
        Binding::Port(port) => SocketAddr::new(host()?, port),
        Binding::Default if first => SocketAddr::new(host()?, listener.port),
        Binding::Default => SocketAddr::new(host()?, 0),
    })
}

/// Merge explicit entries and discovered endpoint ids into listener specs.
///
/// An empty result is an error unless `allow_empty` (push discovery will
/// supply endpoints later).
pub fn build_listener_specs(
    explicit: &[InstanceEntry],
    discovered: &[String],
    listener: &ListenerConfig,
    allow_empty: bool,
) -> Result<Vec<ListenerSpec>, BuildError> {
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(explicit.len() + discovered.len());

    let entries = explicit
        .iter()
        .map(|entry| (entry.connection.to_string(), entry.binding))
        .chain(discovered.iter().map(|id| (id.clone(), Binding::Default)));

    for (endpoint, binding) in entries {
        if !seen.insert(endpoint.clone()) {
            tracing::debug!(endpoint = %endpoint, "Skipping duplicate endpoint");
            continue;
        }
        let bind = resolve_bind(binding, listener, specs.is_empty())?;
        specs.push(ListenerSpec { endpoint, bind });
    }

    if specs.is_empty() && !allow_empty {
        return Err(BuildError::NoEndpoints);
    }
    Ok(specs)
}
