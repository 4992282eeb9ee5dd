//! Connection name and instance list parsing.
//!
//! # Responsibilities
//! - Split `project:region:name` (and domain-scoped `example.com:project:region:name`)
//! - Parse optional `=tcp:PORT` / `=tcp:HOST:PORT` local bindings
//! - Reject malformed entries before any listener is bound

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while parsing an instance spec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    /// The entry is not `project:region:name`.
    #[error("invalid connection name {0:?}: expected project:region:name")]
    Malformed(String),

    /// The binding suffix could not be parsed.
    #[error("invalid binding {binding:?} for {name}: expected tcp:PORT or tcp:HOST:PORT")]
    InvalidBinding { name: String, binding: String },

    /// Unix domain socket bindings are not supported.
    #[error("unix socket binding for {0} is not supported")]
    UnsupportedSocket(String),

    /// The spec contained no entries.
    #[error("no instances specified")]
    Empty,
}

/// A fully qualified Cloud SQL connection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionName {
    pub project: String,
    pub region: String,
    pub name: String,
}

impl ConnectionName {
    /// Parse `project:region:name`.
    ///
    /// When the first segment contains a dot it is a domain scope and the
    /// project spans two segments (`example.com:my-project`).
    pub fn parse(s: &str) -> Result<Self, SpecError> {
        let s = s.trim();
        let malformed = || SpecError::Malformed(s.to_string());

        let (first, rest) = s.split_once(':').ok_or_else(malformed)?;
        let (project, rest) = if first.contains('.') {
            let (scoped, rest) = rest.split_once(':').ok_or_else(malformed)?;
            (format!("{first}:{scoped}"), rest)
        } else {
            (first.to_string(), rest)
        };
        let (region, name) = rest.split_once(':').ok_or_else(malformed)?;

        if project.is_empty() || region.is_empty() || name.is_empty() || name.contains(':') {
            return Err(malformed());
        }

        Ok(Self {
            project,
            region: region.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for ConnectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.region, self.name)
    }
}

/// Where the local listener for an entry binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Use the configured bind host and port.
    Default,
    /// Configured bind host, explicit port.
    Port(u16),
    /// Explicit address.
    Addr(SocketAddr),
}

/// One entry of an instance spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEntry {
    pub connection: ConnectionName,
    pub binding: Binding,
}

impl InstanceEntry {
    /// Parse `connection[=tcp:PORT|=tcp:HOST:PORT]`.
    pub fn parse(s: &str) -> Result<Self, SpecError> {
        let (name, binding) = match s.split_once('=') {
            Some((name, opts)) => (name.trim(), Some(opts.trim())),
            None => (s.trim(), None),
        };
        let connection = ConnectionName::parse(name)?;

        let binding = match binding {
            None => Binding::Default,
            Some(opts) if opts.starts_with("unix:") => {
                return Err(SpecError::UnsupportedSocket(name.to_string()));
            }
            Some(opts) => {
                let invalid = || SpecError::InvalidBinding {
                    name: name.to_string(),
                    binding: opts.to_string(),
                };
                let target = opts.strip_prefix("tcp:").ok_or_else(invalid)?;
                if let Ok(port) = target.parse::<u16>() {
                    Binding::Port(port)
                } else {
                    Binding::Addr(target.parse().map_err(|_| invalid())?)
                }
            }
        };

        Ok(Self {
            connection,
            binding,
        })
    }
}

/// Parse a comma-separated instance list. Blank entries are skipped.
pub fn parse_instance_list(spec: &str) -> Result<Vec<InstanceEntry>, SpecError> {
    spec.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(InstanceEntry::parse)
        .collect()
}
