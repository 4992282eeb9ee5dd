//! Proxy runtime subsystem.
//!
//! # Data Flow
//! ```text
//! Connection source (accepted client connections, one channel per instance)
//!     → ProxyRuntime::run (one long-lived task per instance)
//!     → dialer.rs (endpoint id → backend stream)
//!     → forwarding.rs (bidirectional copy, tracked for drain)
//!
//! ProxyRuntime::shutdown(timeout):
//!     stop consuming → wait for drain → force-close what is left
//! ```
//!
//! # Design Decisions
//! - The runtime is a collaborator behind a trait; the manager only drives run/shutdown
//! - One runtime per instance, created from a factory with that instance's context
//! - Shutdown never blocks longer than its timeout plus abort time

pub mod dialer;
pub mod forwarding;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::auth::AuthenticatedClient;
use crate::net::{Conn, ConnSet};

pub use dialer::{Dialer, StaticDialer};
pub use forwarding::{ForwardingFactory, ForwardingRuntime};

/// Lazy, unbounded sequence of accepted connections. Consumed once.
pub type ConnSource = mpsc::UnboundedReceiver<Conn>;

/// Errors produced by a proxy runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no backend address known for {0}")]
    UnknownEndpoint(String),

    #[error("failed to dial {endpoint}: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out dialing {0}")]
    DialTimeout(String),

    #[error("forwarding for {endpoint} failed: {source}")]
    Forward {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{remaining} connections still open after the termination timeout")]
    Drain { remaining: u64 },

    #[error("runtime setup failed: {0}")]
    Setup(String),
}

/// Everything a runtime needs to know about the instance it serves.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub instance: String,
    pub client: AuthenticatedClient,
    pub conn_set: Option<Arc<ConnSet>>,
    pub refresh_throttle: Duration,
    pub ip_address_types: Vec<String>,
    pub check_region: bool,
}

/// Accept-loop service forwarding client connections to backends.
#[async_trait]
pub trait ProxyRuntime: Send + Sync {
    /// Serve connections from `source` until shut down or the source ends.
    async fn run(&self, source: ConnSource) -> Result<(), RuntimeError>;

    /// Stop serving. Waits up to `timeout` for open connections, then closes them.
    async fn shutdown(&self, timeout: Duration) -> Result<(), RuntimeError>;
}

/// Creates one runtime per started instance.
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, ctx: RuntimeContext) -> Result<Arc<dyn ProxyRuntime>, RuntimeError>;
}
