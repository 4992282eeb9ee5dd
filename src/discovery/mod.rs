//! Backend endpoint discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Pull (lister.rs):
//!     projects → one listing task per project (sqladmin.rs)
//!     → single aggregation channel → endpoint ids
//!     (per-project failures logged; empty result is an error)
//!
//! Push (watch.rs):
//!     metadata key → subscribe (metadata.rs) → instance list updates
//!     → on error: log, report, wait backoff, resubscribe
//!     → exits only when the owning instance cancels it
//! ```
//!
//! # Design Decisions
//! - Listing and subscribing are collaborator traits so tests can fake them
//! - Only second generation instances are proxied
//! - The watch loop's backoff wait is cancellable

pub mod lister;
pub mod metadata;
pub mod sqladmin;
pub mod watch;

use thiserror::Error;

pub use lister::{list_endpoints, DatabaseInstance, InstanceLister};
pub use metadata::{GceMetadataSubscriber, MetadataSubscriber};
pub use sqladmin::SqlAdminLister;
pub use watch::watch;

use crate::auth::AuthError;

/// Errors produced by discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no Cloud SQL instances found in these projects: {projects:?}")]
    NoInstances { projects: Vec<String> },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("subscription failed: {0}")]
    Subscribe(String),
}
