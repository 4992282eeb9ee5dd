//! Instance naming and status subsystem.
//!
//! # Data Flow
//! ```text
//! Caller-supplied spec ("proj:region:db=tcp:5432,proj:region:other")
//!     → name.rs (split into connection names + optional local binding)
//!     → manager builds one listener per entry
//!
//! Status (status.rs):
//!     connecting → connected → error → disconnected
//!     Only forward transitions are accepted within one run
//! ```
//!
//! # Design Decisions
//! - The spec string as given is the registry key; entries inside it are endpoints
//! - Unix socket bindings are rejected up front

pub mod name;
pub mod status;

pub use name::{parse_instance_list, Binding, ConnectionName, InstanceEntry, SpecError};
pub use status::Status;
