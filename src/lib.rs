//! Multi-instance database proxy manager.
//!
//! # Architecture Overview
//!
//! ```text
//!     C host / CLI
//!          │
//!          ▼
//!     ┌──────────┐   start/stop/status   ┌─────────────────────────────────────────────┐
//!     │   ffi    │──────────────────────▶│                  manager                    │
//!     │  main.rs │                       │  registry ◀── bridge ──▶ status sink        │
//!     └──────────┘                       │     │                                       │
//!                                        │     ▼ per instance                          │
//!                                        │  auth ─▶ discovery ─▶ build ─▶ net listeners │
//!                                        │                                │            │
//!                                        │                  connection source          │
//!                                        │                                ▼            │
//!                                        │                      runtime (forwarding)   │
//!                                        └─────────────────────────────────────────────┘
//!
//!     Cross-cutting: config, observability, resilience, lifecycle
//! ```

pub mod auth;
pub mod config;
pub mod discovery;
pub mod ffi;
pub mod instance;
pub mod lifecycle;
pub mod manager;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod runtime;

pub use auth::AuthConfig;
pub use config::ManagerConfig;
pub use instance::Status;
pub use lifecycle::shutdown::Shutdown;
pub use manager::{Collaborators, ManagerError, ProxyManager, StatusSink};
