//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT (ctrl-c elsewhere) → ProxyManager::stop_all, once
//!     → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → every subscriber wakes → process exits normally
//! ```
//!
//! # Design Decisions
//! - Only the CLI installs signal handlers; embedding hosts own their process
//! - Repeated signals never run stop_all twice
//! - Per-instance teardown order lives in the manager, not here

pub mod shutdown;
pub mod signals;
