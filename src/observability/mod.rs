//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → stdout (pretty for humans, JSON for collectors)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Instance name and endpoint are structured fields, never baked into messages
//! - Metrics are cheap (atomic increments) and no-ops until a recorder is installed
//! - Library users (FFI hosts) get the same logging as the CLI

pub mod logging;
pub mod metrics;
