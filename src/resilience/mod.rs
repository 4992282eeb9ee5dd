//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Transient failure (accept error, refused dial):
//!     → backoff.rs (exponential delay with jitter)
//!     → caller retries after the delay, unless cancelled
//! ```
//!
//! # Design Decisions
//! - Every wait is cancellable; a stopping instance never sits out a backoff
//! - Jitter keeps many listeners from retrying in lockstep

pub mod backoff;
