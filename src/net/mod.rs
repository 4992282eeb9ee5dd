//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! One listener per backend endpoint (listener.rs)
//!     → accept loop (connection limit, accept-error backoff)
//!     → Conn { endpoint, stream } onto the instance's connection source
//!     → proxy runtime consumes the source
//!
//! Connection tracking (connection.rs):
//!     ConnectionTracker counts live connections for drain-on-shutdown
//!     ConnSet holds live connections so Stop can force them closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept via semaphore prevents resource exhaustion
//! - Each listener is closed by cancelling its accept task, then joining it
//! - The connection source ends once every listener and the instance drop their senders

pub mod connection;
pub mod listener;

pub use connection::{ConnSet, ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Conn, ConnectionPermit, Listener, ListenerError, ListenerHandle};
