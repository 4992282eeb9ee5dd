//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live connections so shutdown can wait for drain
//! - Hold live connections in a closable container ([`ConnSet`])

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::AbortHandle;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks active connections for graceful shutdown.
///
/// Uses a watch channel so waiters wake as soon as the count reaches zero.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|n| *n += 1);
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until every tracked connection has closed.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Shared container of live connections, keyed by endpoint.
///
/// Written by the proxy runtime as connections open and close; closed by Stop
/// to force every held connection down and unblock anything waiting on them.
#[derive(Debug, Default)]
pub struct ConnSet {
    inner: Mutex<ConnSetInner>,
}

#[derive(Debug, Default)]
struct ConnSetInner {
    closed: bool,
    conns: HashMap<String, HashMap<ConnectionId, AbortHandle>>,
}

impl ConnSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ConnSetInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection. Returns `false` (and aborts it) once the set is closed.
    pub fn add(&self, endpoint: &str, id: ConnectionId, handle: AbortHandle) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            handle.abort();
            return false;
        }
        inner
            .conns
            .entry(endpoint.to_string())
            .or_default()
            .insert(id, handle);
        true
    }

    /// Forget a connection that finished on its own.
    pub fn remove(&self, endpoint: &str, id: ConnectionId) {
        let mut inner = self.lock();
        if let Some(conns) = inner.conns.get_mut(endpoint) {
            conns.remove(&id);
            if conns.is_empty() {
                inner.conns.remove(endpoint);
            }
        }
    }

    /// Number of live connections across all endpoints.
    pub fn len(&self) -> usize {
        self.lock().conns.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live connection count for one endpoint.
    pub fn count(&self, endpoint: &str) -> usize {
        self.lock().conns.get(endpoint).map_or(0, HashMap::len)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Abort every held connection and reject future ones. Returns how many were aborted.
    pub fn close(&self) -> usize {
        let drained: Vec<AbortHandle> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner
                .conns
                .drain()
                .flat_map(|(_, conns)| conns.into_values())
                .collect()
        };
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }
}
