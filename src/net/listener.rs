//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind one local address per backend endpoint
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Graceful handling of accept errors

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),
    /// The connection limit was closed; the listener is shutting down.
    #[error("connection limit closed")]
    LimitClosed,
    /// The accept task did not finish cleanly.
    #[error("accept task for {endpoint} failed: {reason}")]
    Join { endpoint: String, reason: String },
}

/// An accepted client connection bound for one backend endpoint.
#[derive(Debug)]
pub struct Conn {
    pub endpoint: String,
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub permit: ConnectionPermit,
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Address actually bound (resolved ephemeral port).
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `addr` with connection limits.
    pub async fn bind(addr: SocketAddr, max_connections: usize) -> Result<Self, ListenerError> {
        let bind_err = |source| ListenerError::Bind { addr, source };

        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        tracing::debug!(
            address = %local_addr,
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            local_addr,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::LimitClosed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::trace!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Run the accept loop in a background task, feeding `conns`.
    pub fn spawn(self, endpoint: String, conns: mpsc::UnboundedSender<Conn>) -> ListenerHandle {
        let cancel = CancellationToken::new();
        let local_addr = self.local_addr;
        let task = tokio::spawn(accept_loop(self, endpoint.clone(), conns, cancel.clone()));

        tracing::info!(endpoint = %endpoint, address = %local_addr, "Listening");

        ListenerHandle {
            endpoint,
            local_addr,
            cancel,
            task,
        }
    }
}

async fn accept_loop(
    listener: Listener,
    endpoint: String,
    conns: mpsc::UnboundedSender<Conn>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer, permit)) => {
                failures = 0;
                metrics::record_connection_accepted(&endpoint);
                let conn = Conn {
                    endpoint: endpoint.clone(),
                    stream,
                    peer,
                    permit,
                };
                if conns.send(conn).is_err() {
                    tracing::debug!(endpoint = %endpoint, "Connection source closed");
                    break;
                }
            }
            Err(ListenerError::LimitClosed) => break,
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = calculate_backoff(failures, 10, 1_000);
                tracing::warn!(endpoint = %endpoint, error = %e, delay = ?delay, "Accept failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    tracing::debug!(endpoint = %endpoint, address = %listener.local_addr, "Accept loop exited");
}

/// Owner handle of a running listener.
#[derive(Debug)]
pub struct ListenerHandle {
    endpoint: String,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and release the socket.
    pub async fn close(mut self) -> Result<(), ListenerError> {
        self.cancel.cancel();
        (&mut self.task).await.map_err(|e| ListenerError::Join {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        tracing::info!(endpoint = %self.endpoint, address = %self.local_addr, "Listener closed");
        Ok(())
    }
}

/// A handle dropped without `close` still stops its accept loop.
impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
