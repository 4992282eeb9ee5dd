//! Built-in TCP forwarding runtime.
//!
//! # Responsibilities
//! - Consume the instance's connection source
//! - Dial the backend for each connection and copy bytes both ways
//! - Track live connections so shutdown can drain, then force-close
//! - Register connections with the shared [`ConnSet`] when tracking is enabled

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::copy_bidirectional;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::net::{Conn, ConnSet, ConnectionTracker};
use crate::runtime::{
    ConnSource, Dialer, ProxyRuntime, RuntimeContext, RuntimeError, RuntimeFactory,
};

/// Forwards every accepted connection to the backend its endpoint maps to.
pub struct ForwardingRuntime {
    instance: String,
    dialer: Arc<dyn Dialer>,
    conn_set: Option<Arc<ConnSet>>,
    tracker: ConnectionTracker,
    tasks: TaskTracker,
    /// Stops consuming the connection source.
    stop: CancellationToken,
    /// Closes connections that outlived the drain timeout.
    force: CancellationToken,
}

impl ForwardingRuntime {
    pub fn new(
        instance: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        conn_set: Option<Arc<ConnSet>>,
    ) -> Self {
        Self {
            instance: instance.into(),
            dialer,
            conn_set,
            tracker: ConnectionTracker::new(),
            tasks: TaskTracker::new(),
            stop: CancellationToken::new(),
            force: CancellationToken::new(),
        }
    }

    /// Connections currently being forwarded.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    fn serve(&self, conn: Conn) {
        let guard = self.tracker.track();
        let id = guard.id();
        let endpoint = conn.endpoint.clone();
        let dialer = Arc::clone(&self.dialer);
        let force = self.force.clone();
        let conn_set = self.conn_set.clone();
        let instance = self.instance.clone();

        let task_endpoint = endpoint.clone();
        let handle = self.tasks.spawn(async move {
            let _guard = guard;
            tokio::select! {
                _ = force.cancelled() => {
                    tracing::debug!(instance = %instance, connection_id = %id, "Connection force closed");
                }
                result = forward(dialer.as_ref(), conn) => match result {
                    Ok((sent, received)) => tracing::debug!(
                        instance = %instance,
                        connection_id = %id,
                        sent,
                        received,
                        "Connection finished"
                    ),
                    Err(e) => tracing::warn!(
                        instance = %instance,
                        connection_id = %id,
                        error = %e,
                        "Connection failed"
                    ),
                }
            }
            if let Some(set) = conn_set {
                set.remove(&task_endpoint, id);
            }
        });

        if let Some(set) = &self.conn_set {
            if set.add(&endpoint, id, handle.abort_handle()) && handle.is_finished() {
                set.remove(&endpoint, id);
            }
        }
    }
}

async fn forward(dialer: &dyn Dialer, conn: Conn) -> Result<(u64, u64), RuntimeError> {
    let Conn {
        endpoint,
        mut stream,
        peer,
        permit: _permit,
    } = conn;

    let mut backend = dialer.dial(&endpoint).await?;
    tracing::trace!(endpoint = %endpoint, peer_addr = %peer, "Backend dialed");

    copy_bidirectional(&mut stream, &mut backend)
        .await
        .map_err(|source| RuntimeError::Forward { endpoint, source })
}

#[async_trait]
impl ProxyRuntime for ForwardingRuntime {
    async fn run(&self, mut source: ConnSource) -> Result<(), RuntimeError> {
        tracing::debug!(instance = %self.instance, "Forwarding runtime started");
        loop {
            let conn = tokio::select! {
                _ = self.stop.cancelled() => break,
                conn = source.recv() => match conn {
                    Some(conn) => conn,
                    None => break,
                },
            };
            self.serve(conn);
        }
        tracing::debug!(instance = %self.instance, "Forwarding runtime stopped");
        Ok(())
    }

    async fn shutdown(&self, timeout: Duration) -> Result<(), RuntimeError> {
        self.stop.cancel();
        self.tasks.close();

        if tokio::time::timeout(timeout, self.tracker.wait_idle())
            .await
            .is_ok()
        {
            return Ok(());
        }

        let remaining = self.tracker.active_count();
        tracing::warn!(
            instance = %self.instance,
            remaining,
            timeout = ?timeout,
            "Closing connections still open after termination timeout"
        );
        self.force.cancel();
        self.tasks.wait().await;
        Err(RuntimeError::Drain { remaining })
    }
}

/// Creates a [`ForwardingRuntime`] per instance sharing one dialer.
#[derive(Clone)]
pub struct ForwardingFactory {
    dialer: Arc<dyn Dialer>,
}

impl ForwardingFactory {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self { dialer }
    }
}

impl RuntimeFactory for ForwardingFactory {
    fn create(&self, ctx: RuntimeContext) -> Result<Arc<dyn ProxyRuntime>, RuntimeError> {
        tracing::debug!(
            instance = %ctx.instance,
            credentials = ctx.client.credentials().kind(),
            refresh_throttle = ?ctx.refresh_throttle,
            check_region = ctx.check_region,
            ip_address_types = ?ctx.ip_address_types,
            "Creating forwarding runtime"
        );
        Ok(Arc::new(ForwardingRuntime::new(
            ctx.instance,
            Arc::clone(&self.dialer),
            ctx.conn_set,
        )))
    }
}
