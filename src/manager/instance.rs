//! Resources owned by one running instance and their ordered teardown.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ListenerConfig;
use crate::instance::parse_instance_list;
use crate::manager::build::resolve_bind;
use crate::net::{Conn, ConnSet, Listener, ListenerHandle};
use crate::runtime::ProxyRuntime;

/// How long the runtime task may take to return after `shutdown` before it is aborted.
const RUN_EXIT_GRACE: Duration = Duration::from_secs(1);

/// Listeners of one instance plus the sender feeding its connection source.
///
/// Closing the set rejects later inserts, so a metadata update racing a stop
/// cannot open a listener after teardown.
pub(crate) struct ListenerSet {
    inner: Mutex<ListenerSetInner>,
}

struct ListenerSetInner {
    closed: bool,
    handles: Vec<ListenerHandle>,
    conn_tx: Option<mpsc::UnboundedSender<Conn>>,
}

impl ListenerSet {
    pub fn new(conn_tx: mpsc::UnboundedSender<Conn>) -> Self {
        Self {
            inner: Mutex::new(ListenerSetInner {
                closed: false,
                handles: Vec::new(),
                conn_tx: Some(conn_tx),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListenerSetInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start accepting on `listener`. Returns `None` once the set is closed.
    pub fn insert(&self, listener: Listener, endpoint: String) -> Option<SocketAddr> {
        let mut inner = self.lock();
        let conn_tx = match (&inner.conn_tx, inner.closed) {
            (Some(tx), false) => tx.clone(),
            _ => return None,
        };
        let handle = listener.spawn(endpoint, conn_tx);
        let addr = handle.local_addr();
        inner.handles.push(handle);
        Some(addr)
    }

    pub fn endpoints(&self) -> HashSet<String> {
        self.lock()
            .handles
            .iter()
            .map(|h| h.endpoint().to_string())
            .collect()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.lock().handles.iter().map(ListenerHandle::local_addr).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().handles.is_empty()
    }

    /// Close every listener, logging failures. Returns how many failed to close.
    pub async fn close_all(&self, instance: &str) -> usize {
        let handles = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.conn_tx = None;
            std::mem::take(&mut inner.handles)
        };

        let mut failed = 0;
        for handle in handles {
            let endpoint = handle.endpoint().to_string();
            if let Err(e) = handle.close().await {
                failed += 1;
                tracing::error!(instance = %instance, endpoint = %endpoint, error = %e, "Error closing listener");
            }
        }
        failed
    }
}

/// Push-discovery tasks: the watch loop and the reconciler consuming its updates.
pub(crate) struct WatchTasks {
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl WatchTasks {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: TaskTracker::new(),
        }
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Cancel both tasks and wait for them; dropping them closes the update channel.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Everything a successfully started instance owns.
pub(crate) struct Running {
    pub runtime: Arc<dyn ProxyRuntime>,
    pub run_task: JoinHandle<()>,
    pub conn_set: Option<Arc<ConnSet>>,
    pub listeners: Arc<ListenerSet>,
    pub watch: Option<WatchTasks>,
}

impl Running {
    /// Tear down in fixed order. Failures are logged and never stop later steps.
    pub async fn teardown(self, instance: &str, term_timeout: Duration) {
        // Unblock anything waiting on held connections.
        if let Some(conn_set) = &self.conn_set {
            let closed = conn_set.close();
            tracing::debug!(instance = %instance, closed, "Connection set closed");
        }

        if let Err(e) = self.runtime.shutdown(term_timeout).await {
            tracing::warn!(instance = %instance, error = %e, "Proxy runtime shutdown incomplete");
        }
        let mut run_task = self.run_task;
        if tokio::time::timeout(RUN_EXIT_GRACE, &mut run_task).await.is_err() {
            tracing::warn!(instance = %instance, "Proxy runtime did not exit after shutdown, aborting");
            run_task.abort();
        }

        let failed = self.listeners.close_all(instance).await;
        if failed > 0 {
            tracing::warn!(instance = %instance, failed, "Some listeners failed to close");
        }

        if let Some(watch) = self.watch {
            watch.stop().await;
        }
    }
}

/// Open listeners for endpoints announced by push discovery.
///
/// Known endpoints are skipped; an unparsable update is logged and ignored.
pub(crate) async fn reconcile(
    instance: String,
    listeners: Arc<ListenerSet>,
    config: ListenerConfig,
    mut updates: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            update = updates.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };

        let entries = match parse_instance_list(&update) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(instance = %instance, error = %e, "Ignoring malformed instance update");
                continue;
            }
        };

        let mut known = listeners.endpoints();
        for entry in entries {
            let endpoint = entry.connection.to_string();
            if known.contains(&endpoint) {
                continue;
            }

            let bind = match resolve_bind(entry.binding, &config, listeners.is_empty()) {
                Ok(bind) => bind,
                Err(e) => {
                    tracing::warn!(instance = %instance, endpoint = %endpoint, error = %e, "Cannot resolve listener address");
                    continue;
                }
            };
            let listener = match Listener::bind(bind, config.max_connections).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::warn!(instance = %instance, endpoint = %endpoint, error = %e, "Failed to open listener for new instance");
                    continue;
                }
            };

            match listeners.insert(listener, endpoint.clone()) {
                Some(addr) => {
                    tracing::info!(instance = %instance, endpoint = %endpoint, address = %addr, "Listener added from instance update");
                    known.insert(endpoint);
                }
                None => return,
            }
        }
    }
    tracing::debug!(instance = %instance, "Instance update reconciler stopped");
}
