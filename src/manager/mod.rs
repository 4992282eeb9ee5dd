//! Multi-instance lifecycle manager.
//!
//! # Data Flow
//! ```text
//! start(name, auth):
//!     registry.insert_new (duplicate → AlreadyRunning)
//!     → report connecting
//!     → parse spec → resolve credentials → list project endpoints   (cancellable)
//!     → build listener specs → bind listeners → create runtime
//!     → spawn runtime task (confirmed launched) → optional watch + reconciler
//!     → report connected
//!     (any failure → report error, entry stays until stop)
//!
//! stop(name):
//!     report disconnected → cancel in-flight start → wait for start to settle
//!     → (a) close connection set
//!     → (b) runtime shutdown, bounded by term timeout
//!     → (c) close listeners
//!     → (d) cancel watch, close update channel
//!     → (e) remove from registry
//! ```
//!
//! # Design Decisions
//! - The registry map is the only cross-instance shared structure
//! - Per-instance resources sit behind an async lock held by start until launch
//!   finishes, so stop never sees a half-built instance
//! - Status only moves forward, so a start that loses a race with stop cannot
//!   report connected after disconnected

pub mod bridge;
pub mod build;
pub(crate) mod instance;
pub mod registry;

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::auth::{resolve, AmbientEnv, AuthConfig, AuthError, NoExchange, TokenExchange};
use crate::config::{ManagerConfig, INSTANCES_ENV};
use crate::discovery::{
    list_endpoints, watch, DiscoveryError, GceMetadataSubscriber, InstanceLister,
    MetadataSubscriber, SqlAdminLister,
};
use crate::instance::{parse_instance_list, SpecError, Status};
use crate::net::{ConnSet, Listener, ListenerError};
use crate::observability::metrics;
use crate::runtime::{
    ForwardingFactory, RuntimeContext, RuntimeError, RuntimeFactory, StaticDialer,
};

pub use bridge::{StatusBridge, StatusSink};
pub use build::{build_listener_specs, BuildError, ListenerSpec};
pub use registry::{InstanceSlot, Registry};

use instance::{reconcile, ListenerSet, Running, WatchTasks};

/// Errors returned by manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("instance {0} is already running")]
    AlreadyRunning(String),

    #[error("no instances given: INSTANCES is not set and no projects or metadata source are configured")]
    EmptyName,

    #[error("invalid instance spec: {0}")]
    Spec(#[from] SpecError),

    #[error("credentials: {0}")]
    Auth(#[from] AuthError),

    #[error("discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("{0}")]
    Build(#[from] BuildError),

    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("proxy runtime: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("start of {0} was cancelled by stop")]
    Cancelled(String),
}

/// External services the manager drives.
#[derive(Clone)]
pub struct Collaborators {
    pub lister: Arc<dyn InstanceLister>,
    pub subscriber: Arc<dyn MetadataSubscriber>,
    pub runtime_factory: Arc<dyn RuntimeFactory>,
    pub exchange: Arc<dyn TokenExchange>,
}

impl Collaborators {
    /// Production collaborators: SQL admin listing, GCE metadata, TCP forwarding.
    pub fn from_config(config: &ManagerConfig) -> Result<Self, ManagerError> {
        let exchange: Arc<dyn TokenExchange> = Arc::new(NoExchange);
        let lister = SqlAdminLister::new(config.instances.api_host.as_deref(), Arc::clone(&exchange))?;
        let subscriber = GceMetadataSubscriber::new(None)?;
        let dialer = Arc::new(StaticDialer::from_config(config));

        Ok(Self {
            lister: Arc::new(lister),
            subscriber: Arc::new(subscriber),
            runtime_factory: Arc::new(ForwardingFactory::new(dialer)),
            exchange,
        })
    }
}

struct Inner {
    config: ManagerConfig,
    ambient: AmbientEnv,
    ambient_instances: Option<String>,
    registry: Arc<Registry>,
    bridge: Arc<StatusBridge>,
    collaborators: Collaborators,
}

/// Handle to the instance registry. Clones share the same registry.
#[derive(Clone)]
pub struct ProxyManager {
    inner: Arc<Inner>,
}

impl ProxyManager {
    /// Manager with production collaborators and ambient state from the process environment.
    pub fn new(config: ManagerConfig) -> Result<Self, ManagerError> {
        let collaborators = Collaborators::from_config(&config)?;
        let ambient_instances = std::env::var(INSTANCES_ENV).ok();
        Ok(Self::with_collaborators(
            config,
            AmbientEnv::from_process_env(),
            ambient_instances,
            collaborators,
        ))
    }

    pub fn with_collaborators(
        config: ManagerConfig,
        ambient: AmbientEnv,
        ambient_instances: Option<String>,
        collaborators: Collaborators,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let bridge = Arc::new(StatusBridge::new(Arc::clone(&registry)));
        Self {
            inner: Arc::new(Inner {
                config,
                ambient,
                ambient_instances: ambient_instances.filter(|s| !s.trim().is_empty()),
                registry,
                bridge,
                collaborators,
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn set_sink(&self, sink: Arc<dyn StatusSink>) {
        self.inner.bridge.set_sink(sink);
    }

    pub fn remove_sink(&self) {
        self.inner.bridge.remove_sink();
    }

    pub fn status(&self, name: &str) -> Option<Status> {
        self.inner.registry.get(&self.key(name)).and_then(|slot| slot.status())
    }

    pub fn last_error(&self, name: &str) -> Option<String> {
        self.inner.registry.get(&self.key(name)).and_then(|slot| slot.last_error())
    }

    pub fn port(&self, name: &str) -> Option<u16> {
        self.inner.registry.get(&self.key(name)).and_then(|slot| slot.port())
    }

    /// Snapshot of registered instance names.
    pub fn names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Start an instance. Returns the port of its first listener (0 when it has none yet).
    ///
    /// An empty `name` falls back to the ambient instance list. Setup failures
    /// leave the entry registered with status `error` until it is stopped.
    pub async fn start(&self, name: &str, auth: AuthConfig) -> Result<u16, ManagerError> {
        let name = self.resolve_name(name)?;
        let slot = self.inner.registry.insert_new(&name)?;
        let mut resources = slot.resources.lock().await;

        tracing::info!(instance = %name, run_id = %slot.run_id(), "Starting instance");
        self.inner.bridge.report_slot(&slot, Status::Connecting, "");

        match self.launch(&slot, &name, &auth).await {
            Ok((running, port)) => {
                slot.set_port(port);
                *resources = Some(running);
                drop(resources);
                metrics::record_instance_started(&name);
                if self.inner.bridge.report_slot(&slot, Status::Connected, "") {
                    tracing::info!(instance = %name, port, "Instance connected");
                }
                Ok(port)
            }
            Err(ManagerError::Cancelled(name)) => {
                tracing::info!(instance = %name, "Start cancelled by stop");
                Err(ManagerError::Cancelled(name))
            }
            Err(e) => {
                drop(resources);
                tracing::error!(instance = %name, error = %e, "Instance failed to start");
                self.inner.bridge.report_slot(&slot, Status::Error, &e.to_string());
                Err(e)
            }
        }
    }

    /// Stop an instance. Unknown names are a no-op.
    pub async fn stop(&self, name: &str) {
        let key = self.key(name);
        let name = key.as_str();
        let Some(slot) = self.inner.registry.get(name) else {
            tracing::debug!(instance = %name, "Stop for unknown instance ignored");
            return;
        };

        self.inner.bridge.report_slot(&slot, Status::Disconnected, "");
        slot.cancel.cancel();

        let running = slot.resources.lock().await.take();
        if let Some(running) = running {
            running
                .teardown(name, self.inner.config.timeouts.term_timeout())
                .await;
            metrics::record_instance_stopped();
        }

        if self.inner.registry.remove(&slot) {
            tracing::info!(instance = %name, "Instance stopped");
        }
    }

    /// Stop every registered instance concurrently.
    pub async fn stop_all(&self) {
        let names = self.inner.registry.names();
        tracing::info!(count = names.len(), "Stopping all instances");

        let mut stops = JoinSet::new();
        for name in names {
            let manager = self.clone();
            stops.spawn(async move { manager.stop(&name).await });
        }
        while let Some(result) = stops.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Stop task failed");
            }
        }
    }

    /// Registry key for a caller-supplied name. Every keyed operation goes through here.
    fn key(&self, name: &str) -> String {
        let name = name.trim();
        match &self.inner.ambient_instances {
            Some(list) if name.is_empty() => list.trim().to_string(),
            _ => name.to_string(),
        }
    }

    fn resolve_name(&self, name: &str) -> Result<String, ManagerError> {
        let key = self.key(name);
        let instances = &self.inner.config.instances;
        // Discovery alone supplies the endpoints; the empty spec is the key.
        if key.is_empty() && instances.projects.is_empty() && instances.metadata_source.is_none() {
            return Err(ManagerError::EmptyName);
        }
        Ok(key)
    }

    async fn launch(
        &self,
        slot: &Arc<InstanceSlot>,
        name: &str,
        auth: &AuthConfig,
    ) -> Result<(Running, u16), ManagerError> {
        let config = &self.inner.config;
        let collaborators = &self.inner.collaborators;
        let cancel = &slot.cancel;

        let explicit = parse_instance_list(name)?;

        let client = cancellable(cancel, name, resolve(auth, &self.inner.ambient)).await?;
        let discovered = cancellable(
            cancel,
            name,
            list_endpoints(
                Arc::clone(&collaborators.lister),
                &client,
                &config.instances.projects,
            ),
        )
        .await?;

        let metadata_source = config.instances.metadata_source.clone();
        let specs = build_listener_specs(
            &explicit,
            &discovered,
            &config.listener,
            metadata_source.is_some(),
        )?;

        let mut bound = Vec::with_capacity(specs.len());
        for spec in specs {
            if cancel.is_cancelled() {
                return Err(ManagerError::Cancelled(name.to_string()));
            }
            // Already-bound listeners are released when `bound` drops.
            let listener = Listener::bind(spec.bind, config.listener.max_connections).await?;
            bound.push((spec.endpoint, listener));
        }
        if cancel.is_cancelled() {
            return Err(ManagerError::Cancelled(name.to_string()));
        }

        let conn_set = config
            .instances
            .track_connections
            .then(|| Arc::new(ConnSet::new()));
        let runtime = collaborators.runtime_factory.create(RuntimeContext {
            instance: name.to_string(),
            client,
            conn_set: conn_set.clone(),
            refresh_throttle: config.timeouts.refresh_throttle(),
            ip_address_types: config.instances.ip_address_types.clone(),
            check_region: config.instances.check_region,
        })?;

        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let listeners = Arc::new(ListenerSet::new(conn_tx));
        for (endpoint, listener) in bound {
            listeners.insert(listener, endpoint);
        }
        let port = listeners.addrs().first().map_or(0, |addr| addr.port());

        let (launched_tx, launched_rx) = oneshot::channel();
        let run_task = {
            let runtime = Arc::clone(&runtime);
            let bridge = Arc::clone(&self.inner.bridge);
            let slot = Arc::clone(slot);
            tokio::spawn(async move {
                let _ = launched_tx.send(());
                let result = runtime.run(conn_rx).await;
                if slot.cancel.is_cancelled() {
                    return;
                }
                match result {
                    Ok(()) => {
                        tracing::warn!(instance = %slot.name(), "Proxy runtime exited");
                        bridge.report_slot(&slot, Status::Error, "proxy runtime exited");
                    }
                    Err(e) => {
                        tracing::error!(instance = %slot.name(), error = %e, "Proxy runtime failed");
                        bridge.report_slot(&slot, Status::Error, &e.to_string());
                    }
                }
            })
        };

        let mut running = Running {
            runtime,
            run_task,
            conn_set,
            listeners: Arc::clone(&listeners),
            watch: None,
        };

        if launched_rx.await.is_err() {
            let detail = "proxy runtime task exited before launch";
            running.teardown(name, config.timeouts.term_timeout()).await;
            return Err(ManagerError::Runtime(RuntimeError::Setup(detail.to_string())));
        }

        if let Some(source) = metadata_source {
            running.watch = Some(self.spawn_watch(slot, name, source, listeners));
        }

        Ok((running, port))
    }

    fn spawn_watch(
        &self,
        slot: &Arc<InstanceSlot>,
        name: &str,
        source: String,
        listeners: Arc<ListenerSet>,
    ) -> WatchTasks {
        let cancel = CancellationToken::new();
        let tasks = WatchTasks::new(cancel.clone());
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let bridge = Arc::clone(&self.inner.bridge);
        let error_slot = Arc::clone(slot);
        tasks.spawn(watch(
            Arc::clone(&self.inner.collaborators.subscriber),
            source,
            updates_tx,
            self.inner.config.timeouts.watch_backoff(),
            cancel.clone(),
            move |e| {
                bridge.report_slot(&error_slot, Status::Error, &e.to_string());
            },
        ));
        tasks.spawn(reconcile(
            name.to_string(),
            listeners,
            self.inner.config.listener.clone(),
            updates_rx,
            cancel,
        ));
        tasks
    }
}

/// Run a setup step unless the instance is stopped first.
async fn cancellable<T, E, F>(
    cancel: &CancellationToken,
    name: &str,
    step: F,
) -> Result<T, ManagerError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ManagerError>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(ManagerError::Cancelled(name.to_string())),
        result = step => result.map_err(Into::into),
    }
}
