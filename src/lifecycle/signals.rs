//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGTERM or SIGINT (ctrl-c on non-unix targets)
//! - Run `stop_all` exactly once, however many signals arrive
//! - Wake everything subscribed to [`Shutdown`]
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A signal arriving during stop_all is logged and otherwise ignored

use std::io;

use crate::lifecycle::shutdown::Shutdown;
use crate::manager::ProxyManager;

/// Resolve when the process receives a termination signal.
#[cfg(unix)]
pub async fn termination() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = term.recv() => Ok("SIGTERM"),
        _ = int.recv() => Ok("SIGINT"),
    }
}

/// Resolve when the process receives a termination signal.
#[cfg(not(unix))]
pub async fn termination() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

/// Stop every instance once and trigger `shutdown`. Later calls are no-ops.
pub async fn shutdown_once(manager: &ProxyManager, shutdown: &Shutdown) -> bool {
    if !shutdown.begin() {
        tracing::debug!("Shutdown already in progress");
        return false;
    }
    manager.stop_all().await;
    shutdown.trigger();
    true
}

/// Wait for a termination signal, then shut the manager down.
pub async fn listen(manager: ProxyManager, shutdown: &Shutdown) -> io::Result<()> {
    let signal = termination().await?;
    tracing::info!(signal, "Termination signal received, stopping all instances");

    let stopping = shutdown_once(&manager, shutdown);
    tokio::pin!(stopping);
    loop {
        tokio::select! {
            _ = &mut stopping => break,
            extra = termination() => {
                let signal = extra?;
                tracing::warn!(signal, "Signal received while stopping; already shutting down");
            }
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
