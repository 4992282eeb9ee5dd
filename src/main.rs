//! sqlproxy-manager command line entry point.
//!
//! Starts every instance given on the command line (or in `INSTANCES`), then
//! waits for SIGTERM/SIGINT and stops them all. This is the only entry point
//! that exits the process on a failed start.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use sqlproxy_manager::config::{load_config, CONFIG_PATH_ENV};
use sqlproxy_manager::lifecycle::signals;
use sqlproxy_manager::observability::{logging, metrics};
use sqlproxy_manager::{AuthConfig, ManagerConfig, ProxyManager, Shutdown};

#[derive(Parser)]
#[command(name = "sqlproxy-manager", version)]
#[command(about = "Run and supervise Cloud SQL proxy instances", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to $SQLPROXY_MANAGER_CONFIG).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instance spec, e.g. `project:region:db=tcp:5432`. Repeat to run several instances.
    #[arg(short, long = "instances")]
    instances: Vec<String>,

    /// Service account or credential JSON file.
    #[arg(long, conflicts_with = "token")]
    credential_file: Option<String>,

    /// OAuth bearer token.
    #[arg(long)]
    token: Option<String>,

    /// Projects whose instances are discovered and proxied (overrides the config file).
    #[arg(long, value_delimiter = ',')]
    projects: Vec<String>,
}

impl Cli {
    fn auth(&self) -> AuthConfig {
        if let Some(path) = &self.credential_file {
            AuthConfig::file(path.clone())
        } else if let Some(token) = &self.token {
            AuthConfig::token(token.clone())
        } else {
            AuthConfig::ambient()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
    let mut config = match &config_path {
        Some(path) => load_config(path)?,
        None => ManagerConfig::default(),
    };
    if !cli.projects.is_empty() {
        config.instances.projects = cli.projects.clone();
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sqlproxy-manager starting");
    tracing::info!(
        config = ?config_path,
        bind_host = %config.listener.bind_host,
        projects = ?config.instances.projects,
        term_timeout_secs = config.timeouts.term_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let manager = ProxyManager::new(config)?;
    let auth = cli.auth();
    let specs = if cli.instances.is_empty() {
        vec![String::new()]
    } else {
        cli.instances.clone()
    };

    for spec in &specs {
        match manager.start(spec, auth.clone()).await {
            Ok(port) => tracing::info!(instance = %spec, port, "Ready for new connections"),
            Err(e) => {
                tracing::error!(instance = %spec, error = %e, "Failed to start instance");
                manager.stop_all().await;
                std::process::exit(1);
            }
        }
    }

    let shutdown = Shutdown::new();
    signals::listen(manager, &shutdown).await?;
    Ok(())
}
