//! inviter-server binary.

use clap::Parser;
use inviter_server::{
    BindingStore, DaemonManager, DaemonServer, JsonFileBindingStore, MemoryBindingStore,
    ServerConfig,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// inviter-server: daemon relay server
#[derive(Parser, Debug)]
#[command(name = "inviter-server", version, about = "Daemon relay server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Config file path
    #[arg(long, default_value = "~/.inviter/config.toml")]
    config: String,

    /// JSON file holding user bindings (in-memory when unset)
    #[arg(long)]
    store: Option<String>,

    /// Minimum daemon protocol version
    #[arg(long)]
    required_version: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting inviter-server");

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        cli.port,
        cli.bind,
        cli.store.as_deref(),
        cli.required_version.as_deref(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn BindingStore> = match &server_config.store_path {
        Some(path) => match JsonFileBindingStore::open(path).await {
            Ok(store) => {
                info!(path = %store.path().display(), "using JSON binding store");
                Arc::new(store)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to open binding store");
                std::process::exit(1);
            }
        },
        None => {
            warn!("no binding store configured, user bindings will not survive a restart");
            Arc::new(MemoryBindingStore::new())
        }
    };

    let manager = Arc::new(DaemonManager::new(store, server_config.request_timeout));
    let server = Arc::new(DaemonServer::new(server_config, manager));

    // Run until shutdown signal
    tokio::select! {
        result = server.clone().run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            server.shutdown(Duration::from_secs(5)).await;
        }
    }

    info!("inviter-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
