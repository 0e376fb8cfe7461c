use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use ephemera_lifecycle::SendManager;
use ephemera_server::api::{self, AppState};
use ephemera_server::config::EphemeraConfig;
use ephemera_server::factory;

/// Ephemera file-drop HTTP server.
#[derive(Parser, Debug)]
#[command(name = "ephemera-server", about = "Standalone HTTP server for Ephemera")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "ephemera.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run database migrations for the configured store backend, then exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if !Path::new(&cli.config).exists() {
        info!(path = %cli.config, "config file not found, using defaults");
    }
    let mut config = EphemeraConfig::load(&cli.config)?;

    if let Some(Commands::Migrate) = cli.command {
        return run_migrate(&config).await;
    }

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let repository = factory::create_repository(&config.store).await?;
    info!(backend = %config.store.backend, "send repository initialized");
    let blobs = factory::create_blob_store(&config.blob).await?;
    info!(backend = %config.blob.backend, "blob store initialized");

    let manager = Arc::new(SendManager::new(
        repository,
        blobs,
        config.lifecycle_config(),
    ));

    let sweeper = if config.sweeper.enabled {
        let (mut sweeper, shutdown_tx) = manager.sweeper(config.sweeper_config()).build()?;
        let handle = tokio::spawn(async move {
            sweeper.run().await;
        });
        Some((handle, shutdown_tx))
    } else {
        info!("sweeper disabled on this instance");
        None
    };

    let state = AppState {
        manager: Arc::clone(&manager),
        limits: config.limits.clone(),
        base_url: config.server.base_url(),
    };
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "ephemera-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("http server stopped, draining sweeper");
    if let Some((handle, shutdown_tx)) = sweeper {
        let _ = shutdown_tx.send(()).await;
        let timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "sweeper task panicked"),
            Err(_) => warn!(
                timeout_seconds = config.server.shutdown_timeout_seconds,
                "sweeper did not stop within shutdown timeout"
            ),
        }
    }

    let snapshot = manager.metrics().snapshot();
    info!(
        created = snapshot.created,
        claims_granted = snapshot.claims_granted,
        reclaimed = snapshot.reclaimed,
        "ephemera-server shut down"
    );
    Ok(())
}

/// Run the `migrate` subcommand: initialize the store schema and exit.
async fn run_migrate(config: &EphemeraConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(backend = %config.store.backend, "running store migrations...");
    let _repository = factory::create_repository(&config.store).await?;
    info!(backend = %config.store.backend, "store migrations complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
