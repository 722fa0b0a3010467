mod telemetry;
mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use modconf::ModhostConfig;
use modstore::{FileModuleStore, StoreConfig};
use tokio_util::sync::CancellationToken;

/// Serves module archives over HTTP and accepts authenticated uploads.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file used instead of ./modhost.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and environment)
    #[arg(short, long)]
    port: Option<u16>,

    /// Storage root for module directories
    #[arg(long)]
    modules_dir: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut ModhostConfig) {
        if let Some(port) = self.port {
            config.bind.http_port = port;
        }
        if let Some(dir) = &self.modules_dir {
            config.paths.modules_dir = dir.clone();
        }
    }
}

fn store_config(config: &ModhostConfig) -> StoreConfig {
    StoreConfig::with_base_path(&config.paths.modules_dir)
        .with_max_artifact_bytes(config.limits.max_upload_bytes)
        .with_lock_timeout(Duration::from_millis(config.limits.lock_timeout_ms))
        .with_stale_lock_after(Duration::from_millis(config.limits.stale_lock_ms))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = ModhostConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    cli.apply(&mut config);

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(&config.telemetry).context("Failed to initialize logging")?;

    for file in &sources.files {
        tracing::info!(path = %file.display(), "loaded config file");
    }
    if !sources.env_overrides.is_empty() {
        tracing::info!(vars = ?sources.env_overrides, "applied environment overrides");
    }

    let store = FileModuleStore::new(store_config(&config))
        .context("Failed to initialize module store")?;
    tracing::info!(
        modules_dir = %config.paths.modules_dir.display(),
        max_upload_bytes = config.limits.max_upload_bytes,
        "module store ready"
    );

    if !config.uploads_enabled() {
        tracing::warn!("no upload token configured, all uploads will be refused");
    }

    let state = web::AppState::new(
        Arc::new(store),
        config.auth.upload_token.clone(),
        Duration::from_millis(config.limits.upload_timeout_ms),
    );

    let addr = config.bind.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(address = %listener.local_addr()?, "modhost listening");

    let shutdown_token = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown_token.clone()));

    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
            tracing::info!("Server shutdown signal received");
        })
        .await
        .context("Server error")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal(shutdown_token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate() => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
