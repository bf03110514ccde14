//! Tidegate CLI - serve the torrent session gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tidegate::config::{self, GatewayConfig};
use tidegate::engine::MemoryEngine;
use tidegate::http::{self, AppState};
use tidegate::store::FsStore;

#[derive(Debug, Parser)]
#[command(name = "tidegate", version, about = "HTTP gateway for torrent download sessions")]
struct Args {
    /// Path to the INI config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8080.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Seconds a session outlives its last reference; negative disables
    /// reference tracking entirely.
    #[arg(long)]
    close_grace_secs: Option<i64>,

    /// Directory for persisted session descriptors.
    #[arg(long)]
    store_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => match config::default_config_path() {
                Some(path) => GatewayConfig::load_or_default(&path)?,
                None => GatewayConfig::default(),
            },
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(secs) = self.close_grace_secs {
            config.close_grace = GatewayConfig::close_grace_from_secs(secs);
        }
        if let Some(dir) = self.store_dir {
            config.store_dir = dir;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tidegate=info")),
        )
        .init();

    let config = Args::parse().into_config()?;

    let engine = MemoryEngine::new();
    let store = Arc::new(FsStore::new(config.store_dir.clone()));
    let shutdown = CancellationToken::new();
    let state = AppState::new(engine, store, config.close_grace, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(
        listen = %config.listen,
        close_grace = ?config.close_grace,
        store_dir = %config.store_dir.display(),
        "tidegate listening"
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    http::serve(listener, state, shutdown).await?;
    info!("tidegate stopped");
    Ok(())
}
