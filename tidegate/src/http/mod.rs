//! HTTP surface of the gateway.
//!
//! Routing and request glue only: every handler checks a session out of
//! the [`TorrentLoader`](crate::loader::TorrentLoader) and passes through
//! to the engine. The interesting lifecycle work lives in `loader`,
//! `registry`, and `events`; nothing from those layers escapes past the
//! handlers here.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::engine::TorrentEngine;
use crate::loader::TorrentLoader;
use crate::metrics::GatewayMetrics;
use crate::registry::RefRegistry;
use crate::store::DescriptorStore;

mod error;
mod handlers;
mod pages;
mod range;

pub use error::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub loader: Arc<TorrentLoader>,
    pub engine: Arc<dyn TorrentEngine>,
    pub metrics: Arc<GatewayMetrics>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire a complete gateway: fresh registry and metrics around the
    /// given engine and store.
    pub fn new(
        engine: Arc<dyn TorrentEngine>,
        store: Arc<dyn DescriptorStore>,
        close_grace: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Self {
        let metrics = Arc::new(GatewayMetrics::new());
        let registry = RefRegistry::new();
        let loader = Arc::new(TorrentLoader::new(
            Arc::clone(&engine),
            store,
            registry,
            close_grace,
            Arc::clone(&metrics),
        ));
        Self {
            loader,
            engine,
            metrics,
            shutdown,
        }
    }
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/torrent/:hash", get(handlers::torrent_page))
        .route("/data", get(handlers::data))
        .route("/status", get(handlers::status))
        .route("/info", get(handlers::info))
        .route("/events", get(handlers::events))
        .route("/fileState", get(handlers::file_state))
        .route("/metainfo", post(handlers::metainfo))
        .with_state(state)
}

/// Serve the gateway until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
