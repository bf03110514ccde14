//! Request handlers.
//!
//! Every torrent-scoped handler validates the `ih` query parameter first
//! and checks the session out of the loader, so malformed input never
//! touches any state and valid requests always participate in the
//! reference lifecycle.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::{PieceState, TorrentDescriptor};
use crate::events;
use crate::infohash::InfoHash;

use super::error::ApiError;
use super::pages;
use super::range::{self, RangeRequest};
use super::AppState;

/// Query parameters shared by the torrent-scoped endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct TorrentQuery {
    ih: Option<String>,
    nowait: Option<bool>,
    path: Option<String>,
}

fn parse_hash(query: &TorrentQuery) -> Result<InfoHash, ApiError> {
    let raw = query
        .ih
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("missing ih parameter".to_string()))?;
    Ok(raw.parse()?)
}

pub async fn index(State(state): State<AppState>) -> Html<String> {
    let mut sessions = state.engine.sessions();
    sessions.sort_by(|a, b| a.name.cmp(&b.name));
    Html(pages::index_page(&sessions))
}

pub async fn torrent_page(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Html<String>, ApiError> {
    let hash: InfoHash = hash.parse()?;
    // Lookup only: viewing the page must not create or reference a
    // session.
    let torrent = state
        .engine
        .get(hash)
        .ok_or_else(|| ApiError::NotFound("torrent not found".to_string()))?;
    Ok(Html(pages::torrent_page(&torrent.name(), hash)))
}

pub async fn status(State(state): State<AppState>) -> String {
    let mut out = String::new();
    out.push_str(&format!("tidegate v{}\n", crate::VERSION));
    out.push_str(&format!(
        "close_grace: {:?}\n",
        state.loader.close_grace()
    ));
    out.push_str(&format!(
        "tracked_sessions: {}\n",
        state.loader.registry().entry_count()
    ));
    state.engine.write_status(&mut out);
    out.push('\n');
    state.metrics.snapshot().render(&mut out);
    out
}

pub async fn info(
    State(state): State<AppState>,
    Query(query): Query<TorrentQuery>,
) -> Result<Response, ApiError> {
    let hash = parse_hash(&query)?;
    let lease = state.loader.checkout(hash);

    if query.nowait.unwrap_or(false) {
        if !lease.has_metadata() {
            return Err(ApiError::NotReady);
        }
    } else {
        // Abandoned when the client disconnects; the lease drop then
        // schedules the deferred release.
        lease.wait_metadata().await;
    }

    let bytes = lease
        .info_bytes()
        .ok_or_else(|| ApiError::NotFound("metadata unavailable".to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<TorrentQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let hash = parse_hash(&query)?;
    let lease = state.loader.checkout(hash);
    let shutdown = state.shutdown.clone();
    let metrics = Arc::clone(&state.metrics);
    Ok(ws.on_upgrade(move |socket| async move {
        let outcome = events::stream_events(socket, lease, shutdown, metrics).await;
        debug!(%hash, ?outcome, "event stream finished");
    }))
}

pub async fn data(
    State(state): State<AppState>,
    Query(query): Query<TorrentQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let hash = parse_hash(&query)?;
    let lease = state.loader.checkout(hash);
    // Content layout is unknown until metadata arrives.
    lease.wait_metadata().await;

    let path = query.path.as_deref();
    let length = lease.content_length(path).ok_or_else(|| {
        ApiError::NotFound(format!("file not found: {}", path.unwrap_or("(root)")))
    })?;

    match range::parse(headers.get(header::RANGE), length)? {
        RangeRequest::Full => {
            let body = lease.read_content(path, 0, length).await?;
            Ok((
                [
                    (header::CONTENT_TYPE, "application/octet-stream"),
                    (header::ACCEPT_RANGES, "bytes"),
                ],
                body,
            )
                .into_response())
        }
        RangeRequest::Slice { start, end } => {
            let body = lease.read_content(path, start, end - start + 1).await?;
            let mut response = (
                [
                    (header::CONTENT_TYPE, "application/octet-stream"),
                    (header::ACCEPT_RANGES, "bytes"),
                ],
                body,
            )
                .into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            let content_range = HeaderValue::try_from(format!("bytes {start}-{end}/{length}"))
                .map_err(|err| ApiError::Internal(err.to_string()))?;
            response
                .headers_mut()
                .insert(header::CONTENT_RANGE, content_range);
            Ok(response)
        }
    }
}

pub async fn file_state(
    State(state): State<AppState>,
    Query(query): Query<TorrentQuery>,
) -> Result<Json<Vec<PieceState>>, ApiError> {
    let hash = parse_hash(&query)?;
    let path = query
        .path
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("missing path parameter".to_string()))?;
    let lease = state.loader.checkout(hash);
    let pieces = lease
        .file_pieces(path)
        .ok_or_else(|| ApiError::NotFound(format!("file not found: {path}")))?;
    Ok(Json(pieces))
}

pub async fn metainfo(
    State(state): State<AppState>,
    Query(query): Query<TorrentQuery>,
    Json(descriptor): Json<TorrentDescriptor>,
) -> Result<StatusCode, ApiError> {
    let hash = parse_hash(&query)?;
    let lease = state.loader.checkout(hash);

    if !descriptor.trackers.is_empty() {
        lease.add_trackers(descriptor.trackers);
    }
    if let Some(bytes) = descriptor.info_bytes {
        lease.set_info_bytes(bytes)?;
    }

    // Persistence failures are logged, never surfaced.
    if let Err(error) = state.loader.persist(hash, lease.torrent()) {
        warn!(%hash, %error, "failed to persist descriptor");
    }
    Ok(StatusCode::OK)
}
