//! Transfer engine boundary.
//!
//! The gateway never performs network I/O itself. Everything that owns
//! pieces, peers, and transfer state sits behind the [`TorrentEngine`]
//! and [`Torrent`] traits; the gateway only brokers access to sessions
//! and streams their change events. [`MemoryEngine`] is the in-process
//! implementation used by the CLI and the test suite.
//!
//! # Dyn compatibility
//!
//! Async methods use [`BoxFuture`] so both traits stay usable as trait
//! objects; wait-style methods resolve immediately when the awaited
//! condition already holds.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infohash::InfoHash;

mod feed;
mod memory;

pub use feed::{ChangeEvents, ChangeFeed, SessionChange};
pub use memory::{MemoryEngine, MemorySession};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors surfaced across the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Metadata bytes were rejected by the session.
    #[error("metadata rejected: {0}")]
    InvalidMetadata(String),

    /// No file with the requested path exists in the session.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A content read fell outside the file.
    #[error("range out of bounds: offset {offset} past length {length}")]
    RangeOutOfBounds { offset: u64, length: u64 },

    /// The session has been shut down.
    #[error("session closed")]
    Closed,
}

/// Persisted shape of a session: announce tiers plus metadata bytes.
///
/// JSON at the HTTP boundary, bincode on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentDescriptor {
    /// Tracker announce tiers, outer list ordered by preference.
    #[serde(default)]
    pub trackers: Vec<Vec<String>>,

    /// Raw metadata bytes, absent while the session is metadata-less.
    #[serde(default)]
    pub info_bytes: Option<Vec<u8>>,
}

impl TorrentDescriptor {
    /// Whether the descriptor carries nothing worth merging.
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty() && self.info_bytes.is_none()
    }
}

/// One row of the session listing on the index page.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub info_hash: InfoHash,
    pub name: String,
    pub has_metadata: bool,
}

/// Completion state of one piece within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceState {
    pub index: u32,
    pub complete: bool,
}

/// Owner of all live sessions.
pub trait TorrentEngine: Send + Sync + 'static {
    /// Return the session for `hash`, creating it if absent.
    ///
    /// The bool reports whether a new session was created. A session
    /// that is already shutting down counts as absent.
    fn acquire_or_create(&self, hash: InfoHash) -> (Arc<dyn Torrent>, bool);

    /// Look up a live session without creating one.
    fn get(&self, hash: InfoHash) -> Option<Arc<dyn Torrent>>;

    /// Summaries of all live sessions, for the index page.
    fn sessions(&self) -> Vec<SessionSummary>;

    /// Append a human-readable status dump.
    fn write_status(&self, out: &mut String);
}

/// One live torrent session, shared by every request referencing its hash.
pub trait Torrent: Send + Sync + 'static {
    fn info_hash(&self) -> InfoHash;

    /// Display name; falls back to the hex hash until metadata names it.
    fn name(&self) -> String;

    /// Whether metadata bytes are available right now.
    fn has_metadata(&self) -> bool;

    /// Resolve once metadata is available; immediately if it already is.
    ///
    /// Never resolves on a session that closes without metadata - pair
    /// it with a cancellation branch in a `select!`.
    fn wait_metadata(&self) -> BoxFuture<'_, ()>;

    /// Resolve once the session has been shut down.
    fn wait_closed(&self) -> BoxFuture<'_, ()>;

    fn is_closed(&self) -> bool;

    /// Idempotent teardown: closes the change feed, wakes closed-waiters,
    /// and detaches the session from its engine. Only the registry's
    /// closer may call this on the gateway's behalf.
    fn shutdown(&self);

    /// Subscribe to piece-change events. Dropping the returned stream
    /// unsubscribes.
    fn subscribe_changes(&self) -> ChangeEvents;

    /// Merge tracker announce tiers into the session.
    fn add_trackers(&self, tiers: Vec<Vec<String>>);

    /// Install metadata bytes. A session keeps its first metadata; later
    /// calls are accepted and ignored.
    fn set_info_bytes(&self, bytes: Vec<u8>) -> Result<(), EngineError>;

    /// Raw metadata bytes, if available.
    fn info_bytes(&self) -> Option<Bytes>;

    /// Snapshot of the persistable state.
    fn descriptor(&self) -> TorrentDescriptor;

    /// Length of the named file, or of the whole content when `path` is
    /// `None`. `None` result means the file is unknown.
    fn content_length(&self, path: Option<&str>) -> Option<u64>;

    /// Read `len` bytes of content at `offset`.
    fn read_content(
        &self,
        path: Option<&str>,
        offset: u64,
        len: u64,
    ) -> BoxFuture<'_, Result<Bytes, EngineError>>;

    /// Per-piece completion for the named file.
    fn file_pieces(&self, path: &str) -> Option<Vec<PieceState>>;
}
