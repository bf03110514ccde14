//! In-memory transfer engine.
//!
//! A [`MemoryEngine`] keeps every session's state in process: metadata
//! arrives only through [`Torrent::set_info_bytes`] (typically via the
//! `/metainfo` endpoint or a merged descriptor), and content is seeded
//! through the [`MemorySession`] mutators. This is the engine the CLI
//! serves with and the one the test suite drives; a networked engine
//! plugs in behind the same traits.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::feed::{ChangeEvents, ChangeFeed, SessionChange};
use super::{
    BoxFuture, EngineError, PieceState, SessionSummary, Torrent, TorrentDescriptor, TorrentEngine,
};
use crate::infohash::InfoHash;

/// Engine holding every session in memory.
pub struct MemoryEngine {
    sessions: DashMap<InfoHash, Arc<MemorySession>>,
    this: Weak<MemoryEngine>,
}

impl MemoryEngine {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            sessions: DashMap::new(),
            this: weak.clone(),
        })
    }

    /// Concrete accessor for seeding sessions in tests and dev tooling.
    pub fn session(&self, hash: InfoHash) -> Option<Arc<MemorySession>> {
        self.sessions.get(&hash).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl TorrentEngine for MemoryEngine {
    fn acquire_or_create(&self, hash: InfoHash) -> (Arc<dyn Torrent>, bool) {
        match self.sessions.entry(hash) {
            Entry::Occupied(mut occupied) => {
                // A session that is already shutting down counts as
                // absent; hand out a fresh one in its place.
                if occupied.get().is_closed() {
                    let session = MemorySession::new(hash, self.this.clone());
                    occupied.insert(Arc::clone(&session));
                    (session, true)
                } else {
                    (Arc::clone(occupied.get()) as Arc<dyn Torrent>, false)
                }
            }
            Entry::Vacant(vacant) => {
                let session = MemorySession::new(hash, self.this.clone());
                vacant.insert(Arc::clone(&session));
                debug!(%hash, "session created");
                (session, true)
            }
        }
    }

    fn get(&self, hash: InfoHash) -> Option<Arc<dyn Torrent>> {
        self.sessions
            .get(&hash)
            .map(|entry| Arc::clone(entry.value()) as Arc<dyn Torrent>)
    }

    fn sessions(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                SessionSummary {
                    info_hash: session.info_hash(),
                    name: session.name(),
                    has_metadata: session.has_metadata(),
                }
            })
            .collect()
    }

    fn write_status(&self, out: &mut String) {
        use std::fmt::Write as _;

        let _ = writeln!(out, "sessions: {}", self.sessions.len());
        for entry in self.sessions.iter() {
            let session = entry.value();
            let _ = writeln!(
                out,
                "  {} name={:?} metadata={} subscribers={}",
                session.info_hash(),
                session.name(),
                session.has_metadata(),
                session.feed.subscriber_count(),
            );
        }
    }
}

struct ContentFile {
    path: String,
    data: Bytes,
    pieces: Vec<bool>,
}

#[derive(Default)]
struct SessionState {
    name: Option<String>,
    trackers: Vec<Vec<String>>,
    info_bytes: Option<Bytes>,
    files: Vec<ContentFile>,
}

/// One in-memory session.
pub struct MemorySession {
    hash: InfoHash,
    engine: Weak<MemoryEngine>,
    state: Mutex<SessionState>,
    meta: watch::Sender<bool>,
    closed: CancellationToken,
    feed: ChangeFeed,
}

impl MemorySession {
    fn new(hash: InfoHash, engine: Weak<MemoryEngine>) -> Arc<Self> {
        Arc::new(Self {
            hash,
            engine,
            state: Mutex::new(SessionState::default()),
            meta: watch::Sender::new(false),
            closed: CancellationToken::new(),
            feed: ChangeFeed::new(),
        })
    }

    /// Set the display name.
    pub fn set_name(&self, name: &str) {
        self.state.lock().name = Some(name.to_string());
    }

    /// Seed content for a file with all pieces incomplete.
    ///
    /// Replaces any existing file with the same path.
    pub fn add_content(&self, path: &str, data: impl Into<Bytes>, piece_count: u32) {
        let mut state = self.state.lock();
        state.files.retain(|file| file.path != path);
        state.files.push(ContentFile {
            path: path.to_string(),
            data: data.into(),
            pieces: vec![false; piece_count as usize],
        });
    }

    /// Mark a piece complete and publish the change event.
    ///
    /// Returns false if the file or piece is unknown.
    pub fn complete_piece(&self, path: &str, index: u32) -> bool {
        {
            let mut state = self.state.lock();
            let Some(file) = state.files.iter_mut().find(|file| file.path == path) else {
                return false;
            };
            let Some(piece) = file.pieces.get_mut(index as usize) else {
                return false;
            };
            *piece = true;
        }
        self.feed.publish(SessionChange::PieceChanged(index));
        true
    }

    /// Live subscription count, exposed for tests that must not publish
    /// before the subscriber is installed.
    pub fn change_subscriber_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    fn find_file<'a>(
        state: &'a SessionState,
        path: Option<&str>,
    ) -> Result<&'a ContentFile, EngineError> {
        match path {
            Some(path) => state
                .files
                .iter()
                .find(|file| file.path == path)
                .ok_or_else(|| EngineError::FileNotFound(path.to_string())),
            // Pathless access works only for single-file sessions.
            None => match state.files.as_slice() {
                [file] => Ok(file),
                _ => Err(EngineError::FileNotFound("(root)".to_string())),
            },
        }
    }
}

impl Torrent for MemorySession {
    fn info_hash(&self) -> InfoHash {
        self.hash
    }

    fn name(&self) -> String {
        self.state
            .lock()
            .name
            .clone()
            .unwrap_or_else(|| self.hash.hex())
    }

    fn has_metadata(&self) -> bool {
        *self.meta.borrow()
    }

    fn wait_metadata(&self) -> BoxFuture<'_, ()> {
        let mut rx = self.meta.subscribe();
        Box::pin(async move {
            // The sender lives as long as the session, so this only
            // resolves once metadata is installed.
            let _ = rx.wait_for(|ready| *ready).await;
        })
    }

    fn wait_closed(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.closed.clone().cancelled_owned())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn shutdown(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.feed.close();
        if let Some(engine) = self.engine.upgrade() {
            // Only remove ourselves; a replacement session under the same
            // hash must stay.
            engine.sessions.remove_if(&self.hash, |_, stored| {
                std::ptr::eq(Arc::as_ptr(stored), self as *const MemorySession)
            });
        }
        debug!(hash = %self.hash, "session shut down");
    }

    fn subscribe_changes(&self) -> ChangeEvents {
        self.feed.subscribe()
    }

    fn add_trackers(&self, tiers: Vec<Vec<String>>) {
        let mut state = self.state.lock();
        for tier in tiers {
            if !state.trackers.contains(&tier) {
                state.trackers.push(tier);
            }
        }
    }

    fn set_info_bytes(&self, bytes: Vec<u8>) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        if bytes.is_empty() {
            return Err(EngineError::InvalidMetadata("empty metadata".to_string()));
        }
        {
            let mut state = self.state.lock();
            // Metadata is immutable once set; later writes are accepted
            // and ignored.
            if state.info_bytes.is_some() {
                return Ok(());
            }
            state.info_bytes = Some(Bytes::from(bytes));
        }
        self.meta.send_replace(true);
        Ok(())
    }

    fn info_bytes(&self) -> Option<Bytes> {
        self.state.lock().info_bytes.clone()
    }

    fn descriptor(&self) -> TorrentDescriptor {
        let state = self.state.lock();
        TorrentDescriptor {
            trackers: state.trackers.clone(),
            info_bytes: state.info_bytes.as_ref().map(|bytes| bytes.to_vec()),
        }
    }

    fn content_length(&self, path: Option<&str>) -> Option<u64> {
        let state = self.state.lock();
        Self::find_file(&state, path)
            .ok()
            .map(|file| file.data.len() as u64)
    }

    fn read_content(
        &self,
        path: Option<&str>,
        offset: u64,
        len: u64,
    ) -> BoxFuture<'_, Result<Bytes, EngineError>> {
        let result = (|| {
            let state = self.state.lock();
            let file = Self::find_file(&state, path)?;
            let length = file.data.len() as u64;
            if offset > length {
                return Err(EngineError::RangeOutOfBounds { offset, length });
            }
            let end = offset.saturating_add(len).min(length);
            Ok(file.data.slice(offset as usize..end as usize))
        })();
        Box::pin(async move { result })
    }

    fn file_pieces(&self, path: &str) -> Option<Vec<PieceState>> {
        let state = self.state.lock();
        state
            .files
            .iter()
            .find(|file| file.path == path)
            .map(|file| {
                file.pieces
                    .iter()
                    .enumerate()
                    .map(|(index, complete)| PieceState {
                        index: index as u32,
                        complete: *complete,
                    })
                    .collect()
            })
    }
}
