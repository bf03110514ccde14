//! Session checkout: cache loading plus request-scoped acquisition.
//!
//! Every torrent-scoped request goes through [`TorrentLoader::checkout`],
//! which ties the three lifecycle pieces together:
//!
//! ```text
//! checkout(hash)
//!   ├─ RefRegistry.acquire         (skipped when grace tracking is off)
//!   ├─ TorrentEngine.acquire_or_create
//!   ├─ RefRegistry.set_closer      (session shutdown, first writer wins)
//!   └─ on create: merge persisted descriptor,
//!                 spawn persist-on-ready task
//! ```
//!
//! The returned [`TorrentLease`] keeps the session referenced for the
//! life of the request; dropping it (request completion or client
//! disconnect, whichever comes first) schedules the grace-delayed
//! release. The session is therefore valid for at least the request
//! lifetime plus the grace window.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{Torrent, TorrentEngine};
use crate::infohash::InfoHash;
use crate::metrics::GatewayMetrics;
use crate::registry::{RefRegistry, TorrentRef};
use crate::store::{DescriptorStore, StoreError};

/// Creates sessions on demand and scopes references to requests.
pub struct TorrentLoader {
    engine: Arc<dyn TorrentEngine>,
    store: Arc<dyn DescriptorStore>,
    registry: Arc<RefRegistry>,
    close_grace: Option<Duration>,
    metrics: Arc<GatewayMetrics>,
}

impl TorrentLoader {
    /// `close_grace: None` disables reference tracking entirely; sessions
    /// then live until something else shuts them down.
    pub fn new(
        engine: Arc<dyn TorrentEngine>,
        store: Arc<dyn DescriptorStore>,
        registry: Arc<RefRegistry>,
        close_grace: Option<Duration>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            engine,
            store,
            registry,
            close_grace,
            metrics,
        }
    }

    pub fn close_grace(&self) -> Option<Duration> {
        self.close_grace
    }

    pub fn registry(&self) -> &Arc<RefRegistry> {
        &self.registry
    }

    /// Check out the session for `hash` on behalf of one request.
    ///
    /// Must run inside a tokio runtime: creation spawns the descriptor
    /// persistence task, and the lease schedules its deferred release.
    pub fn checkout(&self, hash: InfoHash) -> TorrentLease {
        let lease = self
            .close_grace
            .map(|grace| self.registry.acquire(hash, grace));

        let (torrent, created) = self.engine.acquire_or_create(hash);

        if lease.is_some() {
            // Attach teardown right after acquire, before another request
            // can race in; on an existing entry this is a no-op.
            let session = Arc::clone(&torrent);
            self.registry.set_closer(hash, move || session.shutdown());
        }

        if created {
            self.metrics.session_created();
            self.merge_cached_descriptor(hash, &torrent);
            self.spawn_persist_when_ready(hash, Arc::clone(&torrent));
        }

        TorrentLease {
            torrent,
            _lease: lease,
        }
    }

    /// Persist the session's current descriptor immediately.
    ///
    /// The result is for the caller's log line; persistence failures are
    /// never surfaced to requests.
    pub fn persist(&self, hash: InfoHash, torrent: &Arc<dyn Torrent>) -> Result<(), StoreError> {
        match self.store.save(hash, &torrent.descriptor()) {
            Ok(()) => {
                self.metrics.descriptor_saved();
                Ok(())
            }
            Err(err) => {
                self.metrics.descriptor_save_failed();
                Err(err)
            }
        }
    }

    /// Merge a previously persisted descriptor into a fresh session. A
    /// missing descriptor is the common case; load failures are demoted
    /// to the same outcome.
    fn merge_cached_descriptor(&self, hash: InfoHash, torrent: &Arc<dyn Torrent>) {
        match self.store.load(hash) {
            Ok(Some(descriptor)) => {
                if !descriptor.trackers.is_empty() {
                    torrent.add_trackers(descriptor.trackers);
                }
                if let Some(bytes) = descriptor.info_bytes {
                    if let Err(error) = torrent.set_info_bytes(bytes) {
                        warn!(%hash, %error, "cached metadata rejected");
                    }
                }
                self.metrics.descriptor_loaded();
                debug!(%hash, "merged cached descriptor");
            }
            Ok(None) => {}
            Err(error) => {
                warn!(%hash, %error, "failed to load cached descriptor");
            }
        }
    }

    /// Best-effort persistence once the session closes or obtains
    /// metadata, whichever happens first. Failures are logged and never
    /// retried.
    fn spawn_persist_when_ready(&self, hash: InfoHash, torrent: Arc<dyn Torrent>) {
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            tokio::select! {
                _ = torrent.wait_closed() => {}
                _ = torrent.wait_metadata() => {}
            }
            match store.save(hash, &torrent.descriptor()) {
                Ok(()) => {
                    metrics.descriptor_saved();
                    debug!(%hash, "descriptor persisted");
                }
                Err(error) => {
                    metrics.descriptor_save_failed();
                    warn!(%hash, %error, "failed to persist descriptor");
                }
            }
        });
    }
}

/// One request's hold on a session.
///
/// Derefs to the session. Dropping the lease schedules the grace-delayed
/// release of the registry reference (if tracking is enabled); the drop
/// happens on request completion or client disconnect, whichever comes
/// first, so acquire and release pair exactly once by construction.
pub struct TorrentLease {
    torrent: Arc<dyn Torrent>,
    _lease: Option<TorrentRef>,
}

impl TorrentLease {
    /// The shared session handle, for tasks that outlive the borrow.
    pub fn torrent(&self) -> &Arc<dyn Torrent> {
        &self.torrent
    }
}

impl Deref for TorrentLease {
    type Target = dyn Torrent;

    fn deref(&self) -> &Self::Target {
        &*self.torrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryEngine, TorrentDescriptor};
    use crate::store::FsStore;
    use tempfile::TempDir;

    fn hash(byte: u8) -> InfoHash {
        InfoHash::from_bytes([byte; 20])
    }

    struct Fixture {
        engine: Arc<MemoryEngine>,
        loader: TorrentLoader,
        metrics: Arc<GatewayMetrics>,
        registry: Arc<RefRegistry>,
        store: Arc<FsStore>,
        _temp: TempDir,
    }

    fn fixture(close_grace: Option<Duration>) -> Fixture {
        let temp = TempDir::new().unwrap();
        let engine = MemoryEngine::new();
        let registry = RefRegistry::new();
        let metrics = Arc::new(GatewayMetrics::new());
        let store = Arc::new(FsStore::new(temp.path().join("descriptors")));
        let loader = TorrentLoader::new(
            engine.clone(),
            store.clone(),
            Arc::clone(&registry),
            close_grace,
            Arc::clone(&metrics),
        );
        Fixture {
            engine,
            loader,
            metrics,
            registry,
            store,
            _temp: temp,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_keeps_session_through_grace() {
        let fx = fixture(Some(Duration::from_secs(2)));
        let h = hash(1);

        let lease = fx.loader.checkout(h);
        assert_eq!(fx.registry.ref_count(h), 1);
        drop(lease);

        // Still alive inside the grace window.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fx.engine.session_count(), 1);

        // Re-acquire before expiry cancels the pending close.
        let lease = fx.loader.checkout(h);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fx.engine.session_count(), 1);
        assert!(!lease.is_closed());

        // After the last release the grace window runs out for real.
        drop(lease);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fx.engine.session_count(), 0);
        assert_eq!(fx.registry.entry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_session_after_grace_expiry() {
        let fx = fixture(Some(Duration::from_secs(2)));
        let h = hash(2);

        let lease = fx.loader.checkout(h);
        drop(lease);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fx.engine.session_count(), 0);

        let lease = fx.loader.checkout(h);
        assert!(!lease.is_closed());
        assert_eq!(fx.metrics.snapshot().sessions_created, 2);
    }

    #[tokio::test]
    async fn test_disabled_grace_skips_registry() {
        let fx = fixture(None);
        let h = hash(3);

        let lease = fx.loader.checkout(h);
        assert_eq!(fx.registry.ref_count(h), 0);
        assert_eq!(fx.registry.entry_count(), 0);

        drop(lease);
        tokio::task::yield_now().await;
        // Without tracking, nothing tears the session down.
        assert_eq!(fx.engine.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_leases_share_one_session() {
        let fx = fixture(Some(Duration::from_secs(1)));
        let h = hash(4);

        let first = fx.loader.checkout(h);
        let second = fx.loader.checkout(h);
        assert_eq!(fx.registry.ref_count(h), 2);
        assert_eq!(fx.metrics.snapshot().sessions_created, 1);

        drop(first);
        tokio::time::sleep(Duration::from_secs(2)).await;
        // The other lease still holds the session.
        assert_eq!(fx.engine.session_count(), 1);
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn test_persisted_descriptor_merged_on_create() {
        let fx = fixture(None);
        let h = hash(5);
        let descriptor = TorrentDescriptor {
            trackers: vec![vec!["http://tracker.example/announce".to_string()]],
            info_bytes: Some(vec![7, 7, 7]),
        };
        fx.store.save(h, &descriptor).unwrap();

        let lease = fx.loader.checkout(h);
        // Merged before the lease is handed out.
        assert!(lease.has_metadata());
        assert_eq!(lease.info_bytes().unwrap().as_ref(), &[7, 7, 7]);
        assert_eq!(lease.descriptor().trackers, descriptor.trackers);
        assert_eq!(fx.metrics.snapshot().descriptors_loaded, 1);
    }

    #[tokio::test]
    async fn test_descriptor_persisted_once_metadata_arrives() {
        let fx = fixture(None);
        let h = hash(6);

        let lease = fx.loader.checkout(h);
        assert!(fx.store.load(h).unwrap().is_none());

        lease.set_info_bytes(vec![1, 2, 3]).unwrap();
        // The persist task runs detached; give it a moment.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if fx.store.load(h).unwrap().is_some() {
                break;
            }
        }
        let saved = fx.store.load(h).unwrap().expect("descriptor saved");
        assert_eq!(saved.info_bytes, Some(vec![1, 2, 3]));
        assert_eq!(fx.metrics.snapshot().descriptors_saved, 1);
    }

    #[tokio::test]
    async fn test_explicit_persist_reports_success() {
        let fx = fixture(None);
        let h = hash(7);
        let lease = fx.loader.checkout(h);
        lease.add_trackers(vec![vec!["udp://t.example:6969".to_string()]]);

        fx.loader.persist(h, lease.torrent()).unwrap();
        let saved = fx.store.load(h).unwrap().unwrap();
        assert_eq!(saved.trackers.len(), 1);
    }
}
