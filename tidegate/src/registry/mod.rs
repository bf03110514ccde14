//! Reference counting for shared torrent sessions.
//!
//! Many concurrent requests may hold an interest in the same session. The
//! [`RefRegistry`] tracks a per-infohash reference count together with a
//! one-shot closer that tears the session down once the count reaches
//! zero. Releases are deferred: dropping a [`TorrentRef`] schedules the
//! decrement after the guard's grace delay, so the count stays positive
//! through the grace window and a re-acquire during that window keeps the
//! session alive without any timer bookkeeping.
//!
//! # Invariants
//!
//! - The count for a hash never goes negative: each [`TorrentRef`] is a
//!   single-use capability released exactly once, by its `Drop` impl.
//! - The closer for an entry runs at most once: it is taken out of the
//!   entry at the zero transition and the entry is removed.
//! - `set_closer` is first-write-wins while an entry is live; an in-flight
//!   closer is never silently replaced.
//!
//! All mutations for one hash are serialized under the table mutex;
//! distinct hashes proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::infohash::InfoHash;

type Closer = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Entry {
    count: u64,
    closer: Option<Closer>,
}

/// Process-wide table of per-infohash reference counts.
#[derive(Default)]
pub struct RefRegistry {
    entries: Mutex<HashMap<InfoHash, Entry>>,
}

impl RefRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register interest in `hash`, creating the entry if absent.
    ///
    /// The returned guard releases the reference when dropped, after
    /// waiting out `release_delay`.
    pub fn acquire(self: &Arc<Self>, hash: InfoHash, release_delay: Duration) -> TorrentRef {
        let mut entries = self.entries.lock();
        let entry = entries.entry(hash).or_default();
        entry.count += 1;
        trace!(%hash, count = entry.count, "reference acquired");
        TorrentRef {
            registry: Arc::clone(self),
            hash,
            release_delay,
        }
    }

    /// Attach the teardown action for `hash`.
    ///
    /// Only the first closer for a live entry is kept; later calls are
    /// no-ops so that an in-flight closer cannot be replaced from under a
    /// pending zero transition. Returns whether the closer was installed.
    pub fn set_closer<F>(&self, hash: InfoHash, closer: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut entries = self.entries.lock();
        match entries.get_mut(&hash) {
            Some(entry) if entry.closer.is_none() => {
                entry.closer = Some(Box::new(closer));
                true
            }
            Some(_) => false,
            None => {
                warn!(%hash, "set_closer for unregistered hash ignored");
                false
            }
        }
    }

    /// Current reference count for `hash` (0 if no entry exists).
    pub fn ref_count(&self, hash: InfoHash) -> u64 {
        self.entries
            .lock()
            .get(&hash)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    /// Number of live entries, for status reporting.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    fn release(&self, hash: InfoHash) {
        let closer = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&hash) else {
                warn!(%hash, "release for unregistered hash ignored");
                return;
            };
            entry.count -= 1;
            trace!(%hash, count = entry.count, "reference released");
            if entry.count > 0 {
                return;
            }
            entries.remove(&hash).and_then(|entry| entry.closer)
        };
        if let Some(closer) = closer {
            debug!(%hash, "last reference gone, running closer");
            closer();
        }
    }
}

/// One request's claim on a session.
///
/// Single-use by construction: the release happens in `Drop`, so it can
/// be neither skipped nor duplicated. The decrement is scheduled on the
/// current tokio runtime after `release_delay`; outside a runtime it is
/// applied inline.
pub struct TorrentRef {
    registry: Arc<RefRegistry>,
    hash: InfoHash,
    release_delay: Duration,
}

impl Drop for TorrentRef {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let hash = self.hash;
        let delay = self.release_delay;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    registry.release(hash);
                });
            }
            Err(_) => registry.release(hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hash(byte: u8) -> InfoHash {
        InfoHash::from_bytes([byte; 20])
    }

    fn fired_counter(registry: &Arc<RefRegistry>, hash: InfoHash) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        registry.set_closer(hash, move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        fired
    }

    #[tokio::test(start_paused = true)]
    async fn test_closer_fires_after_grace() {
        let registry = RefRegistry::new();
        let h = hash(1);
        let guard = registry.acquire(h, Duration::from_secs(2));
        let fired = fired_counter(&registry, h);

        drop(guard);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "grace window still open");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.ref_count(h), 0);
        assert_eq!(registry.entry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquire_during_grace_cancels_close() {
        let registry = RefRegistry::new();
        let h = hash(2);
        let guard = registry.acquire(h, Duration::from_secs(2));
        let fired = fired_counter(&registry, h);

        drop(guard);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = registry.acquire(h, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            fired.load(Ordering::SeqCst),
            0,
            "closer must not fire while a live reference exists"
        );
        assert_eq!(registry.ref_count(h), 1);

        drop(second);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquire_after_grace_sees_fresh_entry() {
        let registry = RefRegistry::new();
        let h = hash(3);
        let guard = registry.acquire(h, Duration::from_secs(2));
        let fired = fired_counter(&registry, h);

        drop(guard);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Fresh entry: no closer installed yet, count restarts at 1.
        let _second = registry.acquire(h, Duration::from_secs(2));
        assert_eq!(registry.ref_count(h), 1);
        let refired = fired_counter(&registry, h);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(refired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_closer_keeps_first_writer() {
        let registry = RefRegistry::new();
        let h = hash(4);
        let guard = registry.acquire(h, Duration::ZERO);

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&first);
        assert!(registry.set_closer(h, move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = Arc::clone(&second);
        assert!(!registry.set_closer(h, move || {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        drop(guard);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_hashes_are_independent() {
        let registry = RefRegistry::new();
        let a = hash(5);
        let b = hash(6);
        let guard_a = registry.acquire(a, Duration::from_secs(1));
        let _guard_b = registry.acquire(b, Duration::from_secs(10));
        let fired_a = fired_counter(&registry, a);
        let fired_b = fired_counter(&registry, b);

        drop(guard_a);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired_a.load(Ordering::SeqCst), 1);
        assert_eq!(fired_b.load(Ordering::SeqCst), 0);
        assert_eq!(registry.ref_count(b), 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Acquire,
            Release,
        }

        fn ops() -> impl Strategy<Value = Vec<Op>> {
            proptest::collection::vec(
                prop_oneof![Just(Op::Acquire), Just(Op::Release)],
                0..64,
            )
        }

        proptest! {
            /// Arbitrary acquire/release interleavings: the observable
            /// count always matches the number of live guards, and the
            /// closer fires exactly once per zero transition.
            ///
            /// Runs without a tokio runtime so guard drops release
            /// inline and deterministically.
            #[test]
            fn count_tracks_guards_and_closer_fires_per_zero(ops in ops()) {
                let registry = RefRegistry::new();
                let h = InfoHash::from_bytes([7; 20]);
                let fired = Arc::new(AtomicUsize::new(0));
                let mut guards = Vec::new();
                let mut zero_transitions = 0usize;

                for op in ops {
                    match op {
                        Op::Acquire => {
                            guards.push(registry.acquire(h, Duration::ZERO));
                            let flag = Arc::clone(&fired);
                            registry.set_closer(h, move || {
                                flag.fetch_add(1, Ordering::SeqCst);
                            });
                        }
                        Op::Release => {
                            if guards.pop().is_some() && guards.is_empty() {
                                zero_transitions += 1;
                            }
                        }
                    }
                    prop_assert_eq!(registry.ref_count(h), guards.len() as u64);
                    prop_assert_eq!(fired.load(Ordering::SeqCst), zero_transitions);
                }

                let had_guards = !guards.is_empty();
                drop(guards);
                if had_guards {
                    zero_transitions += 1;
                }
                prop_assert_eq!(registry.ref_count(h), 0);
                prop_assert_eq!(fired.load(Ordering::SeqCst), zero_transitions);
            }
        }
    }
}
