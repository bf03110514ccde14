//! Piece-change fan-out for one session.
//!
//! Each session owns a [`ChangeFeed`]; every `/events` connection holds a
//! [`ChangeEvents`] subscription. Events are cloned into per-subscriber
//! unbounded queues, so a subscriber blocked on a slow socket write never
//! delays the publisher or other subscribers, and each subscriber sees
//! events in exactly the order they were published. Backpressure is the
//! socket write itself.
//!
//! Unsubscribe is dropping the [`ChangeEvents`]; the publisher prunes the
//! dead queue on its next publish. Closing the feed ends every subscriber
//! stream, which is how session teardown terminates live event bridges.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A single change notification emitted by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    /// The piece with this index changed state.
    PieceChanged(u32),
}

struct FeedInner {
    subscribers: Vec<mpsc::UnboundedSender<SessionChange>>,
    closed: bool,
}

/// Publish side of a session's change events.
pub struct ChangeFeed {
    inner: Mutex<FeedInner>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FeedInner {
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Open a new subscription.
    ///
    /// On a closed feed the subscription is already terminated: `recv`
    /// returns `None` immediately.
    pub fn subscribe(&self) -> ChangeEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        ChangeEvents { rx }
    }

    /// Deliver `change` to every live subscriber, pruning dead ones.
    pub fn publish(&self, change: SessionChange) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.subscribers.retain(|tx| tx.send(change).is_ok());
    }

    /// End every subscription and refuse new ones.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    /// Number of live subscriptions (dead queues are counted until the
    /// next publish prunes them).
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscribe side: a live cursor over one session's change events.
pub struct ChangeEvents {
    rx: mpsc::UnboundedReceiver<SessionChange>,
}

impl ChangeEvents {
    /// Next change, or `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<SessionChange> {
        self.rx.recv().await
    }
}
