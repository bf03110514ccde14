//! Gateway telemetry.
//!
//! Lock-free atomic counters recorded by the loader and the event bridge,
//! with a point-in-time [`MetricsSnapshot`] rendered into `/status`.
//!
//! ```text
//! loader / event bridge ──► GatewayMetrics ──► MetricsSnapshot ──► /status
//!                           (atomic counters)  (point-in-time copy)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared across the gateway.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    sessions_created: AtomicU64,
    descriptors_loaded: AtomicU64,
    descriptors_saved: AtomicU64,
    descriptor_save_failures: AtomicU64,
    event_streams_opened: AtomicU64,
    events_peer_closed: AtomicU64,
    events_context_done: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new session was created by the engine.
    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// A persisted descriptor was merged into a new session.
    pub fn descriptor_loaded(&self) {
        self.descriptors_loaded.fetch_add(1, Ordering::Relaxed);
    }

    /// A descriptor was written to the store.
    pub fn descriptor_saved(&self) {
        self.descriptors_saved.fetch_add(1, Ordering::Relaxed);
    }

    /// A descriptor write failed (logged, never surfaced).
    pub fn descriptor_save_failed(&self) {
        self.descriptor_save_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// An event stream entered its streaming phase.
    pub fn event_stream_opened(&self) {
        self.event_streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// An event stream ended because the peer closed the connection.
    pub fn event_peer_closed(&self) {
        self.events_peer_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// An event stream ended because the gateway was shutting down.
    pub fn event_context_done(&self) {
        self.events_context_done.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy for display.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            descriptors_loaded: self.descriptors_loaded.load(Ordering::Relaxed),
            descriptors_saved: self.descriptors_saved.load(Ordering::Relaxed),
            descriptor_save_failures: self.descriptor_save_failures.load(Ordering::Relaxed),
            event_streams_opened: self.event_streams_opened.load(Ordering::Relaxed),
            events_peer_closed: self.events_peer_closed.load(Ordering::Relaxed),
            events_context_done: self.events_context_done.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the gateway counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub descriptors_loaded: u64,
    pub descriptors_saved: u64,
    pub descriptor_save_failures: u64,
    pub event_streams_opened: u64,
    pub events_peer_closed: u64,
    pub events_context_done: u64,
}

impl MetricsSnapshot {
    /// Append the counters in `/status` text form.
    pub fn render(&self, out: &mut String) {
        use std::fmt::Write as _;

        let _ = writeln!(out, "sessions_created: {}", self.sessions_created);
        let _ = writeln!(out, "descriptors_loaded: {}", self.descriptors_loaded);
        let _ = writeln!(out, "descriptors_saved: {}", self.descriptors_saved);
        let _ = writeln!(
            out,
            "descriptor_save_failures: {}",
            self.descriptor_save_failures
        );
        let _ = writeln!(out, "event_streams_opened: {}", self.event_streams_opened);
        let _ = writeln!(out, "events_peer_closed: {}", self.events_peer_closed);
        let _ = writeln!(out, "events_context_done: {}", self.events_context_done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = GatewayMetrics::new();
        metrics.session_created();
        metrics.session_created();
        metrics.event_stream_opened();
        metrics.event_peer_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_created, 2);
        assert_eq!(snapshot.event_streams_opened, 1);
        assert_eq!(snapshot.events_peer_closed, 1);
        assert_eq!(snapshot.events_context_done, 0);
    }

    #[test]
    fn test_render_lists_every_counter() {
        let metrics = GatewayMetrics::new();
        metrics.event_context_done();

        let mut out = String::new();
        metrics.snapshot().render(&mut out);
        assert!(out.contains("events_context_done: 1"));
        assert!(out.contains("events_peer_closed: 0"));
        assert!(out.contains("descriptor_save_failures: 0"));
    }
}
