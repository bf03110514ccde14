//! Live piece-change streaming over websockets.
//!
//! One [`stream_events`] call serves one `/events` connection. The state
//! machine is small but every exit path matters:
//!
//! ```text
//! WaitingMetadata ──(metadata ready)──► Streaming ──► Terminated
//!        │                                  │
//!        └──(cancelled / peer gone:─────────┘
//!            no events sent)
//! ```
//!
//! Three things race with event delivery: the peer closing the
//! connection (observed by a dedicated read-probe task, since inbound
//! payloads carry no meaning), gateway shutdown, and session teardown
//! closing the feed. The probe starts before the metadata wait so a peer
//! that disconnects early releases its lease instead of parking a task
//! forever. Whatever fires first wins; on every exit the subscription is
//! dropped and the socket is closed, so no event is ever delivered after
//! termination and no subscription leaks.
//!
//! There is no backpressure beyond the socket write: a slow peer stalls
//! the loop on `send` until the write errors or the probe reports the
//! peer gone.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::SessionChange;
use crate::loader::TorrentLease;
use crate::metrics::GatewayMetrics;

/// Wire shape of one change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Index of the piece whose state changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piece_changed: Option<u32>,
}

impl EventMessage {
    pub fn piece_changed(index: u32) -> Self {
        Self {
            piece_changed: Some(index),
        }
    }
}

/// Why a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Ended while still waiting for metadata; nothing was sent and
    /// nothing was subscribed.
    CancelledBeforeStreaming,
    /// The peer closed the connection.
    PeerClosed,
    /// Gateway shutdown cancelled the stream.
    Cancelled,
    /// A write to the peer failed; the connection is presumed dead.
    SendFailed,
    /// The session was destroyed and its feed closed.
    FeedClosed,
}

/// Serve one event-stream connection until a termination condition fires.
///
/// Holds the lease for the whole connection, so the session stays
/// referenced while events flow.
pub async fn stream_events(
    socket: WebSocket,
    lease: TorrentLease,
    shutdown: CancellationToken,
    metrics: Arc<GatewayMetrics>,
) -> StreamOutcome {
    let (mut sink, stream) = socket.split();
    let peer_closed = CancellationToken::new();
    let probe = tokio::spawn(peer_probe(stream, peer_closed.clone()));

    // WaitingMetadata: nothing is subscribed yet, so ending here has no
    // side effects beyond closing the connection.
    let metadata_ready = tokio::select! {
        _ = lease.wait_metadata() => true,
        _ = shutdown.cancelled() => false,
        _ = peer_closed.cancelled() => false,
    };
    if !metadata_ready {
        close_connection(sink, probe).await;
        debug!(hash = %lease.info_hash(), "event stream ended before metadata");
        return StreamOutcome::CancelledBeforeStreaming;
    }

    metrics.event_stream_opened();
    let mut events = lease.subscribe_changes();

    let outcome = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break StreamOutcome::Cancelled,

            _ = peer_closed.cancelled() => break StreamOutcome::PeerClosed,

            change = events.recv() => match change {
                Some(SessionChange::PieceChanged(index)) => {
                    let message = EventMessage::piece_changed(index);
                    match serde_json::to_string(&message) {
                        Ok(text) => {
                            if sink.send(Message::Text(text)).await.is_err() {
                                debug!("event write failed, peer presumed gone");
                                break StreamOutcome::SendFailed;
                            }
                        }
                        Err(error) => {
                            warn!(%error, "failed to serialize event");
                            break StreamOutcome::SendFailed;
                        }
                    }
                }
                None => break StreamOutcome::FeedClosed,
            },
        }
    };

    match outcome {
        StreamOutcome::PeerClosed => metrics.event_peer_closed(),
        StreamOutcome::Cancelled => metrics.event_context_done(),
        _ => {}
    }

    // Terminated: unsubscribe first so no event can be delivered after
    // this point, then close the connection.
    drop(events);
    close_connection(sink, probe).await;

    debug!(hash = %lease.info_hash(), ?outcome, "event stream terminated");
    outcome
}

/// Best-effort close frame, then tear down both halves of the socket.
async fn close_connection(mut sink: SplitSink<WebSocket, Message>, probe: JoinHandle<()>) {
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    probe.abort();
}

/// Peer liveness probe: block on inbound frames solely to observe the
/// peer closing the connection. Inbound payloads are discarded.
async fn peer_probe(mut stream: SplitStream<WebSocket>, peer_closed: CancellationToken) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }
    peer_closed.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_message_wire_shape() {
        let message = EventMessage::piece_changed(42);
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"piece_changed":42}"#
        );
    }

    #[test]
    fn test_event_message_roundtrip() {
        let text = r#"{"piece_changed":7}"#;
        let message: EventMessage = serde_json::from_str(text).unwrap();
        assert_eq!(message, EventMessage::piece_changed(7));
    }
}
