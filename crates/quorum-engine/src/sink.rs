//! Event sinks — where execution events go.
//!
//! The engine emits [`ExecuteEvent`]s through a sink it never waits on.
//! Streaming callers get a channel-backed sink drained by the HTTP layer;
//! non-streaming callers get the null sink; tests collect.

use parking_lot::Mutex;
use quorum_core::events::ExecuteEvent;
use tokio::sync::mpsc;
use tracing::trace;

/// Receives execution events. Implementations must not block.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: ExecuteEvent);
}

/// Discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ExecuteEvent) {}
}

/// Forwards events into an unbounded channel. Send failures mean the
/// receiver hung up; events are dropped silently from then on.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ExecuteEvent>,
}

impl ChannelSink {
    /// Create a sink and its receiving end.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExecuteEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ExecuteEvent) {
        trace!(event_type = event.event_type(), "emit");
        let _ = self.tx.send(event);
    }
}

/// Buffers every event for later inspection.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ExecuteEvent>>,
}

impl CollectingSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    #[must_use]
    pub fn events(&self) -> Vec<ExecuteEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: ExecuteEvent) {
        self.events.lock().push(event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::ids::BranchId;

    fn token(text: &str) -> ExecuteEvent {
        ExecuteEvent::Token {
            branch_id: BranchId::from_string("b1"),
            text: text.into(),
        }
    }

    #[test]
    fn collecting_sink_preserves_order() {
        let sink = CollectingSink::new();
        sink.emit(token("a"));
        sink.emit(token("b"));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "token");
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(token("x"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "token");
    }

    #[tokio::test]
    async fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(token("x")); // must not panic
    }
}
