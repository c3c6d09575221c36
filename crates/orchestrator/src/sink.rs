//! A transport-agnostic outbound socket.
//!
//! This crate never touches axum or any WebSocket library directly — the
//! HTTP/WS router owns the real socket and hands this crate a
//! [`MessageSink`], so the room/session/broker logic can be exercised with
//! an in-memory fake in tests.

use async_trait::async_trait;

/// Serializes writes to one outbound connection. Implementations are
/// expected to internally wrap the real sink in their own mutex — the
/// contract here is just "never hold a lock across an await on anything
/// else", which a single `send_text` call per message naturally gives.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), SinkError>;

    /// Best-effort close; implementations that have nothing to do can no-op.
    async fn close(&self) {}
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("socket send failed")]
pub struct SinkError;

/// Serializes `event` and sends it, swallowing serialization failures as a
/// logged bug rather than propagating — an event that can't serialize is an
/// internal invariant violation, not a transport failure.
pub async fn send_event<T: serde::Serialize>(sink: &dyn MessageSink, event: &T) -> Result<(), SinkError> {
    let text = match serde_json::to_string(event) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize outbound event");
            return Err(SinkError);
        }
    };
    sink.send_text(text).await
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// An in-memory [`MessageSink`] that records every message sent to it,
    /// for asserting fan-out behaviour without a real socket.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<String>>,
        pub closed: Mutex<bool>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send_text(&self, text: String) -> Result<(), SinkError> {
            self.sent.lock().push(text);
            Ok(())
        }

        async fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    /// A sink that always fails, simulating a dead socket for eviction tests.
    #[derive(Default)]
    pub struct DeadSink;

    #[async_trait]
    impl MessageSink for DeadSink {
        async fn send_text(&self, _text: String) -> Result<(), SinkError> {
            Err(SinkError)
        }
    }
}
