//! The progress broker: a pub/sub channel for structured
//! long-operation progress updates, indexed by session id.
//!
//! `DashMap<key, Vec<sender>>`, mutated only on join/evict — per-session
//! subscriber lists rather than per-user connection lists.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::sink::{MessageSink, send_event};

/// One stage of a long-running operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Upload,
    Saving,
    Extraction,
    Detection,
    Transcription,
    Translation,
    Tts,
    Processing,
    Complete,
}

/// `{session, stage, percent, message, error?, results?}` — the only shape
/// ever written to a progress subscriber's socket.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub session: String,
    pub stage: Stage,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
}

impl ProgressEvent {
    fn is_terminal(&self) -> bool {
        matches!(self.stage, Stage::Complete) || self.error.is_some()
    }
}

/// Global map `session_id -> subscribers`. One instance is
/// shared across the whole process — sessions come and go, the broker
/// outlives any one of them.
#[derive(Default)]
pub struct ProgressBroker {
    subscribers: DashMap<String, Vec<Arc<dyn MessageSink>>>,
}

impl ProgressBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for `session_id`. Subscribers are expected to
    /// connect after the operation has already started; there is
    /// no replay of events published before this call.
    pub fn subscribe(&self, session_id: &str, sink: Arc<dyn MessageSink>) {
        self.subscribers.entry(session_id.to_string()).or_default().push(sink);
    }

    /// Publishes `event` to every current subscriber of `event.session`,
    /// swallowing and evicting per-socket write failures. If `event` is
    /// terminal (`complete` or an error), the session's subscriber list is
    /// dropped afterwards — nothing more will ever be published to it.
    pub async fn publish(&self, event: ProgressEvent) {
        let session = event.session.clone();
        let terminal = event.is_terminal();

        let sinks = match self.subscribers.get(&session) {
            Some(entry) => entry.value().clone(),
            None => return,
        };

        let mut dead = Vec::new();
        for (idx, sink) in sinks.iter().enumerate() {
            if send_event(sink.as_ref(), &event).await.is_err() {
                dead.push(idx);
            }
        }

        if terminal {
            self.subscribers.remove(&session);
        } else if !dead.is_empty() {
            if let Some(mut entry) = self.subscribers.get_mut(&session) {
                for &idx in dead.iter().rev() {
                    entry.remove(idx);
                }
            }
        }
    }

    /// Number of sessions currently tracked (test/diagnostic helper).
    pub fn active_session_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Convenience builder for a `results` payload on a `complete` event.
pub fn results(pairs: impl IntoIterator<Item = (&'static str, serde_json::Value)>) -> serde_json::Value {
    serde_json::Value::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<HashMap<_, _>>().into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::test_support::{DeadSink, RecordingSink};

    fn event(session: &str, stage: Stage, error: Option<&str>) -> ProgressEvent {
        ProgressEvent {
            session: session.to_string(),
            stage,
            progress: 100,
            message: "ok".to_string(),
            error: error.map(str::to_string),
            results: None,
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber_of_the_session() {
        let broker = ProgressBroker::new();
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        broker.subscribe("s1", a.clone());
        broker.subscribe("s1", b.clone());

        broker.publish(event("s1", Stage::Processing, None)).await;

        assert_eq!(a.sent.lock().len(), 1);
        assert_eq!(b.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn other_sessions_are_unaffected() {
        let broker = ProgressBroker::new();
        let a = Arc::new(RecordingSink::default());
        broker.subscribe("s1", a.clone());

        broker.publish(event("s2", Stage::Processing, None)).await;
        assert!(a.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn terminal_event_evicts_the_session_entry() {
        let broker = ProgressBroker::new();
        let a = Arc::new(RecordingSink::default());
        broker.subscribe("s1", a.clone());

        broker.publish(event("s1", Stage::Complete, None)).await;
        assert_eq!(broker.active_session_count(), 0);
    }

    #[tokio::test]
    async fn error_event_is_terminal_too() {
        let broker = ProgressBroker::new();
        broker.subscribe("s1", Arc::new(RecordingSink::default()));
        broker.publish(event("s1", Stage::Transcription, Some("boom"))).await;
        assert_eq!(broker.active_session_count(), 0);
    }

    #[tokio::test]
    async fn dead_subscribers_are_evicted_without_affecting_live_ones() {
        let broker = ProgressBroker::new();
        let dead = Arc::new(DeadSink);
        let live = Arc::new(RecordingSink::default());
        broker.subscribe("s1", dead);
        broker.subscribe("s1", live.clone());

        broker.publish(event("s1", Stage::Processing, None)).await;
        assert_eq!(live.sent.lock().len(), 1);

        broker.publish(event("s1", Stage::Processing, None)).await;
        assert_eq!(live.sent.lock().len(), 2);
    }
}
