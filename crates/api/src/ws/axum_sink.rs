//! The one [`MessageSink`] implementation that actually touches a socket —
//! everything in `captions-orchestrator` and `captions-transcription` is
//! transport-agnostic, so this adapter is the seam where axum meets them.
//!
//! A `SplitSink` behind a `tokio::sync::Mutex`, since a lock must be held
//! across the `.send(...).await` call.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use captions_orchestrator::sink::{MessageSink, SinkError};
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::Mutex;

pub struct AxumSink {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

impl AxumSink {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Arc<Self> {
        Arc::new(Self { sender: Mutex::new(sender) })
    }
}

#[async_trait]
impl MessageSink for AxumSink {
    async fn send_text(&self, text: String) -> Result<(), SinkError> {
        let mut guard = self.sender.lock().await;
        guard.send(Message::Text(text.into())).await.map_err(|_| SinkError)
    }

    async fn close(&self) {
        let mut guard = self.sender.lock().await;
        let _ = guard.close().await;
    }
}
