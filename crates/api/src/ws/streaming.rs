//! `GET /ws` — one producer, one subscriber. Parses client
//! frames into [`ClientFrame`] and drives a [`StreamingSession`]; this
//! module is the only place in the binary that knows about axum's
//! `WebSocket` type for this route.

use axum::{
    extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use captions_orchestrator::session::{ClientFrame, StreamingSession};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::extractors::verify_origin;
use crate::state::AppState;
use crate::ws::axum_sink::AxumSink;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Start {
        sample_rate: u32,
        source_lang: String,
        target_lang: String,
    },
    Stop,
}

pub async fn ws_stream(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    if let Err(status) = verify_origin(&headers, &state.settings.allowed_origins) {
        return status.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    let (sender, mut receiver) = socket.split();
    let sink = AxumSink::new(sender);

    let (frames_tx, frames_rx) = mpsc::channel(64);
    let session = StreamingSession::new(session_id.clone(), sink, state.translator.clone(), state.settings.clone());
    let asr = (*state.asr).clone();

    info!(%session_id, "streaming session connected");
    let run_handle = tokio::spawn(session.run(asr, frames_rx));

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Start { sample_rate, source_lang, target_lang }) => {
                    let _ = frames_tx.send(ClientFrame::Start { sample_rate, source_lang, target_lang }).await;
                }
                Ok(ClientMessage::Stop) => {
                    let _ = frames_tx.send(ClientFrame::Stop).await;
                }
                Err(e) => warn!(%session_id, error = %e, "unparseable client frame"),
            },
            Ok(Message::Binary(bytes)) => {
                let _ = frames_tx.send(ClientFrame::Audio(decode_pcm16(&bytes))).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(%session_id, error = %e, "websocket error");
                break;
            }
            _ => {}
        }
    }

    drop(frames_tx);
    let _ = run_handle.await;
    info!(%session_id, "streaming session disconnected");
}

fn decode_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}
