use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use super::client::AsrError;

/// One event out of the external ASR service's streaming channel.
///
/// The stream closes cleanly when the audio sender is dropped; it may close
/// abruptly on transport loss, in which case `events_rx` simply ends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Partial {
        text: String,
    },
    Final {
        text: String,
        #[serde(default)]
        speaker_id: Option<String>,
        #[serde(default)]
        start: Option<f64>,
        #[serde(default)]
        end: Option<f64>,
    },
    Error {
        kind: String,
        message: String,
    },
}

/// Guard that aborts a spawned task when dropped, mirroring the worker's
/// `AbortOnDrop`: a plain `JoinHandle` detaches rather than cancels on drop.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A live bidirectional streaming ASR session.
///
/// An alternative to timer-driven polling: instead of calling
/// `TranscribePCM16` on a schedule, audio is pushed continuously over a
/// persistent connection and partial/final events arrive as the ASR service
/// produces them. Callers never need both paths at once — pick one per
/// deployment.
pub struct StreamHandle {
    pub audio_tx: mpsc::Sender<Vec<i16>>,
    pub events_rx: mpsc::Receiver<StreamEvent>,
    _writer: AbortOnDrop,
    _reader: AbortOnDrop,
}

/// Opens `WS /stream?language=xx` against the ASR service.
pub async fn connect(base_url: &str, language: &str) -> Result<StreamHandle, AsrError> {
    let ws_url = format!("{}/stream?language={}", to_ws_scheme(base_url), language);

    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .map_err(|e| AsrError::Unavailable(format!("ASR stream connect failed: {e}")))?;

    let (mut sink, mut source) = ws_stream.split();

    let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<i16>>(64);
    let (events_tx, events_rx) = mpsc::channel::<StreamEvent>(64);

    // Forwards outgoing PCM16 LE frames until the sender is dropped, then
    // closes the socket — the documented "drop the sender to end the stream"
    // contract.
    let writer = tokio::spawn(async move {
        while let Some(samples) = audio_rx.recv().await {
            let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            if sink.send(WsMessage::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(WsMessage::Close(None)).await;
    });

    // Forwards incoming JSON events until the socket closes.
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = source.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<StreamEvent>(&text) {
                    Ok(event) => {
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(%e, "malformed ASR stream event, ignoring"),
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    Ok(StreamHandle {
        audio_tx,
        events_rx,
        _writer: AbortOnDrop(writer),
        _reader: AbortOnDrop(reader),
    })
}

fn to_ws_scheme(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    }
}
