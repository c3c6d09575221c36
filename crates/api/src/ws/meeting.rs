//! `GET /ws/meeting/{meeting_id}` — joins a meeting as a subscriber, and
//! optionally as a producer once it sends a `start` frame.
//! One socket can be both: a participant captioning everyone else while also
//! contributing their own mic audio.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use captions_orchestrator::meeting::{Meeting, SpeakerFinal};
use captions_orchestrator::{send_event, MessageSink};
use captions_transcription::promoter::{self, PromoterConfig, PromoterEvent, PromoterHandle};
use captions_transcription::{RingBuffer, TranslationClient};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::extractors::verify_origin;
use crate::state::AppState;
use crate::ws::axum_sink::AxumSink;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinQuery {
    participant_id: Option<String>,
    participant_name: Option<String>,
    target_lang: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Start { sample_rate: u32, source_lang: String },
    Stop,
    #[serde(rename_all = "camelCase")]
    UpdateLanguage { target_language: String },
}

/// Events this socket sees about its own mic audio, distinct from the
/// fanned-out [`captions_orchestrator::meeting::RoomEvent`]s every
/// subscriber (including this one) receives via `Meeting::broadcast`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OwnEvent {
    Partial { text: String },
    Info { text: String },
}

struct ProducerCtx {
    ring: Arc<RingBuffer>,
    handle: PromoterHandle,
    events_rx: mpsc::Receiver<PromoterEvent>,
    source_lang: String,
}

pub async fn ws_meeting(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
    Query(query): Query<JoinQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(status) = verify_origin(&headers, &state.settings.allowed_origins) {
        return status.into_response();
    }
    let Some(meeting) = state.meetings.get(&meeting_id) else {
        return (StatusCode::NOT_FOUND, "meeting not found").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, meeting, query))
}

async fn handle_socket(socket: WebSocket, state: AppState, meeting: Arc<Meeting<TranslationClient>>, query: JoinQuery) {
    let connection_id = Uuid::new_v4().to_string();
    let (sender, mut receiver) = socket.split();
    let sink = AxumSink::new(sender);

    if meeting
        .join(connection_id.clone(), query.participant_id.clone(), query.participant_name.clone(), query.target_lang.clone(), sink.clone())
        .await
        .is_err()
    {
        sink.close().await;
        return;
    }
    info!(meeting = %meeting.meeting_id, %connection_id, "meeting socket connected");

    let speaker_id = query.participant_id.clone().unwrap_or_else(|| connection_id.clone());
    let mut producer: Option<ProducerCtx> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Start { sample_rate, source_lang }) => {
                            producer = Some(start_producer(&state, sample_rate, &source_lang));
                        }
                        Ok(ClientMessage::Stop) => {
                            if let Some(ctx) = producer.take() {
                                ctx.handle.stop().await;
                            }
                        }
                        Ok(ClientMessage::UpdateLanguage { target_language }) => {
                            meeting.update_language(&connection_id, target_language).await;
                        }
                        Err(e) => warn!(%connection_id, error = %e, "unparseable meeting frame"),
                    },
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Some(ctx) = &producer {
                            ctx.ring.write(&decode_pcm16(&bytes));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(%connection_id, error = %e, "meeting websocket error");
                        break;
                    }
                    _ => {}
                }
            }
            event = recv_producer_event(&mut producer) => {
                if let (Some(event), Some(ctx)) = (event, producer.as_ref()) {
                    handle_producer_event(&meeting, sink.as_ref(), &speaker_id, query.participant_id.as_deref(), &ctx.source_lang, event).await;
                }
            }
        }
    }

    if let Some(ctx) = producer {
        ctx.handle.stop().await;
    }
    meeting.leave(&connection_id).await;
    info!(meeting = %meeting.meeting_id, %connection_id, "meeting socket disconnected");
}

async fn recv_producer_event(producer: &mut Option<ProducerCtx>) -> Option<PromoterEvent> {
    match producer {
        Some(ctx) => ctx.events_rx.recv().await,
        None => std::future::pending().await,
    }
}

fn start_producer(state: &AppState, sample_rate: u32, source_lang: &str) -> ProducerCtx {
    let window_samples = state.settings.promoter.window_seconds as usize * sample_rate as usize;
    let ring = Arc::new(RingBuffer::new(window_samples.max(1)));
    let config = PromoterConfig::new(&state.settings.promoter, sample_rate);
    let (events_tx, events_rx) = mpsc::channel(32);
    let language = if source_lang == "auto" { None } else { Some(source_lang.to_string()) };
    let asr = (*state.asr).clone();
    let handle = promoter::spawn(ring.clone(), asr, config, language, events_tx);

    ProducerCtx { ring, handle, events_rx, source_lang: source_lang.to_string() }
}

async fn handle_producer_event(
    meeting: &Meeting<TranslationClient>,
    own_sink: &AxumSink,
    speaker_id: &str,
    speaker_participant_id: Option<&str>,
    source_lang: &str,
    event: PromoterEvent,
) {
    match event {
        PromoterEvent::Partial { text } => {
            let _ = send_event(own_sink, &OwnEvent::Partial { text }).await;
        }
        PromoterEvent::Final { id, text } => {
            meeting
                .handle_final(SpeakerFinal {
                    final_id: id,
                    text,
                    source_lang: source_lang.to_string(),
                    speaker_participant_id: speaker_participant_id.map(str::to_string),
                    speaker_id: speaker_id.to_string(),
                })
                .await;
        }
        PromoterEvent::AsrErrorThreshold => {
            let _ = send_event(own_sink, &OwnEvent::Info { text: "transcription temporarily unavailable".into() }).await;
        }
    }
}

fn decode_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}
