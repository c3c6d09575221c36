//! `GET /ws/progress/{session_id}` — a write-only
//! subscription to the progress broker. Subscribers are expected to connect
//! after the long-running operation they care about has already started;
//! there is no replay of events published before this call.

use axum::{
    extract::{Path, State, WebSocketUpgrade, ws::WebSocket},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tracing::info;

use crate::extractors::verify_origin;
use crate::state::AppState;
use crate::ws::axum_sink::AxumSink;

pub async fn ws_progress(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(status) = verify_origin(&headers, &state.settings.allowed_origins) {
        return status.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// The broker only ever writes to this socket; the only thing read from it
/// is the close/error that ends the loop. Subscribers are responsible for
/// their own disconnect.
async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (sender, mut receiver) = socket.split();
    let sink = AxumSink::new(sender);

    state.broker.subscribe(&session_id, sink);
    info!(session = %session_id, "progress subscriber connected");

    while receiver.next().await.is_some() {
        // Drain inbound frames (pings, an eventual close) without acting on
        // them; the broker already holds this socket and evicts it on the
        // first failed write, so nothing else is needed here.
    }

    info!(session = %session_id, "progress subscriber disconnected");
}
