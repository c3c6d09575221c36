//! The HTTP/WS router: three WS upgrade
//! routes for the streaming session, meeting room and progress broker, plus
//! the minimal control-plane surface the core's `MeetingRegistry` needs to
//! learn a meeting exists before a WS can join it.
//!
//! A small number of routes merged under one `TraceLayer` and one
//! permissive-by-default `CorsLayer`.

pub mod error;
pub mod extractors;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{
    Router,
    routing::{get, post, put},
};
use state::AppState;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let meeting_routes = Router::new()
        .route("/", post(routes::meeting::create))
        .route("/{meeting_id}/end", post(routes::meeting::end))
        .route("/{meeting_id}/speaker-name", put(routes::meeting::set_speaker_name));

    let api = Router::new().nest("/meeting", meeting_routes);

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api)
        .merge(health)
        .route("/ws", get(ws::streaming::ws_stream))
        .route("/ws/meeting/{meeting_id}", get(ws::meeting::ws_meeting))
        .route("/ws/progress/{session_id}", get(ws::progress::ws_progress))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors_layer())
        .with_state(state)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
