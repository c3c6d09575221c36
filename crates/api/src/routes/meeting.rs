//! The thin control-plane surface the core's `MeetingRegistry` needs: a WS
//! can't join a meeting that doesn't exist yet, so this gives the control
//! plane somewhere to call. Deliberately minimal — no auth, no durable
//! storage beyond the `PersistencePort` the core already holds.

use axum::{
    Json,
    extract::{Path, State},
};
use captions_orchestrator::Mode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    #[serde(default)]
    pub mode: MeetingModeWire,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingModeWire {
    #[default]
    Individual,
    Shared,
}

impl From<MeetingModeWire> for Mode {
    fn from(value: MeetingModeWire) -> Self {
        match value {
            MeetingModeWire::Individual => Mode::Individual,
            MeetingModeWire::Shared => Mode::Shared,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeetingResponse {
    pub meeting_id: String,
    pub host_token: String,
}

/// `POST /api/meeting` — hands the core a fresh `{meeting_id, mode,
/// host_token}`").
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateMeetingRequest>,
) -> Json<MeetingResponse> {
    let meeting_id = Uuid::new_v4().to_string();
    let host_token = Uuid::new_v4().to_string();

    state.meetings.create(meeting_id.clone(), body.mode.into(), host_token.clone());

    Json(MeetingResponse { meeting_id, host_token })
}

/// `POST /api/meeting/{id}/end` — `End(meeting_id)`: refuses new
/// joins from here on, persists the transcript log, closes every socket.
pub async fn end(State(state): State<AppState>, Path(meeting_id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    if state.meetings.get(&meeting_id).is_none() {
        return Err(ApiError::NotFound(format!("no such meeting: {meeting_id}")));
    }
    state.meetings.end(&meeting_id).await;
    Ok(Json(serde_json::json!({ "ended": true })))
}

#[derive(Debug, Deserialize)]
pub struct SetSpeakerNameRequest {
    pub speaker_id: String,
    pub speaker_name: String,
}

/// `PUT /api/meeting/{id}/speaker-name` — shared-mode rename:
/// broadcasts `speaker_name_updated` to every current subscriber.
pub async fn set_speaker_name(
    State(state): State<AppState>,
    Path(meeting_id): Path<String>,
    Json(body): Json<SetSpeakerNameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let meeting = state
        .meetings
        .get(&meeting_id)
        .ok_or_else(|| ApiError::NotFound(format!("no such meeting: {meeting_id}")))?;

    meeting.set_speaker_name(&body.speaker_id, &body.speaker_name).await?;
    Ok(Json(serde_json::json!({ "updated": true })))
}
