//! The persistence port: a thin, externally-owned interface.
//! The core holds only a non-owning `Arc<dyn PersistencePort>` and never
//! blocks real-time fan-out on it — failures are logged and surfaced as a
//! side-channel progress warning only, never propagated to subscribers.

use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone, thiserror::Error)]
#[error("persistence operation failed: {0}")]
pub struct PersistenceError(pub String);

/// Speaker-name mapping, transcript snapshots, and participant roster ops.
/// Everything here is a record op the core needs synchronously enough to
/// resolve a display name or record a join/leave — nothing here blocks the
/// promoter or fan-out paths.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn get_speaker_mappings(&self, meeting_id: &str) -> Result<HashMap<String, String>, PersistenceError>;
    async fn set_speaker_name(&self, meeting_id: &str, speaker_id: &str, name: &str) -> Result<(), PersistenceError>;
    async fn save_transcript_snapshot(
        &self,
        meeting_id: &str,
        language: &str,
        full_text: &str,
    ) -> Result<(), PersistenceError>;
    async fn add_participant(&self, meeting_id: &str, participant_id: &str, name: &str) -> Result<(), PersistenceError>;
    async fn get_active_participants(&self, meeting_id: &str) -> Result<Vec<(String, String)>, PersistenceError>;
    async fn remove_participant(&self, meeting_id: &str, participant_id: &str) -> Result<(), PersistenceError>;
}

/// Voice-embedding speaker profiles across sessions: an optimisation, entirely optional. The core
/// is fully functional with only in-memory speaker ids within one meeting.
#[async_trait]
pub trait SpeakerProfileStore: Send + Sync {
    async fn load_speaker_profiles(&self, session: &str) -> Result<Vec<SpeakerProfile>, PersistenceError>;
    async fn save_speaker_profiles(&self, session: &str, profiles: &[SpeakerProfile]) -> Result<(), PersistenceError>;
    async fn delete_expired(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpeakerProfile {
    pub id: String,
    pub embedding: Vec<f32>,
    pub count: u32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// In-memory stand-in for [`PersistencePort`], used when no external store
/// is wired up. Data does not survive a process restart; callers needing
/// durability across restarts must supply their own adapter.
#[derive(Default)]
pub struct InMemoryPersistence {
    speaker_names: dashmap::DashMap<String, HashMap<String, String>>,
    participants: dashmap::DashMap<String, HashMap<String, String>>,
    transcripts: dashmap::DashMap<(String, String), String>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistencePort for InMemoryPersistence {
    async fn get_speaker_mappings(&self, meeting_id: &str) -> Result<HashMap<String, String>, PersistenceError> {
        Ok(self.speaker_names.get(meeting_id).map(|m| m.clone()).unwrap_or_default())
    }

    async fn set_speaker_name(&self, meeting_id: &str, speaker_id: &str, name: &str) -> Result<(), PersistenceError> {
        self.speaker_names
            .entry(meeting_id.to_string())
            .or_default()
            .insert(speaker_id.to_string(), name.to_string());
        Ok(())
    }

    async fn save_transcript_snapshot(
        &self,
        meeting_id: &str,
        language: &str,
        full_text: &str,
    ) -> Result<(), PersistenceError> {
        self.transcripts
            .insert((meeting_id.to_string(), language.to_string()), full_text.to_string());
        Ok(())
    }

    async fn add_participant(&self, meeting_id: &str, participant_id: &str, name: &str) -> Result<(), PersistenceError> {
        self.participants
            .entry(meeting_id.to_string())
            .or_default()
            .insert(participant_id.to_string(), name.to_string());
        Ok(())
    }

    async fn get_active_participants(&self, meeting_id: &str) -> Result<Vec<(String, String)>, PersistenceError> {
        Ok(self
            .participants
            .get(meeting_id)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn remove_participant(&self, meeting_id: &str, participant_id: &str) -> Result<(), PersistenceError> {
        if let Some(mut m) = self.participants.get_mut(meeting_id) {
            m.remove(participant_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn speaker_name_round_trips_within_a_meeting() {
        let store = InMemoryPersistence::new();
        store.set_speaker_name("m1", "SPEAKER_00", "Alice").await.unwrap();
        let map = store.get_speaker_mappings("m1").await.unwrap();
        assert_eq!(map.get("SPEAKER_00"), Some(&"Alice".to_string()));
    }

    #[tokio::test]
    async fn unknown_meeting_returns_empty_mappings() {
        let store = InMemoryPersistence::new();
        assert!(store.get_speaker_mappings("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn participant_roster_tracks_add_and_remove() {
        let store = InMemoryPersistence::new();
        store.add_participant("m1", "p1", "Bob").await.unwrap();
        assert_eq!(store.get_active_participants("m1").await.unwrap(), vec![("p1".to_string(), "Bob".to_string())]);
        store.remove_participant("m1", "p1").await.unwrap();
        assert!(store.get_active_participants("m1").await.unwrap().is_empty());
    }
}
