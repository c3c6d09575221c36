//! The meeting room — the hardest component. Binds one or more
//! audio producers (participants) to a shared subscriber list and fans each
//! final out to every subscriber, translated per subscriber's target
//! language, deduplicating translation work across subscribers sharing a
//! language.
//!
//! Both `individual` and `shared` modes are modelled by one [`Meeting`]
//! struct with a [`Mode`] flag: fan-out, dedup and
//! broadcast are identical between the two, the only difference is how a
//! final's speaker id is derived and its display name resolved.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use captions_transcription::translate::Translator;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::persistence::PersistencePort;
use crate::sink::{MessageSink, send_event};

/// Individual mode: each participant runs their own promoter, `speaker_id`
/// is the participant id. Shared mode: one producer's diarized output
/// carries `speaker_id = "SPEAKER_xx"`, resolved through persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Individual,
    Shared,
}

/// A final transcript to fan out, already carrying whichever speaker
/// identity its mode produces.
#[derive(Debug, Clone)]
pub struct SpeakerFinal {
    pub final_id: u64,
    pub text: String,
    pub source_lang: String,
    /// `Some` in individual mode (the participant who spoke); `None` in
    /// shared mode, where the speaker isn't a connected participant.
    pub speaker_participant_id: Option<String>,
    /// Individual mode: the participant id. Shared mode: the diarization
    /// id (`"SPEAKER_xx"`).
    pub speaker_id: String,
}

/// The six JSON shapes a meeting room ever writes to a subscriber socket.
/// `type` tags are snake_case; payload fields follow the wire's camelCase.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    #[serde(rename_all = "camelCase")]
    ParticipantJoined {
        participant_id: String,
        name: Option<String>,
        target_language: String,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft { participant_id: String },
    #[serde(rename_all = "camelCase")]
    ParticipantLanguageUpdated {
        participant_id: String,
        target_language: String,
    },
    #[serde(rename_all = "camelCase")]
    Transcription {
        speaker_participant_id: Option<String>,
        speaker_name: String,
        speaker_id: String,
        original_text: String,
        translations: HashMap<String, String>,
    },
    #[serde(rename_all = "camelCase")]
    SpeakerNameUpdated { speaker_id: String, speaker_name: String },
    MeetingEnded,
}

/// One listener bound to one websocket and one target language. `target_lang` is the only mutable field — `update_language`
/// reconfigures it without a reconnect.
struct Subscriber {
    id: String,
    participant_id: Option<String>,
    target_lang: Mutex<String>,
    sink: Arc<dyn MessageSink>,
}

/// `(text, source_lang, target_lang) -> Arc<str>`. The first requester for a
/// tuple drives the RPC; every other requester joins the same broadcast and
/// nobody issues a second RPC. Keyed on the text itself (not `final_id`)
/// because in individual mode each participant's promoter mints final ids
/// independently starting at 1 — two different speakers can produce the
/// same `final_id` with different text, and keying on id alone would hand
/// the second speaker's subscriber the first speaker's translation.
#[derive(Default)]
struct InflightTranslations {
    map: DashMap<(String, String, String), broadcast::Sender<Arc<str>>>,
}

/// Deadline after which an inflight entry is evicted even if some
/// attachment never observed completion. Bounds the map's size under
/// subscriber churn; the translation itself already has its own 30s RPC
/// deadline, so in practice this only guards against a leaked entry.
const INFLIGHT_TTL: Duration = Duration::from_secs(30);

impl InflightTranslations {
    async fn get_or_translate<T: Translator>(
        &self,
        translator: &T,
        final_id: u64,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Arc<str> {
        let key = (text.to_string(), source_lang.to_string(), target_lang.to_string());

        let mut joined_rx = match self.map.entry(key.clone()) {
            Entry::Occupied(entry) => Some(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx);
                None
            }
        };

        if let Some(rx) = joined_rx.take() {
            return Self::await_completion(rx, text).await;
        }

        // We are the first requester: drive the RPC, then publish the
        // result to every subscriber that attached while it was in flight.
        let result: Arc<str> = match translator.translate(text, source_lang, target_lang).await {
            Ok(t) => Arc::from(t),
            Err(e) => {
                // Translation dedup failure policy: the caller
                // still gets the original text so the subscriber sees
                // *something* rather than nothing.
                warn!(final_id, %target_lang, error = %e, "translation failed, falling back to source text");
                Arc::from(text)
            }
        };

        if let Some(tx) = self.map.get(&key) {
            let _ = tx.send(result.clone());
        }

        // Give any attachments that raced us a moment to receive before we
        // evict; `tx.send` above already delivered synchronously to anyone
        // subscribed at that instant, so this is just cleanup.
        self.map.remove(&key);
        result
    }

    async fn await_completion(mut rx: broadcast::Receiver<Arc<str>>, fallback_text: &str) -> Arc<str> {
        match tokio::time::timeout(INFLIGHT_TTL, rx.recv()).await {
            Ok(Ok(text)) => text,
            _ => Arc::from(fallback_text),
        }
    }
}

/// A long-lived multi-subscriber session with one or more audio producers.
/// Generic over the translator so tests can inject
/// [`captions_transcription::testing::ReverseTranslator`].
pub struct Meeting<T: Translator> {
    pub meeting_id: String,
    pub mode: Mode,
    pub host_token: String,
    active: AtomicBool,
    subscribers: DashMap<String, Arc<Subscriber>>,
    participant_names: DashMap<String, String>,
    inflight: InflightTranslations,
    transcript_log: DashMap<String, Mutex<String>>,
    translator: Arc<T>,
    persistence: Arc<dyn PersistencePort>,
}

impl<T: Translator> Meeting<T> {
    pub fn new(meeting_id: impl Into<String>, mode: Mode, host_token: impl Into<String>, translator: Arc<T>, persistence: Arc<dyn PersistencePort>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            mode,
            host_token: host_token.into(),
            active: AtomicBool::new(true),
            subscribers: DashMap::new(),
            participant_names: DashMap::new(),
            inflight: InflightTranslations::default(),
            transcript_log: DashMap::new(),
            translator,
            persistence,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// `Join(meeting_id, participant_id, name, target_lang, ws)`. Refuses
    /// when the room has already ended. Returns the subscriber's connection
    /// id, which the caller passes to `leave` and `update_language`.
    pub async fn join(&self, connection_id: impl Into<String>, participant_id: Option<String>, name: Option<String>, target_lang: String, sink: Arc<dyn MessageSink>) -> Result<String, MeetingEnded> {
        if !self.is_active() {
            return Err(MeetingEnded);
        }

        let connection_id = connection_id.into();
        if let (Some(pid), Some(display_name)) = (&participant_id, &name) {
            self.participant_names.insert(pid.clone(), display_name.clone());
        }

        let subscriber = Arc::new(Subscriber {
            id: connection_id.clone(),
            participant_id: participant_id.clone(),
            target_lang: Mutex::new(target_lang.clone()),
            sink,
        });
        self.subscribers.insert(connection_id.clone(), subscriber);

        info!(meeting = %self.meeting_id, %connection_id, ?participant_id, "subscriber joined");
        self.broadcast(&RoomEvent::ParticipantJoined {
            participant_id: participant_id.unwrap_or_else(|| connection_id.clone()),
            name,
            target_language: target_lang,
        })
        .await;

        Ok(connection_id)
    }

    /// `Leave(...)`. Silent no-op if the subscriber is already gone (e.g.
    /// the dead-socket reap on a prior broadcast beat an explicit leave).
    pub async fn leave(&self, connection_id: &str) {
        let removed = self.subscribers.remove(connection_id);
        if let Some((_, sub)) = removed {
            let participant_id = sub.participant_id.clone().unwrap_or_else(|| connection_id.to_string());
            info!(meeting = %self.meeting_id, %connection_id, "subscriber left");
            self.broadcast(&RoomEvent::ParticipantLeft { participant_id }).await;
        }
    }

    /// `{"type":"update_language","targetLanguage":"fr"}`:
    /// reconfigures a subscriber's target language without reconnecting.
    pub async fn update_language(&self, connection_id: &str, target_lang: String) {
        let Some(sub) = self.subscribers.get(connection_id) else { return };
        *sub.target_lang.lock() = target_lang.clone();
        let participant_id = sub.participant_id.clone().unwrap_or_else(|| connection_id.to_string());
        drop(sub);
        self.broadcast(&RoomEvent::ParticipantLanguageUpdated { participant_id, target_language: target_lang }).await;
    }

    /// Builds the fan-out event and dispatches it to subscribers for
    /// individual mode, with shared-mode display-name resolution substituted
    /// for the participant name.
    /// Testable properties 3 (fan-out uniqueness), 4 (per-source order) and
    /// 5 (translation dedup) all hinge on this method.
    pub async fn handle_final(&self, final_event: SpeakerFinal) {
        let speaker_name = self.resolve_speaker_name(&final_event).await;

        // Step 2: languages currently wanted, gathered before translating.
        let wanted: Vec<String> = {
            let mut langs: Vec<String> = self.subscribers.iter().map(|s| s.target_lang.lock().clone()).collect();
            langs.sort();
            langs.dedup();
            langs
        };

        let mut translations = HashMap::with_capacity(wanted.len());
        for lang in &wanted {
            let translated = self
                .inflight
                .get_or_translate(self.translator.as_ref(), final_event.final_id, &final_event.text, &final_event.source_lang, lang)
                .await;
            translations.insert(lang.clone(), translated.to_string());
            self.transcript_log
                .entry(lang.clone())
                .or_insert_with(|| Mutex::new(String::new()))
                .lock()
                .push_str(&format!("{translated}\n"));
        }

        // Recipients are taken fresh here, after translation work, so a
        // subscriber who joined mid-fan-out still receives this final; one
        // whose language wasn't in `wanted` gets an ad hoc translate rather
        // than being skipped.
        let recipients: Vec<Arc<Subscriber>> = self.subscribers.iter().map(|e| e.value().clone()).collect();
        let mut dead = Vec::new();

        for sub in &recipients {
            let lang = sub.target_lang.lock().clone();
            if !translations.contains_key(&lang) {
                let t = self
                    .inflight
                    .get_or_translate(self.translator.as_ref(), final_event.final_id, &final_event.text, &final_event.source_lang, &lang)
                    .await;
                translations.insert(lang.clone(), t.to_string());
            }

            let event = RoomEvent::Transcription {
                speaker_participant_id: final_event.speaker_participant_id.clone(),
                speaker_name: speaker_name.clone(),
                speaker_id: final_event.speaker_id.clone(),
                original_text: final_event.text.clone(),
                translations: translations.clone(),
            };

            if send_event(sub.sink.as_ref(), &event).await.is_err() {
                dead.push(sub.id.clone());
            }
        }

        self.reap(&dead).await;
    }

    /// Shared mode only: `setSpeakerName(speaker_id, name)`
    /// persisted, then broadcast to every subscriber so renames take effect
    /// on the very next utterance (no per-room cache of the mapping).
    pub async fn set_speaker_name(&self, speaker_id: &str, name: &str) -> Result<(), crate::persistence::PersistenceError> {
        self.persistence.set_speaker_name(&self.meeting_id, speaker_id, name).await?;
        self.broadcast(&RoomEvent::SpeakerNameUpdated { speaker_id: speaker_id.to_string(), speaker_name: name.to_string() }).await;
        Ok(())
    }

    /// `End(meeting_id)`: refuses new joins from here on,
    /// persists one transcript snapshot per language that accumulated any
    /// text, then closes every socket with `meeting_ended`.
    pub async fn end(&self) {
        self.active.store(false, Ordering::Release);
        info!(meeting = %self.meeting_id, "meeting ending");

        for entry in self.transcript_log.iter() {
            let (lang, text) = (entry.key().clone(), entry.value().lock().clone());
            if let Err(e) = self.persistence.save_transcript_snapshot(&self.meeting_id, &lang, &text).await {
                warn!(meeting = %self.meeting_id, %lang, error = %e, "failed to persist transcript snapshot");
            }
        }

        self.broadcast(&RoomEvent::MeetingEnded).await;
        for entry in self.subscribers.iter() {
            entry.value().sink.close().await;
        }
        self.subscribers.clear();
    }

    async fn resolve_speaker_name(&self, final_event: &SpeakerFinal) -> String {
        match self.mode {
            Mode::Individual => self
                .participant_names
                .get(&final_event.speaker_id)
                .map(|n| n.clone())
                .unwrap_or_else(|| final_event.speaker_id.clone()),
            Mode::Shared => match self.persistence.get_speaker_mappings(&self.meeting_id).await {
                Ok(mappings) => mappings.get(&final_event.speaker_id).cloned().unwrap_or_else(|| final_event.speaker_id.clone()),
                Err(e) => {
                    debug!(meeting = %self.meeting_id, error = %e, "speaker mapping lookup failed, using raw speaker id");
                    final_event.speaker_id.clone()
                }
            },
        }
    }

    /// Fans `event` out to every currently-connected subscriber; a subscriber
    /// whose send fails is reaped on this same pass.
    async fn broadcast(&self, event: &RoomEvent) {
        // Snapshot into a `Vec` before awaiting any send — holding a `DashMap`
        // shard guard across a socket write would stall `join`/`leave`/
        // `update_language`/reap calls that hash to the same shard.
        let recipients: Vec<(String, Arc<Subscriber>)> =
            self.subscribers.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect();

        let mut dead = Vec::new();
        for (id, subscriber) in recipients {
            if send_event(subscriber.sink.as_ref(), event).await.is_err() {
                dead.push(id);
            }
        }
        self.reap(&dead).await;
    }

    async fn reap(&self, dead: &[String]) {
        for id in dead {
            if self.subscribers.remove(id).is_some() {
                debug!(meeting = %self.meeting_id, connection = %id, "reaped dead subscriber socket");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("meeting has ended")]
pub struct MeetingEnded;

/// Process-wide registry of active meetings, looked up by id. The control
/// plane is expected to call `create`; the WS router looks meetings up by
/// id on every join.
pub struct MeetingRegistry<T: Translator> {
    meetings: DashMap<String, Arc<Meeting<T>>>,
    translator: Arc<T>,
    persistence: Arc<dyn PersistencePort>,
}

impl<T: Translator> MeetingRegistry<T> {
    pub fn new(translator: Arc<T>, persistence: Arc<dyn PersistencePort>) -> Self {
        Self {
            meetings: DashMap::new(),
            translator,
            persistence,
        }
    }

    pub fn create(&self, meeting_id: impl Into<String>, mode: Mode, host_token: impl Into<String>) -> Arc<Meeting<T>> {
        let meeting_id = meeting_id.into();
        let meeting = Arc::new(Meeting::new(meeting_id.clone(), mode, host_token, self.translator.clone(), self.persistence.clone()));
        self.meetings.insert(meeting_id, meeting.clone());
        meeting
    }

    pub fn get(&self, meeting_id: &str) -> Option<Arc<Meeting<T>>> {
        self.meetings.get(meeting_id).map(|e| e.value().clone())
    }

    /// Ends the meeting and drops it from the registry; no-op if unknown.
    pub async fn end(&self, meeting_id: &str) {
        if let Some((_, meeting)) = self.meetings.remove(meeting_id) {
            meeting.end().await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.meetings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;
    use crate::sink::test_support::{DeadSink, RecordingSink};
    use captions_transcription::testing::ReverseTranslator;

    fn meeting(mode: Mode) -> Meeting<ReverseTranslator> {
        Meeting::new("m1", mode, "host-token", Arc::new(ReverseTranslator::new()), Arc::new(InMemoryPersistence::new()))
    }

    #[tokio::test]
    async fn two_subscribers_different_languages_each_get_exactly_one_message() {
        let room = meeting(Mode::Individual);
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        room.join("conn-a", Some("p1".into()), Some("Alice".into()), "en".into(), a.clone()).await.unwrap();
        room.join("conn-b", Some("p2".into()), Some("Bob".into()), "ar".into(), b.clone()).await.unwrap();

        room.handle_final(SpeakerFinal {
            final_id: 0,
            text: "hola".into(),
            source_lang: "auto".into(),
            speaker_participant_id: Some("p3".into()),
            speaker_id: "p3".into(),
        })
        .await;

        let a_msgs: Vec<_> = a.sent.lock().iter().filter(|m| m.contains("\"transcription\"")).cloned().collect();
        let b_msgs: Vec<_> = b.sent.lock().iter().filter(|m| m.contains("\"transcription\"")).cloned().collect();
        assert_eq!(a_msgs.len(), 1, "A should see exactly one transcription message");
        assert_eq!(b_msgs.len(), 1, "B should see exactly one transcription message");
        assert!(a_msgs[0].contains("\"originalText\":\"hola\""));
        assert!(b_msgs[0].contains("\"originalText\":\"hola\""));
    }

    #[tokio::test]
    async fn translation_dedup_issues_one_rpc_per_final_and_language_regardless_of_subscriber_count() {
        let translator = Arc::new(ReverseTranslator::new());
        let room = Meeting::new("m2", Mode::Individual, "host", translator.clone(), Arc::new(InMemoryPersistence::new()));
        for i in 0..5 {
            room.join(format!("conn-{i}"), Some(format!("p{i}")), None, "en".into(), Arc::new(RecordingSink::default())).await.unwrap();
        }

        room.handle_final(SpeakerFinal { final_id: 7, text: "bonjour".into(), source_lang: "fr".into(), speaker_participant_id: Some("speaker".into()), speaker_id: "speaker".into() }).await;

        assert_eq!(translator.call_count(), 1, "5 subscribers sharing one language must cost exactly one RPC");
    }

    #[tokio::test]
    async fn concurrent_finals_sharing_a_final_id_do_not_cross_contaminate_translations() {
        // Two different participants' promoters both mint `final_id=0` for
        // their own first final. The dedup key must not collide just
        // because the id and target language happen to match.
        let room = Arc::new(meeting(Mode::Individual));
        let sub = Arc::new(RecordingSink::default());
        room.join("conn-sub", None, None, "fr".into(), sub.clone()).await.unwrap();

        let room_a = room.clone();
        let room_b = room.clone();
        tokio::join!(
            room_a.handle_final(SpeakerFinal {
                final_id: 0,
                text: "hello".into(),
                source_lang: "en".into(),
                speaker_participant_id: Some("a".into()),
                speaker_id: "a".into(),
            }),
            room_b.handle_final(SpeakerFinal {
                final_id: 0,
                text: "goodbye".into(),
                source_lang: "en".into(),
                speaker_participant_id: Some("b".into()),
                speaker_id: "b".into(),
            }),
        );

        let msgs = sub.sent.lock().clone();
        let hello_msg = msgs.iter().find(|m| m.contains(r#""originalText":"hello""#)).expect("hello final must reach the subscriber");
        let goodbye_msg = msgs.iter().find(|m| m.contains(r#""originalText":"goodbye""#)).expect("goodbye final must reach the subscriber");

        assert!(hello_msg.contains("olleh"), "hello's own translation must not be overwritten by goodbye's: {hello_msg}");
        assert!(goodbye_msg.contains("eybdoog"), "goodbye's own translation must not be overwritten by hello's: {goodbye_msg}");
    }

    #[tokio::test]
    async fn dead_subscriber_is_reaped_and_live_one_still_receives() {
        let room = meeting(Mode::Individual);
        let dead = Arc::new(DeadSink);
        let live = Arc::new(RecordingSink::default());
        room.join("dead-conn", None, None, "en".into(), dead).await.unwrap();
        room.join("live-conn", None, None, "en".into(), live.clone()).await.unwrap();

        room.handle_final(SpeakerFinal { final_id: 0, text: "hi".into(), source_lang: "auto".into(), speaker_participant_id: None, speaker_id: "SPEAKER_00".into() }).await;

        assert_eq!(room.subscriber_count(), 1);
        assert!(live.sent.lock().iter().any(|m| m.contains("\"transcription\"")));
    }

    #[tokio::test]
    async fn shared_mode_rename_takes_effect_on_next_utterance() {
        let room = meeting(Mode::Shared);
        let sub = Arc::new(RecordingSink::default());
        room.join("conn", None, None, "en".into(), sub.clone()).await.unwrap();

        room.handle_final(SpeakerFinal { final_id: 0, text: "yes".into(), source_lang: "auto".into(), speaker_participant_id: None, speaker_id: "SPEAKER_00".into() }).await;
        assert!(sub.sent.lock().iter().any(|m| m.contains("\"speakerName\":\"SPEAKER_00\"")));

        room.set_speaker_name("SPEAKER_00", "Alice").await.unwrap();
        assert!(sub.sent.lock().iter().any(|m| m.contains("\"speaker_name_updated\"") && m.contains("Alice")));

        room.handle_final(SpeakerFinal { final_id: 1, text: "yes again".into(), source_lang: "auto".into(), speaker_participant_id: None, speaker_id: "SPEAKER_00".into() }).await;
        let last = sub.sent.lock().last().cloned().unwrap();
        assert!(last.contains("\"speakerName\":\"Alice\""));
    }

    #[tokio::test]
    async fn end_refuses_new_joins_and_broadcasts_meeting_ended() {
        let room = meeting(Mode::Individual);
        let sub = Arc::new(RecordingSink::default());
        room.join("conn", None, None, "en".into(), sub.clone()).await.unwrap();

        room.end().await;
        assert!(!room.is_active());

        let late = Arc::new(RecordingSink::default());
        let result = room.join("late-conn", None, None, "en".into(), late).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn per_source_order_is_preserved_across_two_finals() {
        let room = meeting(Mode::Individual);
        let sub = Arc::new(RecordingSink::default());
        room.join("conn", Some("p1".into()), Some("A".into()), "en".into(), sub.clone()).await.unwrap();

        room.handle_final(SpeakerFinal { final_id: 0, text: "first".into(), source_lang: "auto".into(), speaker_participant_id: Some("p2".into()), speaker_id: "p2".into() }).await;
        room.handle_final(SpeakerFinal { final_id: 1, text: "second".into(), source_lang: "auto".into(), speaker_participant_id: Some("p2".into()), speaker_id: "p2".into() }).await;

        let texts: Vec<_> = sub
            .sent
            .lock()
            .iter()
            .filter(|m| m.contains("\"transcription\""))
            .map(|m| m.contains("\"originalText\":\"first\""))
            .collect();
        assert_eq!(texts, vec![true, false]);
    }
}
