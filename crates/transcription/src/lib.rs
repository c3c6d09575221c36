//! Low-level building blocks of the caption/translation streaming core:
//! bounded audio windows, the external ASR/translation adapters, and the
//! partial/final promoter that ties them together for one audio source.
//!
//! Session lifecycle, multi-subscriber fan-out and persistence live one
//! layer up, in `captions-orchestrator` — this crate has no notion of a
//! "meeting" or a "subscriber", only of one producer's audio and text.

pub mod asr;
pub mod pipeline;
pub mod promoter;
pub mod testing;
pub mod translate;

pub use asr::{AsrClient, AsrError, DiarizedSegment, DiarizedTranscript, Transcriber};
pub use pipeline::RingBuffer;
pub use promoter::{Emission, PromoterConfig, PromoterEvent, PromoterHandle, PromoterState};
pub use translate::{TranslationClient, TranslationError, Translator};

use serde::{Deserialize, Serialize};

/// `{session, text, timestamp}` — not durable, superseded by the next
/// partial or by a `Final` for the same session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialResult {
    pub session: String,
    pub text: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// `{session, id, text, speaker_id?, speaker_name?, start_offset?, end_offset?}`.
/// `id` is monotonic per session. Durable only via the persistence port's
/// transcript snapshot at meeting end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    pub session: String,
    pub id: u64,
    pub text: String,
    pub speaker_id: Option<String>,
    pub speaker_name: Option<String>,
    pub start_offset: Option<f64>,
    pub end_offset: Option<f64>,
}

/// `{final_id, source_text, target_lang, translated_text}`. Produced once
/// per `(final_id, target_lang)` pair and cached for the lifetime of the
/// fan-out that requested it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatedResult {
    pub final_id: u64,
    pub source_text: String,
    pub target_lang: String,
    pub translated_text: String,
}
