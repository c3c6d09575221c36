use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::pipeline::wav::encode_pcm16_wav;

/// Seam the promoter ticks against: a pluggable backend trait. The one real
/// implementation is [`AsrClient`], tests inject a scripted fake instead.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe_pcm16(
        &self,
        samples: &[i16],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<String, AsrError>;
}

/// Every ASR RPC is bounded by this deadline. Not configurable via environment — it is a safety bound,
/// not a tuning knob.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AsrError {
    #[error("ASR service unavailable: {0}")]
    Unavailable(String),
    #[error("ASR rejected the request: {0}")]
    Rejected(String),
    #[error("ASR call timed out after {CALL_TIMEOUT:?}")]
    Timeout,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct DetectLanguageResponse {
    language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiarizedSegment {
    pub speaker_id: String,
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiarizedTranscript {
    pub text: String,
    pub segments: Vec<DiarizedSegment>,
    pub num_speakers: u32,
}

/// Stateless HTTP adapter to the external ASR service.
///
/// Holds a pooled `reqwest::Client`, safe to share across every session in
/// the process — it carries no per-session state. All retry policy lives in
/// the caller (the promoter); the client itself is stateless.
#[derive(Clone)]
pub struct AsrClient {
    http: reqwest::Client,
    base_url: String,
}

impl AsrClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// `POST /transcribe` — body is WAV bytes, `language` is a query param.
    pub async fn transcribe_wav(&self, wav_bytes: &[u8], language: &str) -> Result<String, AsrError> {
        let url = format!("{}/transcribe", self.base_url);
        let resp = self.post_wav(&url, wav_bytes, &[("language", language)]).await?;
        let parsed: TranscribeResponse = self.decode_json(resp).await?;
        Ok(parsed.text)
    }

    /// `POST /detect-language` — body is WAV bytes.
    pub async fn detect_language(&self, wav_bytes: &[u8]) -> Result<String, AsrError> {
        let url = format!("{}/detect-language", self.base_url);
        let resp = self.post_wav(&url, wav_bytes, &[]).await?;
        let parsed: DetectLanguageResponse = self.decode_json(resp).await?;
        Ok(parsed.language)
    }

    /// `POST /transcribe-diarize` — body is WAV bytes, `language` is a query param.
    pub async fn transcribe_with_diarization(
        &self,
        wav_bytes: &[u8],
        language: &str,
    ) -> Result<DiarizedTranscript, AsrError> {
        let url = format!("{}/transcribe-diarize", self.base_url);
        let resp = self.post_wav(&url, wav_bytes, &[("language", language)]).await?;
        self.decode_json(resp).await
    }

    /// Transcribes the rolling PCM16 window by encoding it as WAV first.
    /// Used synchronously by the promoter on every tick via [`Transcriber`].
    async fn transcribe_pcm16_impl(
        &self,
        samples: &[i16],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<String, AsrError> {
        let wav = encode_pcm16_wav(samples, sample_rate);
        self.transcribe_wav(&wav, language.unwrap_or("auto")).await
    }

    async fn post_wav(
        &self,
        url: &str,
        wav_bytes: &[u8],
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, AsrError> {
        let request = self
            .http
            .post(url)
            .query(query)
            .header("content-type", "audio/wav")
            .body(wav_bytes.to_vec());

        let response = tokio::time::timeout(CALL_TIMEOUT, request.send())
            .await
            .map_err(|_| AsrError::Timeout)?
            .map_err(|e| {
                warn!(%url, error = %e, "ASR transport error");
                AsrError::Unavailable(e.to_string())
            })?;

        if response.status().is_client_error() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AsrError::Rejected(format!("{status}: {body}")));
        }
        if !response.status().is_success() {
            return Err(AsrError::Unavailable(format!("status {}", response.status())));
        }

        Ok(response)
    }

    async fn decode_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AsrError> {
        response
            .json::<T>()
            .await
            .map_err(|e| AsrError::Unavailable(format!("malformed ASR response: {e}")))
    }
}

#[async_trait]
impl Transcriber for AsrClient {
    async fn transcribe_pcm16(
        &self,
        samples: &[i16],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<String, AsrError> {
        self.transcribe_pcm16_impl(samples, sample_rate, language).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diarized_segment_deserializes_from_wire_shape() {
        let json = r#"{
            "text": "yes",
            "segments": [{"speaker_id": "SPEAKER_00", "text": "yes", "start": 0.0, "end": 0.4}],
            "num_speakers": 1
        }"#;
        let parsed: DiarizedTranscript = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.segments[0].speaker_id, "SPEAKER_00");
        assert_eq!(parsed.num_speakers, 1);
    }

    #[tokio::test]
    async fn transport_error_maps_to_unavailable() {
        let client = AsrClient::new("http://127.0.0.1:1"); // nothing listens here
        let err = client.transcribe_wav(&[], "en").await.unwrap_err();
        assert!(matches!(err, AsrError::Unavailable(_)));
    }
}
