use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Same per-call deadline policy as the ASR client.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Inputs larger than this are split at sentence boundaries.
const CHUNK_THRESHOLD: usize = 5000;

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("translation failed: {0}")]
    Failed(String),
}

/// Seam the meeting room and streaming session translate against (mirrors
/// [`crate::asr::Transcriber`]). The one real implementation is
/// [`TranslationClient`]; tests inject a scripted fake that reverses the
/// input string instead.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError>;
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    source_lang: &'a str,
    target_lang: &'a str,
}

/// Stateless HTTP adapter to the external translation service.
///
/// Shared across every session and every room in the process; carries no
/// per-request state. Per-(src,tgt) inflight deduplication is the caller's
/// responsibility — see the meeting room's translation dedup map.
#[derive(Clone)]
pub struct TranslationClient {
    http: reqwest::Client,
    base_url: String,
}

impl TranslationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// `POST /translate`. `source_lang = "auto"` is permitted by the upstream
    /// service. Accepts either `{translation}` or `{translated_text}` in the
    /// response.
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        if text.is_empty() {
            return Ok(String::new());
        }

        let url = format!("{}/translate", self.base_url);
        let body = TranslateRequest {
            text,
            source_lang,
            target_lang,
        };

        let response = tokio::time::timeout(CALL_TIMEOUT, self.http.post(&url).json(&body).send())
            .await
            .map_err(|_| TranslationError::Failed("translation call timed out".to_string()))?
            .map_err(|e| TranslationError::Failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TranslationError::Failed(format!(
                "translation service returned {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TranslationError::Failed(format!("malformed response: {e}")))?;

        value
            .get("translation")
            .or_else(|| value.get("translated_text"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                TranslationError::Failed("response missing translation/translated_text".to_string())
            })
    }

    /// Splits text over 5000 characters at sentence boundaries, translates
    /// each chunk sequentially (respecting upstream rate limits), and
    /// re-joins preserving order. A failed chunk fails the whole call.
    pub async fn translate_chunked(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        if text.len() <= CHUNK_THRESHOLD {
            return self.translate(text, source_lang, target_lang).await;
        }

        let mut joined = String::with_capacity(text.len());
        for chunk in split_into_sentence_chunks(text, CHUNK_THRESHOLD) {
            let translated = self.translate(&chunk, source_lang, target_lang).await?;
            joined.push_str(&translated);
        }
        Ok(joined)
    }
}

#[async_trait]
impl Translator for TranslationClient {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        TranslationClient::translate(self, text, source_lang, target_lang).await
    }
}

/// Splits `text` into chunks no larger than `max_len`, breaking only at
/// sentence-ending punctuation so chunk boundaries stay natural for the
/// translation service.
fn split_into_sentence_chunks(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_keep_terminators(text) {
        if !current.is_empty() && current.len() + sentence.len() > max_len {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(&sentence);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_keep_terminators(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            sentences.push(text[start..=i].to_string());
            start = i + c.len_utf8();
        }
    }
    if start < text.len() {
        sentences.push(text[start..].to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_preserves_full_text_when_rejoined() {
        let text = "Hello world. How are you? I am fine!";
        let chunks = split_into_sentence_chunks(text, 1000);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunking_respects_max_len_by_breaking_at_sentence_boundaries() {
        let sentence = "word ".repeat(20) + ". ";
        let text = sentence.repeat(10);
        let chunks = split_into_sentence_chunks(&text, 200);
        assert!(chunks.iter().all(|c| c.len() <= 300)); // one sentence may itself exceed max_len
        assert_eq!(chunks.concat(), text);
    }

    #[tokio::test]
    async fn empty_text_short_circuits_without_an_rpc() {
        let client = TranslationClient::new("http://127.0.0.1:1");
        let result = client.translate("", "auto", "en").await.unwrap();
        assert_eq!(result, "");
    }

    #[tokio::test]
    async fn transport_error_surfaces_as_translation_failed() {
        let client = TranslationClient::new("http://127.0.0.1:1");
        let err = client.translate("hola", "auto", "en").await.unwrap_err();
        assert!(matches!(err, TranslationError::Failed(_)));
    }
}
