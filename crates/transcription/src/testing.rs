//! Scripted test doubles for [`crate::asr::Transcriber`] and
//! [`crate::translate::Translator`].
//!
//! Not `#[cfg(test)]`: the orchestration layer one crate up needs these to
//! exercise the promoter's async shell and the meeting room's fan-out
//! against deterministic scripts, not just this crate's own unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::asr::{AsrError, Transcriber};
use crate::translate::{TranslationError, Translator};

/// Replays a fixed sequence of ASR responses, one per call, holding the
/// last entry once the script runs out. Each entry is `Ok(text)` or an
/// `Err` variant, so outage-then-recovery scenarios are expressible.
///
/// `Clone` shares the script and call counter (an `Arc` underneath) so a
/// single scripted session can be handed to a streaming session's `start`
/// more than once across its lifetime, the way the real `AsrClient` is.
#[derive(Clone)]
pub struct ScriptedAsr {
    script: Arc<Vec<Result<String, AsrErrorKind>>>,
    next: Arc<AtomicUsize>,
}

/// A cloneable stand-in for [`AsrError`], which itself is not `Clone`.
#[derive(Debug, Clone)]
pub enum AsrErrorKind {
    Unavailable,
    Rejected,
    Timeout,
}

impl From<AsrErrorKind> for AsrError {
    fn from(kind: AsrErrorKind) -> Self {
        match kind {
            AsrErrorKind::Unavailable => AsrError::Unavailable("scripted failure".into()),
            AsrErrorKind::Rejected => AsrError::Rejected("scripted failure".into()),
            AsrErrorKind::Timeout => AsrError::Timeout,
        }
    }
}

impl ScriptedAsr {
    pub fn new(script: Vec<Result<&str, AsrErrorKind>>) -> Self {
        Self {
            script: Arc::new(script.into_iter().map(|r| r.map(str::to_string)).collect()),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many times `transcribe_pcm16` has been called so far.
    pub fn call_count(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedAsr {
    async fn transcribe_pcm16(
        &self,
        _samples: &[i16],
        _sample_rate: u32,
        _language: Option<&str>,
    ) -> Result<String, AsrError> {
        let idx = self.next.fetch_add(1, Ordering::SeqCst);
        let idx = idx.min(self.script.len().saturating_sub(1));
        match &self.script[idx] {
            Ok(text) => Ok(text.clone()),
            Err(kind) => Err(kind.clone().into()),
        }
    }
}

/// A translator that reverses the input string — a simple, deterministic
/// stand-in for a real translation backend in tests. Records every
/// `(text, source_lang, target_lang)` call it receives, so dedup behavior
/// can be asserted on call count.
#[derive(Default)]
pub struct ReverseTranslator {
    calls: Mutex<Vec<(String, String, String)>>,
}

impl ReverseTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Translator for ReverseTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        self.calls
            .lock()
            .push((text.to_string(), source_lang.to_string(), target_lang.to_string()));
        Ok(text.chars().rev().collect())
    }
}
