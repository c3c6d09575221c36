//! The streaming session: one WebSocket, one audio producer, one
//! subscriber (the same party). Binds a ring buffer and a promoter to a
//! single [`MessageSink`] and translates each final on the subscriber's
//! behalf.
//!
//! Transport-agnostic by design: the WS layer parses frames into [`ClientFrame`] and
//! hands them to [`StreamingSession::run`] over a channel; this module never
//! touches axum or any socket type directly.

use std::sync::Arc;
use std::time::Duration;

use captions_config::Settings;
use captions_transcription::asr::Transcriber;
use captions_transcription::promoter::{self, PromoterConfig, PromoterEvent, PromoterHandle};
use captions_transcription::translate::Translator;
use captions_transcription::RingBuffer;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::sink::{send_event, MessageSink};

/// One parsed client frame, independent of the transport that carried it.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Start {
        sample_rate: u32,
        source_lang: String,
        target_lang: String,
    },
    Stop,
    Audio(Vec<i16>),
}

/// The six JSON shapes a streaming session ever writes to its socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Partial { text: String },
    PartialTranslation { text: String },
    Final { id: u64, text: String },
    Translation { id: u64, text: String },
    Info { text: String },
}

/// `idle -> running -> finalizing -> (idle | cancelled)`.
/// `Cancelled` is terminal; `Idle`/`Running` cycle for a session that stops
/// and restarts without reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Finalizing,
    Cancelled,
}

struct RunningContext {
    ring: Arc<RingBuffer>,
    promoter: PromoterHandle,
    events_rx: mpsc::Receiver<PromoterEvent>,
    source_lang: String,
    target_lang: String,
    /// Gated by `targetLang != sourceLang` on `start`: a
    /// same-language session skips translation RPCs entirely.
    translate_partials: bool,
}

/// Owns one producer's ring buffer + promoter + outbound socket for the
/// lifetime of a `/ws` connection. Generic over the translator so tests can
/// inject [`captions_transcription::testing::ReverseTranslator`]; the ASR
/// client is supplied per-`start` to [`StreamingSession::run`] instead, since
/// it is only ever needed while a promoter is actually spawned.
pub struct StreamingSession<T: Translator> {
    session_id: String,
    sink: Arc<dyn MessageSink>,
    translator: Arc<T>,
    settings: Arc<Settings>,
}

impl<T: Translator + 'static> StreamingSession<T> {
    pub fn new(session_id: impl Into<String>, sink: Arc<dyn MessageSink>, translator: Arc<T>, settings: Arc<Settings>) -> Self {
        Self {
            session_id: session_id.into(),
            sink,
            translator,
            settings,
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::Idle
    }

    /// Drives the session's protocol state machine until `frames` closes
    /// (the WS socket closed) or a fatal condition ends the loop. `asr` is
    /// the shared ASR client the promoter will call on every tick.
    pub async fn run<A>(self, asr: A, mut frames: mpsc::Receiver<ClientFrame>)
    where
        A: Transcriber + Clone + Send + Sync + 'static,
    {
        let mut running: Option<RunningContext> = None;

        loop {
            match running.take() {
                None => match frames.recv().await {
                    Some(ClientFrame::Start { sample_rate, source_lang, target_lang }) => {
                        info!(session = %self.session_id, sample_rate, %source_lang, %target_lang, "streaming session started");
                        running = Some(self.start_promoter(asr.clone(), sample_rate, source_lang, target_lang));
                    }
                    Some(_) => {
                        // ProtocolError: binary audio or `stop` before `start`.
                        self.send(ServerEvent::Info { text: "expected start frame first".into() }).await;
                    }
                    None => {
                        debug!(session = %self.session_id, "socket closed before session started");
                        break;
                    }
                },
                Some(mut ctx) => {
                    tokio::select! {
                        frame = frames.recv() => {
                            match frame {
                                Some(ClientFrame::Audio(samples)) => {
                                    ctx.ring.write(&samples);
                                    running = Some(ctx);
                                }
                                Some(ClientFrame::Stop) => {
                                    self.finalize_and_stop(ctx).await;
                                    self.send(ServerEvent::Info { text: "stopped".into() }).await;
                                    // back to idle: a subsequent `start` may restart the session.
                                }
                                Some(ClientFrame::Start { .. }) => {
                                    warn!(session = %self.session_id, "ignoring start while already running");
                                    running = Some(ctx);
                                }
                                None => {
                                    // Socket closed mid-utterance: one last finalization tick
                                    // runs, then the session tears down.
                                    self.finalize_and_stop(ctx).await;
                                    info!(session = %self.session_id, "producer disconnected, session cancelled");
                                    break;
                                }
                            }
                        }
                        event = ctx.events_rx.recv() => {
                            match event {
                                Some(event) => {
                                    self.handle_promoter_event(&ctx, event).await;
                                    running = Some(ctx);
                                }
                                None => {
                                    // Promoter task exited on its own (shouldn't normally happen
                                    // while `ctx.promoter` is still held) — tear the session down.
                                    warn!(session = %self.session_id, "promoter event channel closed unexpectedly");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn start_promoter<A>(&self, asr: A, sample_rate: u32, source_lang: String, target_lang: String) -> RunningContext
    where
        A: Transcriber + Send + Sync + 'static,
    {
        let window_samples = self.settings.promoter.window_seconds as usize * sample_rate as usize;
        let ring = Arc::new(RingBuffer::new(window_samples.max(1)));
        let config = PromoterConfig::new(&self.settings.promoter, sample_rate);
        let (events_tx, events_rx) = mpsc::channel(32);

        let language = if source_lang == "auto" { None } else { Some(source_lang.clone()) };
        let promoter = promoter::spawn(ring.clone(), asr, config, language, events_tx);

        let translate_partials = target_lang != source_lang;

        RunningContext {
            ring,
            promoter,
            events_rx,
            source_lang,
            target_lang,
            translate_partials,
        }
    }

    /// Flush any pending partial as a final, translate it, then tear the promoter
    /// down. `PromoterHandle::stop` already performs the ring clear and
    /// emits the flushed `Final` on `events_rx` before resolving, so we
    /// drain whatever arrives on it before awaiting the stop itself.
    async fn finalize_and_stop(&self, mut ctx: RunningContext) {
        // Drain any events already queued (e.g. a final from the in-flight tick)
        // without blocking indefinitely — `stop()` below guarantees termination.
        while let Ok(event) = ctx.events_rx.try_recv() {
            self.handle_promoter_event(&ctx, event).await;
        }
        ctx.promoter.stop().await;
        while let Ok(event) = ctx.events_rx.try_recv() {
            self.handle_promoter_event(&ctx, event).await;
        }
    }

    async fn handle_promoter_event(&self, ctx: &RunningContext, event: PromoterEvent) {
        match event {
            PromoterEvent::Partial { text } => {
                self.send(ServerEvent::Partial { text: text.clone() }).await;
                if ctx.translate_partials && !text.is_empty() {
                    let translated = self
                        .translator
                        .translate(&text, &ctx.source_lang, &ctx.target_lang)
                        .await
                        .unwrap_or_default(); // step 5: swallow failures as empty
                    self.send(ServerEvent::PartialTranslation { text: translated }).await;
                }
            }
            PromoterEvent::Final { id, text } => {
                self.send(ServerEvent::Final { id, text: text.clone() }).await;
                let translated = match self.translator.translate(&text, &ctx.source_lang, &ctx.target_lang).await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(session = %self.session_id, error = %e, "final translation failed, falling back to source text");
                        text.clone()
                    }
                };
                self.send(ServerEvent::Translation { id, text: translated }).await;
            }
            PromoterEvent::AsrErrorThreshold => {
                warn!(session = %self.session_id, "ASR error threshold crossed");
                self.send(ServerEvent::Info { text: "transcription temporarily unavailable".into() }).await;
            }
        }
    }

    async fn send(&self, event: ServerEvent) {
        let _ = send_event(self.sink.as_ref(), &event).await;
    }
}

/// Grace period sessions get to flush pending finals on process shutdown.
/// Not used internally by [`StreamingSession`] — the owning
/// process's shutdown hook is expected to race this against `run`'s natural
/// completion.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::test_support::RecordingSink;
    use captions_transcription::testing::{AsrErrorKind, ReverseTranslator, ScriptedAsr};
    use std::time::Duration as StdDuration;

    fn settings_with_poll(poll_ms: u64, finalize_ms: u64) -> Arc<Settings> {
        Arc::new(Settings {
            endpoints: captions_config::ServiceEndpoints {
                asr_base_url: "http://unused".into(),
                translation_base_url: "http://unused".into(),
                tts_base_url: None,
            },
            promoter: captions_config::PromoterSettings {
                poll_interval_ms: poll_ms,
                window_seconds: 8,
                finalize_after_ms: finalize_ms,
                min_window_seconds: 0.0, // tests send short synthetic windows
            },
            sample_rate: 16000,
            allowed_origins: vec![],
        })
    }

    async fn drain_until<F: Fn(&[String]) -> bool>(sink: &RecordingSink, pred: F, timeout: StdDuration) -> Vec<String> {
        let start = tokio::time::Instant::now();
        loop {
            let sent = sink.sent.lock().clone();
            if pred(&sent) || start.elapsed() > timeout {
                return sent;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn steady_voice_finalizes_and_translates() {
        // "Hello" / "Hello world" / "Hello world" (>=500ms later stability).
        let asr = ScriptedAsr::new(vec![Ok("Hello"), Ok("Hello world"), Ok("Hello world")]);
        let translator = Arc::new(ReverseTranslator::new());
        let sink = Arc::new(RecordingSink::default());
        let settings = settings_with_poll(50, 80);

        let session = StreamingSession::new("steady", sink.clone(), translator, settings);
        let (tx, rx) = mpsc::channel(8);
        tx.send(ClientFrame::Start { sample_rate: 16000, source_lang: "en".into(), target_lang: "ar".into() })
            .await
            .unwrap();
        tx.send(ClientFrame::Audio(vec![0i16; 1600])).await.unwrap();

        let handle = tokio::spawn(session.run(asr, rx));

        let sent = drain_until(&sink, |s| s.iter().any(|m| m.contains("\"translation\"")), StdDuration::from_secs(2)).await;
        drop(tx);
        let _ = handle.await;

        assert!(sent.iter().any(|m| m.contains(r#""type":"partial""#) && m.contains("Hello world")));
        assert!(sent.iter().any(|m| m.contains(r#""type":"final""#) && m.contains(r#""id":1"#) && m.contains("Hello world")));
        assert!(sent.iter().any(|m| m.contains(r#""type":"translation""#) && m.contains("dlrow olleH")));
    }

    #[tokio::test]
    async fn silence_after_partial_finalizes_immediately() {
        let asr = ScriptedAsr::new(vec![Ok("Quick brown fox"), Ok("")]);
        let translator = Arc::new(ReverseTranslator::new());
        let sink = Arc::new(RecordingSink::default());
        let settings = settings_with_poll(40, 5000); // finalize_after never reached by stability alone

        let session = StreamingSession::new("silence", sink.clone(), translator, settings);
        let (tx, rx) = mpsc::channel(8);
        tx.send(ClientFrame::Start { sample_rate: 16000, source_lang: "en".into(), target_lang: "ar".into() })
            .await
            .unwrap();
        tx.send(ClientFrame::Audio(vec![0i16; 1600])).await.unwrap();

        let handle = tokio::spawn(session.run(asr, rx));

        let sent = drain_until(&sink, |s| s.iter().any(|m| m.contains(r#""type":"final""#)), StdDuration::from_secs(2)).await;
        drop(tx);
        let _ = handle.await;

        assert!(sent.iter().any(|m| m.contains(r#""type":"partial""#) && m.contains("Quick brown fox")));
        assert!(sent.iter().any(|m| m.contains(r#""type":"final""#) && m.contains(r#""id":1"#) && m.contains("Quick brown fox")));
    }

    #[tokio::test]
    async fn stop_flushes_pending_partial_exactly_once() {
        let asr = ScriptedAsr::new(vec![Ok("Unfinished")]);
        let translator = Arc::new(ReverseTranslator::new());
        let sink = Arc::new(RecordingSink::default());
        let settings = settings_with_poll(40, 5000); // finalize_after never reached by stability alone

        let session = StreamingSession::new("stop", sink.clone(), translator, settings);
        let (tx, rx) = mpsc::channel(8);
        tx.send(ClientFrame::Start { sample_rate: 16000, source_lang: "en".into(), target_lang: "ar".into() })
            .await
            .unwrap();
        tx.send(ClientFrame::Audio(vec![0i16; 1600])).await.unwrap();

        let handle = tokio::spawn(session.run(asr, rx));

        // Let at least one tick land on "Unfinished" before stopping.
        drain_until(&sink, |s| s.iter().any(|m| m.contains("Unfinished")), StdDuration::from_secs(1)).await;
        tx.send(ClientFrame::Stop).await.unwrap();

        let sent = drain_until(&sink, |s| s.iter().any(|m| m.contains(r#""text":"stopped"#)), StdDuration::from_secs(2)).await;
        drop(tx);
        let _ = handle.await;

        let final_count = sent.iter().filter(|m| m.contains(r#""type":"final""#)).count();
        assert_eq!(final_count, 1, "expected exactly one final on stop, got: {sent:?}");
        assert!(sent.iter().any(|m| m.contains(r#""type":"info""#) && m.contains("stopped")));
    }

    #[tokio::test]
    async fn same_language_session_skips_translation_rpcs() {
        let asr = ScriptedAsr::new(vec![Ok("same"), Ok("same")]);
        let translator = Arc::new(ReverseTranslator::new());
        let sink = Arc::new(RecordingSink::default());
        let settings = settings_with_poll(40, 60);

        let session = StreamingSession::new("s-same", sink.clone(), translator.clone(), settings);
        let (tx, rx) = mpsc::channel(8);
        tx.send(ClientFrame::Start { sample_rate: 16000, source_lang: "en".into(), target_lang: "en".into() })
            .await
            .unwrap();
        tx.send(ClientFrame::Audio(vec![0i16; 1600])).await.unwrap();

        let handle = tokio::spawn(session.run(asr, rx));
        drain_until(&sink, |s| s.iter().any(|m| m.contains(r#""type":"final""#)), StdDuration::from_secs(2)).await;
        drop(tx);
        let _ = handle.await;

        // translate() is still called once to populate the `translation` event on
        // the final, but never for partials.
        assert!(translator.call_count() <= 1);
    }

    #[tokio::test]
    async fn asr_outage_surfaces_error_threshold_without_tearing_session_down() {
        let asr = ScriptedAsr::new(vec![
            Err(AsrErrorKind::Unavailable),
            Err(AsrErrorKind::Unavailable),
            Err(AsrErrorKind::Unavailable),
            Ok("recovered"),
        ]);
        let translator = Arc::new(ReverseTranslator::new());
        let sink = Arc::new(RecordingSink::default());
        let settings = settings_with_poll(30, 60);

        let session = StreamingSession::new("outage", sink.clone(), translator, settings);
        let (tx, rx) = mpsc::channel(8);
        tx.send(ClientFrame::Start { sample_rate: 16000, source_lang: "en".into(), target_lang: "ar".into() })
            .await
            .unwrap();
        tx.send(ClientFrame::Audio(vec![0i16; 1600])).await.unwrap();

        let handle = tokio::spawn(session.run(asr, rx));
        let sent = drain_until(&sink, |s| s.iter().any(|m| m.contains("temporarily unavailable")), StdDuration::from_secs(2)).await;
        drop(tx);
        let _ = handle.await;

        assert!(sent.iter().any(|m| m.contains(r#""type":"info""#) && m.contains("temporarily unavailable")));
    }
}
