//! The partial/final promoter — the hard, testable core of the
//! whole system.
//!
//! Split in two: a pure function plus a timer shell.
//! [`PromoterState::tick`] is a deterministic state transition with no I/O,
//! so the dedup/stability behaviour can be verified without a network.
//! [`spawn`] is the thin async shell around it: a timer
//! that reads the ring buffer, calls the ASR client, and forwards the
//! resulting emissions onto a channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::asr::{AsrError, Transcriber};
use crate::pipeline::RingBuffer;

/// One tagged emission the pure state machine can produce on a tick.
///
/// Modelled as a sum, not a type hierarchy: the tag is the only
/// dispatch, there is no shared behaviour across variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    Partial { text: String },
    Final { id: u64, text: String },
}

/// Events the promoter shell forwards to its caller. `Partial`/`Final` carry
/// the same payload as [`Emission`]; `AsrErrorThreshold` is the shell's own
/// bookkeeping, not part of the pure state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoterEvent {
    Partial { text: String },
    Final { id: u64, text: String },
    AsrErrorThreshold,
}

/// Per-audio-source promoter state.
///
/// Invariants upheld by `tick`/`finalize`:
/// - `stable_since` is `Some` exactly when `last_partial_text` is non-empty.
/// - `next_final_id` only ever increases, starting at 1 — the first final
///   of a session carries `id=1`.
/// - every `Final` emission is immediately followed by clearing
///   `last_partial_text` and `stable_since` (the ring-buffer clear itself is
///   the caller's job — this struct owns no I/O).
#[derive(Debug, Clone)]
pub struct PromoterState {
    last_partial_text: String,
    stable_since: Option<Instant>,
    next_final_id: u64,
}

impl PromoterState {
    pub fn new() -> Self {
        Self {
            last_partial_text: String::new(),
            stable_since: None,
            next_final_id: 1,
        }
    }

    /// The state transition table. `text` is the (possibly
    /// empty) trimmed ASR output for this tick; `now` is the tick's
    /// timestamp. Always returns at least one `Partial` emission (emitted
    /// unconditionally, even when empty), plus a `Final` if
    /// this tick's text satisfies the finalize condition.
    pub fn tick(&mut self, text: &str, now: Instant, finalize_after: Duration) -> Vec<Emission> {
        let text = text.trim();
        let mut emissions = vec![Emission::Partial { text: text.to_string() }];

        if text.is_empty() {
            if !self.last_partial_text.is_empty() {
                emissions.push(self.finalize());
            }
            return emissions;
        }

        if self.last_partial_text.is_empty() || self.last_partial_text != text {
            self.last_partial_text = text.to_string();
            self.stable_since = Some(now);
            return emissions;
        }

        // last_partial_text == text: unchanged since stable_since.
        let stable_since = self
            .stable_since
            .expect("invariant: stable_since is set whenever last_partial_text is non-empty");
        if now.duration_since(stable_since) >= finalize_after {
            emissions.push(self.finalize());
        }

        emissions
    }

    /// On session stop, finalize whatever partial is still pending.
    /// Returns `None` if there was nothing to flush.
    pub fn finalize_on_stop(&mut self) -> Option<Emission> {
        if self.last_partial_text.is_empty() {
            None
        } else {
            Some(self.finalize())
        }
    }

    fn finalize(&mut self) -> Emission {
        let id = self.next_final_id;
        self.next_final_id += 1;
        let text = std::mem::take(&mut self.last_partial_text);
        self.stable_since = None;
        Emission::Final { id, text }
    }
}

fn to_event(emission: Emission) -> PromoterEvent {
    match emission {
        Emission::Partial { text } => PromoterEvent::Partial { text },
        Emission::Final { id, text } => PromoterEvent::Final { id, text },
    }
}

/// Tunables resolved once from [`captions_config::Settings`] plus the
/// session's own sample rate.
#[derive(Debug, Clone)]
pub struct PromoterConfig {
    pub poll_interval: Duration,
    pub finalize_after: Duration,
    pub window_samples: usize,
    pub min_samples: usize,
}

impl PromoterConfig {
    pub fn new(settings: &captions_config::PromoterSettings, sample_rate: u32) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            finalize_after: Duration::from_millis(settings.finalize_after_ms),
            window_samples: settings.window_seconds as usize * sample_rate as usize,
            min_samples: (settings.min_window_seconds * sample_rate as f64) as usize,
        }
    }
}

/// A consecutive-failure window: 3 ASR errors inside 5 seconds surface a
/// `progress.error`, without tearing the session down.
struct ErrorWindow {
    recent: VecDeque<Instant>,
}

const ERROR_WINDOW: Duration = Duration::from_secs(5);
const ERROR_THRESHOLD: usize = 3;

impl ErrorWindow {
    fn new() -> Self {
        Self { recent: VecDeque::new() }
    }

    /// Records a failure at `now`; returns `true` the moment the threshold
    /// is crossed (and resets, so it takes 3 fresh failures to re-trigger).
    fn record(&mut self, now: Instant) -> bool {
        self.recent.push_back(now);
        while let Some(&front) = self.recent.front() {
            if now.duration_since(front) > ERROR_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.len() >= ERROR_THRESHOLD {
            self.recent.clear();
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.recent.clear();
    }
}

enum Command {
    Stop(oneshot::Sender<()>),
}

/// Handle to a running promoter task. Dropping it leaks the task (matching
/// the rest of the codebase's explicit-stop discipline) — always call
/// [`PromoterHandle::stop`] when the owning session/producer goes away.
pub struct PromoterHandle {
    cmd_tx: mpsc::Sender<Command>,
    join: tokio::task::JoinHandle<()>,
    active: Arc<AtomicBool>,
}

impl PromoterHandle {
    /// Gates tick processing without tearing the task down.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Requests a graceful stop: flushes any pending partial as a final
    /// (step 7), then exits. Resolves once the flush (if any) has been sent
    /// on the events channel and the task has fully exited.
    pub async fn stop(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        let _ = self.join.await;
    }
}

/// Spawns the promoter's timer shell for one audio source.
///
/// Generic over [`Transcriber`] so the async shell itself — not just the
/// pure [`PromoterState::tick`] — can be exercised in tests against a
/// scripted fake ASR.
///
/// `language` is the ASR language hint; `events_tx` receives every
/// `PromoterEvent` produced. The task runs until [`PromoterHandle::stop`] is
/// called.
pub fn spawn<A>(
    ring: Arc<RingBuffer>,
    asr: A,
    config: PromoterConfig,
    language: Option<String>,
    events_tx: mpsc::Sender<PromoterEvent>,
) -> PromoterHandle
where
    A: Transcriber + Send + Sync + 'static,
{
    let active = Arc::new(AtomicBool::new(true));
    let active_for_task = active.clone();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(1);

    let join = tokio::spawn(async move {
        let mut state = PromoterState::new();
        let mut errors = ErrorWindow::new();
        let mut interval = tokio::time::interval(config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !active_for_task.load(Ordering::Relaxed) {
                        continue;
                    }
                    run_tick(&ring, &asr, &config, language.as_deref(), &mut state, &mut errors, &events_tx).await;
                }
                maybe_cmd = cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(Command::Stop(ack)) => {
                            if let Some(emission) = state.finalize_on_stop() {
                                ring.clear();
                                let _ = events_tx.send(to_event(emission)).await;
                            }
                            let _ = ack.send(());
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    });

    PromoterHandle { cmd_tx, join, active }
}

#[allow(clippy::too_many_arguments)]
async fn run_tick<A: Transcriber>(
    ring: &RingBuffer,
    asr: &A,
    config: &PromoterConfig,
    language: Option<&str>,
    state: &mut PromoterState,
    errors: &mut ErrorWindow,
    events_tx: &mpsc::Sender<PromoterEvent>,
) {
    let window = ring.read_last(config.window_samples);
    if window.len() < config.min_samples {
        return; // step 2: not enough audio yet, emit nothing
    }

    let text = match asr.transcribe_pcm16(&window, 16_000, language).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "ASR transcription failed on promoter tick");
            let _ = events_tx.send(PromoterEvent::Partial { text: String::new() }).await;
            if matches!(e, AsrError::Unavailable(_) | AsrError::Timeout | AsrError::Rejected(_))
                && errors.record(Instant::now())
            {
                let _ = events_tx.send(PromoterEvent::AsrErrorThreshold).await;
            }
            return; // do not advance state on ASR error
        }
    };

    errors.reset();

    let now = Instant::now();
    let emissions = state.tick(&text, now, config.finalize_after);
    let finalized = emissions.iter().any(|e| matches!(e, Emission::Final { .. }));

    for emission in emissions {
        debug!(?emission, "promoter emission");
        if events_tx.send(to_event(emission)).await.is_err() {
            return; // receiver gone, nothing more to do this tick
        }
    }

    if finalized {
        ring.clear();
    }
}
