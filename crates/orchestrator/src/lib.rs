//! Ties one producer's streaming session and a meeting room's multi-party
//! fan-out together on top of `captions-transcription`'s ring buffer,
//! promoter and ASR/translation clients. Transport-agnostic: this crate
//! never references axum or any WebSocket type directly, only the
//! [`sink::MessageSink`] seam the HTTP/WS layer implements.

pub mod broker;
pub mod meeting;
pub mod persistence;
pub mod session;
pub mod sink;

pub use broker::{ProgressBroker, ProgressEvent, Stage};
pub use meeting::{Meeting, MeetingEnded, MeetingRegistry, Mode, RoomEvent, SpeakerFinal};
pub use persistence::{InMemoryPersistence, PersistenceError, PersistencePort, SpeakerProfile, SpeakerProfileStore};
pub use session::{ClientFrame, ServerEvent, SessionState, StreamingSession, SHUTDOWN_GRACE};
pub use sink::{send_event, MessageSink, SinkError};
