pub mod client;
pub mod stream;

pub use client::{AsrClient, AsrError, DiarizedSegment, DiarizedTranscript, Transcriber};
pub use stream::{StreamEvent, StreamHandle};
