pub mod ring_buffer;
pub mod wav;
pub mod wav_reader;

pub use ring_buffer::RingBuffer;
pub use wav::encode_pcm16_wav;
pub use wav_reader::{read_wav_16k_mono, read_wav_16k_mono_strict};
