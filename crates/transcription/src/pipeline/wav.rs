/// Encodes mono PCM16 samples as an in-memory WAV byte buffer.
///
/// Used to build request bodies for the ASR service's WAV-based endpoints
/// (`TranscribeWAV`, `TranscribeWithDiarization`, `DetectLanguage`) and to
/// build fixtures in tests.
pub fn encode_pcm16_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .expect("in-memory WAV writer construction cannot fail");
        for &sample in samples {
            writer
                .write_sample(sample)
                .expect("writing to an in-memory buffer cannot fail");
        }
        writer.finalize().expect("finalizing an in-memory WAV cannot fail");
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_a_valid_riff_header() {
        let bytes = encode_pcm16_wav(&[1, -1, 2, -2], 16000);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }
}
