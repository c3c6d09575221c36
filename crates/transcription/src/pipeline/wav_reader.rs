use std::path::Path;

/// Reads a WAV file, down-mixing to mono PCM16 if necessary.
///
/// Producers are assumed to deliver 16 kHz mono PCM16 already (the core does
/// not resample); this is a convenience reader for test fixtures and for
/// decoding bytes handed back from `TranscribeWAV`-shaped test doubles. It
/// returns the samples together with the file's declared sample rate so
/// callers can assert on it rather than silently accepting mismatches.
pub fn read_wav_16k_mono(path: impl AsRef<Path>) -> anyhow::Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::open(path.as_ref())
        .map_err(|e| anyhow::anyhow!("failed to open WAV '{}': {}", path.as_ref().display(), e))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.unwrap_or(0))
            .collect(),
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| (s.unwrap_or(0.0).clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect(),
    };

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| (frame.iter().map(|&s| s as i64).sum::<i64>() / channels as i64) as i16)
            .collect()
    } else {
        samples
    };

    Ok((mono, spec.sample_rate))
}

/// Like [`read_wav_16k_mono`] but rejects anything not already 16 kHz.
pub fn read_wav_16k_mono_strict(path: impl AsRef<Path>) -> anyhow::Result<Vec<i16>> {
    let (samples, sample_rate) = read_wav_16k_mono(path)?;
    if sample_rate != 16000 {
        anyhow::bail!("expected 16kHz WAV but got {}Hz", sample_rate);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::wav::encode_pcm16_wav;

    #[test]
    fn round_trips_mono_pcm16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        let samples: Vec<i16> = (0..1600).map(|i| (i % 100) as i16).collect();
        std::fs::write(&path, encode_pcm16_wav(&samples, 16000)).unwrap();

        let (read_back, rate) = read_wav_16k_mono(&path).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(read_back, samples);
    }

    #[test]
    fn strict_rejects_other_rates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        std::fs::write(&path, encode_pcm16_wav(&[0; 800], 8000)).unwrap();

        assert!(read_wav_16k_mono_strict(&path).is_err());
    }
}
