//! WAV encoding for voice messages and decoding for playback.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use parlay_shared::constants::MIN_MEDIA_BYTES;

use crate::error::{MediaError, Result};

/// Interleaved PCM ready for an output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frames(), self.sample_rate)
    }
}

pub fn frames_to_duration(frames: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / sample_rate as f64)
}

/// Write 16-bit PCM samples as a WAV file. Returns the file size in bytes.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16, path: &Path) -> Result<u64> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    let size = std::fs::metadata(path)?.len();
    tracing::debug!(path = %path.display(), samples = samples.len(), size, "WAV encoded");
    Ok(size)
}

/// Reject byte counts too small to hold a media header.
pub fn check_size(len: usize) -> Result<()> {
    if len <= MIN_MEDIA_BYTES {
        return Err(MediaError::InvalidMedia(format!(
            "{len} bytes is too small to be playable media"
        )));
    }
    Ok(())
}

pub fn decode_wav_file(path: &Path) -> Result<DecodedAudio> {
    let len = std::fs::metadata(path)?.len() as usize;
    check_size(len)?;
    let reader = WavReader::open(path).map_err(invalid)?;
    read_all(reader)
}

pub fn decode_wav_bytes(bytes: &[u8]) -> Result<DecodedAudio> {
    check_size(bytes.len())?;
    let reader = WavReader::new(Cursor::new(bytes)).map_err(invalid)?;
    read_all(reader)
}

/// Duration of an in-memory WAV without decoding its samples.
pub fn probe_wav_duration(bytes: &[u8]) -> Result<Duration> {
    check_size(bytes.len())?;
    let reader = WavReader::new(Cursor::new(bytes)).map_err(invalid)?;
    let spec = reader.spec();
    let duration = frames_to_duration(reader.duration() as usize, spec.sample_rate);
    if duration.is_zero() {
        return Err(MediaError::InvalidMedia("audio has zero duration".into()));
    }
    Ok(duration)
}

fn read_all<R: std::io::Read>(mut reader: WavReader<R>) -> Result<DecodedAudio> {
    let spec = reader.spec();
    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(invalid)?,
        (SampleFormat::Int, bits) if bits <= 16 => {
            let scale = (1i32 << (bits - 1)) as f32;
            reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(invalid)?
        }
        (SampleFormat::Int, bits) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(invalid)?
        }
    };

    let audio = DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    };
    if audio.duration().is_zero() {
        return Err(MediaError::InvalidMedia("audio has zero duration".into()));
    }
    Ok(audio)
}

fn invalid(e: hound::Error) -> MediaError {
    MediaError::InvalidMedia(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tone_wav;

    #[test]
    fn test_encode_then_decode_preserves_duration() {
        let bytes = tone_wav(8_000, 8_000);
        let audio = decode_wav_bytes(&bytes).unwrap();
        assert_eq!(audio.frames(), 8_000);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_header_only_wav_is_invalid() {
        let bytes = tone_wav(0, 8_000);
        assert!(matches!(decode_wav_bytes(&bytes), Err(MediaError::InvalidMedia(_))));
        assert!(matches!(probe_wav_duration(&bytes), Err(MediaError::InvalidMedia(_))));
    }

    #[test]
    fn test_empty_and_garbage_are_invalid() {
        assert!(matches!(decode_wav_bytes(&[]), Err(MediaError::InvalidMedia(_))));
        let garbage = vec![0xAB; 512];
        assert!(matches!(decode_wav_bytes(&garbage), Err(MediaError::InvalidMedia(_))));
    }

    #[test]
    fn test_decode_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, tone_wav(4_000, 16_000)).unwrap();
        let audio = decode_wav_file(&path).unwrap();
        assert_eq!(audio.duration(), Duration::from_millis(250));
    }
}
