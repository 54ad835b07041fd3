//! Slicing a time range of a WAV file into a temporary clip.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tempfile::NamedTempFile;

use super::ProviderError;

/// Extract `[start_sec, end_sec)` of `path` into a temporary WAV file.
///
/// The returned handle deletes the clip when dropped, so the file is
/// cleaned up on every exit path of the caller.
pub fn slice_to_temp_wav(
    path: &Path,
    start_sec: f64,
    end_sec: f64,
) -> Result<NamedTempFile, ProviderError> {
    if end_sec <= start_sec {
        return Err(ProviderError::Other(format!(
            "invalid segment bounds: {start_sec}..{end_sec}"
        )));
    }

    let mut reader = WavReader::open(path)
        .map_err(|e| ProviderError::Other(format!("cannot open {}: {e}", path.display())))?;
    let spec = reader.spec();

    let start_frame = (start_sec * spec.sample_rate as f64) as u32;
    let end_frame = ((end_sec * spec.sample_rate as f64) as u32).min(reader.duration());
    if start_frame >= end_frame {
        return Err(ProviderError::Other(format!(
            "segment {start_sec}..{end_sec}s lies outside the audio"
        )));
    }

    reader
        .seek(start_frame)
        .map_err(|e| ProviderError::Other(format!("seek failed: {e}")))?;

    let temp = tempfile::Builder::new()
        .prefix("segment_")
        .suffix(".wav")
        .tempfile()?;

    let out_spec = WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(temp.path(), out_spec)
        .map_err(|e| ProviderError::Other(format!("cannot create clip: {e}")))?;

    let samples_to_copy = (end_frame - start_frame) as usize * spec.channels as usize;
    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => {
            for sample in reader.samples::<f32>().take(samples_to_copy) {
                let s = sample.map_err(|e| ProviderError::Other(format!("decode failed: {e}")))?;
                writer
                    .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .map_err(|e| ProviderError::Other(format!("write failed: {e}")))?;
            }
        }
        (SampleFormat::Int, bits) => {
            let shift = bits.saturating_sub(16);
            for sample in reader.samples::<i32>().take(samples_to_copy) {
                let s = sample.map_err(|e| ProviderError::Other(format!("decode failed: {e}")))?;
                writer
                    .write_sample((s >> shift) as i16)
                    .map_err(|e| ProviderError::Other(format!("write failed: {e}")))?;
            }
        }
    }
    writer
        .finalize()
        .map_err(|e| ProviderError::Other(format!("finalize failed: {e}")))?;

    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{read_wav, write_wav_mono};

    #[test]
    fn clip_has_expected_duration() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.wav");
        let samples: Vec<f32> = (0..80000).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        write_wav_mono(&src, &samples, 16000).unwrap();

        let clip = slice_to_temp_wav(&src, 1.0, 3.5).unwrap();
        let data = read_wav(clip.path()).unwrap();
        assert!((data.duration_sec() - 2.5).abs() < 1e-3);
    }

    #[test]
    fn clip_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.wav");
        let samples: Vec<f32> = (0..16000).map(|i| (i as f32 * 0.01).sin()).collect();
        write_wav_mono(&src, &samples, 16000).unwrap();

        let clip = slice_to_temp_wav(&src, 0.0, 0.5).unwrap();
        let path = clip.path().to_path_buf();
        assert!(path.exists());
        drop(clip);
        assert!(!path.exists());
    }

    #[test]
    fn rejects_inverted_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.wav");
        write_wav_mono(&src, &[0.0; 1600], 16000).unwrap();
        assert!(slice_to_temp_wav(&src, 2.0, 1.0).is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.wav");
        write_wav_mono(&src, &[0.0; 1600], 16000).unwrap();
        assert!(slice_to_temp_wav(&src, 10.0, 12.0).is_err());
    }
}
