//! Audio preconditioning ahead of diarization and transcription.
//!
//! The pipeline requires mono PCM at a fixed 16 kHz rate. The default
//! implementation downmixes, peak-normalizes and linearly resamples WAV
//! input; heavier DSP (noise reduction) belongs to an external
//! preprocessing service behind the same trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::audio::wav::{read_wav, write_wav_mono};
use crate::error::{MinutaError, Result};

/// Sample rate the diarizer and providers consume.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Conditioning step producing mono PCM at [`TARGET_SAMPLE_RATE`].
///
/// Must be idempotent: re-invoking on its own output yields the same file.
/// Failures are fatal to the job.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn precondition(&self, path: &Path) -> Result<(PathBuf, u32)>;
}

/// WAV-native preprocessor: downmix, peak-normalize, resample to 16 kHz.
#[derive(Debug, Default)]
pub struct WavPreprocessor;

#[async_trait]
impl Preprocessor for WavPreprocessor {
    async fn precondition(&self, path: &Path) -> Result<(PathBuf, u32)> {
        let path = path.to_path_buf();
        // Decode + resample is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || precondition_sync(&path))
            .await
            .map_err(|e| MinutaError::Fatal(format!("preprocessing task failed: {e}")))?
    }
}

fn precondition_sync(path: &Path) -> Result<(PathBuf, u32)> {
    let data = read_wav(path)?;
    if data.samples.is_empty() {
        return Err(MinutaError::Fatal(format!(
            "empty audio file: {}",
            path.display()
        )));
    }

    let mono = downmix_to_mono(&data.samples, data.channels);
    let normalized = peak_normalize(&mono);
    let resampled = resample_linear(&normalized, data.sample_rate, TARGET_SAMPLE_RATE);

    let out_path = processed_path(path);
    write_wav_mono(&out_path, &resampled, TARGET_SAMPLE_RATE)?;
    debug!(
        input = %path.display(),
        output = %out_path.display(),
        in_rate = data.sample_rate,
        "preconditioned audio"
    );
    Ok((out_path, TARGET_SAMPLE_RATE))
}

/// `foo.wav` -> `foo_processed.wav`; a `_processed` input maps to itself,
/// which is what makes re-invocation idempotent.
fn processed_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    if stem.ends_with("_processed") {
        return path.to_path_buf();
    }
    path.with_file_name(format!("{stem}_processed.wav"))
}

/// Average all channels into one.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn peak_normalize(samples: &[f32]) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= f32::EPSILON || peak >= 1.0 {
        return samples.to_vec();
    }
    let gain = 1.0 / peak;
    samples.iter().map(|s| s * gain).collect()
}

/// Linear-interpolation resampling of mono audio.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let pos = i as f64 / ratio;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(samples.len() - 1);
        let frac = (pos - lo as f64) as f32;
        output.push(samples[lo] + (samples[hi] - samples[lo]) * frac);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::write_wav_mono;

    #[test]
    fn downmix_averages_channels() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn resample_halves_length() {
        let samples: Vec<f32> = (0..32000).map(|i| (i as f32 * 0.01).sin()).collect();
        let out = resample_linear(&samples, 32000, 16000);
        assert!((out.len() as i64 - 16000).abs() <= 1);
    }

    #[tokio::test]
    async fn precondition_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let samples: Vec<f32> = (0..44100).map(|i| (i as f32 * 0.02).sin() * 0.3).collect();
        write_wav_mono(&path, &samples, 44100).unwrap();

        let pre = WavPreprocessor;
        let (first, rate) = pre.precondition(&path).await.unwrap();
        assert_eq!(rate, TARGET_SAMPLE_RATE);
        assert!(first.to_str().unwrap().ends_with("_processed.wav"));

        let (second, _) = pre.precondition(&first).await.unwrap();
        assert_eq!(first, second);
    }
}
