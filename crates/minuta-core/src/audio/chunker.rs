//! Splitting long recordings into overlapping windows.
//!
//! Successive chunks overlap by `overlap_sec` so speaker turns crossing a
//! boundary appear whole in at least one chunk. The duplicate transcription
//! this creates is always resolved downstream by the merger's overlap
//! dedup; chunk boundaries are never used without it.

use std::path::Path;

use tracing::info;

use crate::audio::wav::{read_wav, write_wav_mono};
use crate::error::{MinutaError, Result};
use crate::types::ChunkInfo;

/// Split `path` into overlapping windows written under `out_dir`.
///
/// Invariants: `window_sec > overlap_sec > 0`; the union of chunks covers
/// the whole recording; each chunk starts `window_sec - overlap_sec` after
/// the previous one; the last chunk may be shorter than `window_sec`.
pub fn split(
    path: &Path,
    out_dir: &Path,
    window_sec: f64,
    overlap_sec: f64,
) -> Result<Vec<ChunkInfo>> {
    if !(window_sec > overlap_sec && overlap_sec > 0.0) {
        return Err(MinutaError::invalid_input(format!(
            "chunk window ({window_sec}s) must exceed overlap ({overlap_sec}s), both positive"
        )));
    }

    let data = read_wav(path)?;
    if data.channels != 1 {
        return Err(MinutaError::Fatal(
            "chunker expects preconditioned mono audio".to_string(),
        ));
    }

    let rate = data.sample_rate;
    let window_samples = (window_sec * rate as f64) as usize;
    let stride_samples = ((window_sec - overlap_sec) * rate as f64) as usize;
    let total = data.samples.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < total {
        let end = (start + window_samples).min(total);
        let chunk_path = out_dir.join(format!("chunk_{index}.wav"));
        write_wav_mono(&chunk_path, &data.samples[start..end], rate)?;

        chunks.push(ChunkInfo {
            index,
            offset_sec: start as f64 / rate as f64,
            path: chunk_path,
            duration_sec: (end - start) as f64 / rate as f64,
        });

        index += 1;
        start += stride_samples;
    }

    info!(
        source = %path.display(),
        chunks = chunks.len(),
        window_sec,
        overlap_sec,
        "split audio into chunks"
    );
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::wav_duration_sec;

    fn write_tone(dir: &Path, secs: f64, rate: u32) -> std::path::PathBuf {
        let path = dir.join("source.wav");
        let n = (secs * rate as f64) as usize;
        let samples: Vec<f32> = (0..n).map(|i| (i as f32 * 0.03).sin() * 0.4).collect();
        write_wav_mono(&path, &samples, rate).unwrap();
        path
    }

    #[test]
    fn rejects_bad_window() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_tone(dir.path(), 1.0, 8000);
        assert!(split(&src, dir.path(), 10.0, 10.0).is_err());
        assert!(split(&src, dir.path(), 10.0, 0.0).is_err());
    }

    #[test]
    fn offsets_follow_stride() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_tone(dir.path(), 100.0, 8000);
        let chunks = split(&src, dir.path(), 30.0, 5.0).unwrap();

        for pair in chunks.windows(2) {
            let stride = pair[1].offset_sec - pair[0].offset_sec;
            assert!((stride - 25.0).abs() < 1e-6);
        }
        // Union covers the recording.
        let last = chunks.last().unwrap();
        assert!((last.offset_sec + last.duration_sec - 100.0).abs() < 1e-6);
    }

    #[test]
    fn tiling_identity() {
        // sum(durations) - overlap * (n - 1) == total, within one sample.
        let dir = tempfile::tempdir().unwrap();
        let rate = 8000u32;
        let src = write_tone(dir.path(), 90.0, rate);
        let chunks = split(&src, dir.path(), 30.0, 5.0).unwrap();

        let sum: f64 = chunks.iter().map(|c| c.duration_sec).sum();
        let reconstructed = sum - 5.0 * (chunks.len() - 1) as f64;
        assert!((reconstructed - 90.0).abs() <= 1.0 / rate as f64);
    }

    #[test]
    fn last_chunk_may_be_short() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_tone(dir.path(), 70.0, 8000);
        let chunks = split(&src, dir.path(), 30.0, 5.0).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.last().unwrap().duration_sec < 30.0);
        for chunk in &chunks {
            let on_disk = wav_duration_sec(&chunk.path).unwrap();
            assert!((on_disk - chunk.duration_sec).abs() < 1e-6);
        }
    }
}
