//! Voice-learning audio quality scoring.
//!
//! Combines an SNR estimate with a voice-activity ratio into a single
//! score in `[0, 1]`. Learning audio scoring below
//! [`MIN_LEARNING_QUALITY`] is rejected before it can pollute the
//! fingerprint.

/// Minimum acceptable quality for fingerprint updates.
pub const MIN_LEARNING_QUALITY: f32 = 0.6;

const FRAME_MS: f64 = 25.0;
const HOP_MS: f64 = 10.0;
const EPS: f64 = 1e-10;

/// Score preconditioned mono audio.
///
/// `snr_db = 10·log10(mean(x²) / (p10(|x|)² + ε))`; frame RMS at
/// 25 ms / 10 ms hop; `voice_ratio` is the share of frames above the 30th
/// RMS percentile. Final score: `0.6·clip01((snr+10)/30) + 0.4·voice_ratio`.
pub fn audio_quality(samples: &[f32], sample_rate: u32) -> f32 {
    if samples.is_empty() || sample_rate == 0 {
        return 0.0;
    }

    let energy: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>()
        / samples.len() as f64;

    let mut magnitudes: Vec<f64> = samples.iter().map(|&s| (s as f64).abs()).collect();
    let noise_floor = percentile(&mut magnitudes, 10.0);
    let snr_db = 10.0 * (energy / (noise_floor * noise_floor + EPS)).log10();

    let voice_ratio = voice_activity_ratio(samples, sample_rate);

    let snr_component = clip01((snr_db + 10.0) / 30.0);
    clip01(0.6 * snr_component + 0.4 * voice_ratio) as f32
}

/// Share of frames whose RMS exceeds the 30th-percentile silence floor.
fn voice_activity_ratio(samples: &[f32], sample_rate: u32) -> f64 {
    let frame_len = ((FRAME_MS / 1000.0) * sample_rate as f64) as usize;
    let hop_len = ((HOP_MS / 1000.0) * sample_rate as f64) as usize;
    if frame_len == 0 || hop_len == 0 {
        return 0.0;
    }

    let mut rms = Vec::new();
    let mut start = 0usize;
    while start + frame_len <= samples.len() {
        let frame = &samples[start..start + frame_len];
        let mean_sq: f64 = frame
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum::<f64>()
            / frame.len() as f64;
        rms.push(mean_sq.sqrt());
        start += hop_len;
    }
    if rms.is_empty() {
        // Shorter than one frame: treat the whole clip as one frame.
        let mean_sq: f64 = samples
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum::<f64>()
            / samples.len() as f64;
        rms.push(mean_sq.sqrt());
    }

    let mut sorted = rms.clone();
    let silence_threshold = percentile(&mut sorted, 30.0);
    rms.iter().filter(|&&v| v > silence_threshold).count() as f64 / rms.len() as f64
}

/// Nearest-rank percentile over an unsorted buffer; sorts in place.
fn percentile(values: &mut [f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (pct / 100.0 * (values.len() - 1) as f64).round() as usize;
    values[rank.min(values.len() - 1)]
}

fn clip01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}
