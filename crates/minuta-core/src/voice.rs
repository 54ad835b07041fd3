//! Voice learning: building and refreshing the user fingerprint.
//!
//! Learning audio is capped at ten minutes, quality-gated before it can
//! touch the fingerprint, and merged through the store's quality-weighted
//! running average.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::audio::{MIN_LEARNING_QUALITY, Preprocessor, audio_quality, read_wav, write_wav_mono};
use crate::diarization::{VoiceEmbedder, cosine_similarity};
use crate::error::{MinutaError, Result};
use crate::store::FingerprintService;
use crate::types::VoiceFingerprint;

/// Learning audio beyond this duration is trimmed.
pub const MAX_LEARNING_DURATION_SEC: f64 = 600.0;

/// Default cosine threshold for ad-hoc user comparison.
pub const USER_COMPARE_THRESHOLD: f32 = 0.75;

/// Result of one fingerprint update.
#[derive(Debug, Clone, Serialize)]
pub struct LearnOutcome {
    pub quality_score: f32,
    pub audio_duration_sec: f64,
    pub audio_count: u32,
}

/// Result of comparing a speaker embedding against the user fingerprint.
#[derive(Debug, Clone, Serialize)]
pub struct UserMatch {
    pub is_user: bool,
    pub confidence: f32,
    pub threshold: f32,
}

/// Fingerprint learning and comparison over injected capabilities.
pub struct VoiceLearning {
    preprocessor: Arc<dyn Preprocessor>,
    embedder: Arc<dyn VoiceEmbedder>,
    fingerprints: Arc<FingerprintService>,
}

impl VoiceLearning {
    pub fn new(
        preprocessor: Arc<dyn Preprocessor>,
        embedder: Arc<dyn VoiceEmbedder>,
        fingerprints: Arc<FingerprintService>,
    ) -> Self {
        Self {
            preprocessor,
            embedder,
            fingerprints,
        }
    }

    /// Learn from an audio file on disk.
    ///
    /// The clip is preconditioned, trimmed to [`MAX_LEARNING_DURATION_SEC`]
    /// and quality-scored; anything below [`MIN_LEARNING_QUALITY`] is
    /// rejected with `InvalidInput` and leaves the fingerprint unchanged.
    pub async fn learn_from_file(&self, user_id: &str, path: &Path) -> Result<LearnOutcome> {
        let (processed, sample_rate) = self.preprocessor.precondition(path).await?;

        let data = read_wav(&processed)?;
        let max_samples = (MAX_LEARNING_DURATION_SEC * sample_rate as f64) as usize;
        let samples = if data.samples.len() > max_samples {
            info!(
                user_id,
                "learning audio exceeds {MAX_LEARNING_DURATION_SEC}s, trimming"
            );
            &data.samples[..max_samples]
        } else {
            &data.samples[..]
        };

        let quality = audio_quality(samples, sample_rate);
        if quality < MIN_LEARNING_QUALITY {
            return Err(MinutaError::invalid_input(format!(
                "audio quality too low for voice learning: {quality:.2}"
            )));
        }

        // Re-write when trimmed so the embedder sees exactly the scored
        // audio.
        let embed_path = if samples.len() < data.samples.len() {
            let trimmed = processed.with_file_name("learning_trimmed.wav");
            write_wav_mono(&trimmed, samples, sample_rate)?;
            trimmed
        } else {
            processed
        };

        let embedding = self.embedder.embed(&embed_path).await?;
        let fingerprint = self.fingerprints.update(user_id, &embedding, quality).await?;

        info!(
            user_id,
            quality,
            audio_count = fingerprint.audio_count,
            "fingerprint updated"
        );
        Ok(LearnOutcome {
            quality_score: quality,
            audio_duration_sec: samples.len() as f64 / sample_rate as f64,
            audio_count: fingerprint.audio_count,
        })
    }

    /// Learn from a base64 payload (the voice-learning request body).
    pub async fn learn_from_base64(&self, user_id: &str, audio_base64: &str) -> Result<LearnOutcome> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(audio_base64)
            .map_err(|e| MinutaError::invalid_input(format!("invalid base64 audio: {e}")))?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("learning.wav");
        tokio::fs::write(&path, &bytes).await?;
        self.learn_from_file(user_id, &path).await
    }

    /// Compare a speaker embedding against the stored fingerprint.
    pub async fn compare_with_user(
        &self,
        user_id: &str,
        embedding: &[f32],
        threshold: Option<f32>,
    ) -> Result<UserMatch> {
        let threshold = threshold.unwrap_or(USER_COMPARE_THRESHOLD);
        let Some(fingerprint) = self.fingerprints.get(user_id).await? else {
            return Ok(UserMatch {
                is_user: false,
                confidence: 0.0,
                threshold,
            });
        };
        let confidence = cosine_similarity(embedding, &fingerprint.embedding);
        Ok(UserMatch {
            is_user: confidence >= threshold,
            confidence,
            threshold,
        })
    }

    /// The committed fingerprint, if any.
    pub async fn fingerprint(&self, user_id: &str) -> Result<Option<VoiceFingerprint>> {
        self.fingerprints.get(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::WavPreprocessor;
    use crate::diarization::MockDiarizer;
    use crate::store::{FingerprintService, InMemoryFingerprintStore};

    fn learning() -> VoiceLearning {
        VoiceLearning::new(
            Arc::new(WavPreprocessor),
            Arc::new(MockDiarizer::new()),
            Arc::new(FingerprintService::new(Arc::new(
                InMemoryFingerprintStore::new(),
            ))),
        )
    }

    fn speech_wav(dir: &Path, secs: f64) -> std::path::PathBuf {
        let rate = 16000u32;
        let path = dir.join("voice.wav");
        let n = (rate as f64 * secs) as usize;
        let samples: Vec<f32> = (0..n)
            .map(|i| {
                let t = i as f32 / rate as f32;
                if (t * 1.5).fract() < 0.7 {
                    (t * 660.0).sin() * 0.5
                } else {
                    0.0001
                }
            })
            .collect();
        write_wav_mono(&path, &samples, rate).unwrap();
        path
    }

    fn silence_wav(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("silence.wav");
        write_wav_mono(&path, &vec![1e-5; 32000], 16000).unwrap();
        path
    }

    #[tokio::test]
    async fn learning_updates_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let svc = learning();
        let path = speech_wav(dir.path(), 3.0);

        let outcome = svc.learn_from_file("u1", &path).await.unwrap();
        assert!(outcome.quality_score >= MIN_LEARNING_QUALITY);
        assert_eq!(outcome.audio_count, 1);
        assert!(svc.fingerprint("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn low_quality_rejected_and_fingerprint_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let svc = learning();
        let path = silence_wav(dir.path());

        let err = svc.learn_from_file("u1", &path).await.unwrap_err();
        assert!(matches!(err, MinutaError::InvalidInput(_)));
        assert!(svc.fingerprint("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compare_without_fingerprint_is_negative() {
        let svc = learning();
        let result = svc
            .compare_with_user("nobody", &[1.0, 0.0], None)
            .await
            .unwrap();
        assert!(!result.is_user);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn compare_against_learned_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let svc = learning();
        let path = speech_wav(dir.path(), 3.0);
        svc.learn_from_file("u1", &path).await.unwrap();

        let fp = svc.fingerprint("u1").await.unwrap().unwrap();
        let result = svc
            .compare_with_user("u1", &fp.embedding, None)
            .await
            .unwrap();
        assert!(result.is_user);
        assert!(result.confidence > 0.99);
    }

    #[tokio::test]
    async fn invalid_base64_rejected() {
        let svc = learning();
        let err = svc.learn_from_base64("u1", "%%%not-base64%%%").await.unwrap_err();
        assert!(matches!(err, MinutaError::InvalidInput(_)));
    }
}
