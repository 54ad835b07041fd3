//! Transcription dispatch: provider fallback, batched segment calls and
//! the advisory provider-choice heuristic.
//!
//! Segment dispatch runs batches of [`DEFAULT_BATCH_SIZE`] concurrently
//! while a process-global semaphore caps in-flight provider calls across
//! all jobs, protecting API quotas. A failed segment becomes a sentinel
//! result and never aborts its siblings.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::{ApiConfig, SpeechProvider};
use crate::provider::{BackendFactory, ProviderError, SpeechBackend, Transcription};
use crate::types::{SpeakerSegment, WordTimestamp};

/// Segments transcribed concurrently within one batch.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Process-wide cap on concurrent provider calls.
const GLOBAL_PROVIDER_PERMITS: usize = 8;

/// Text carried by sentinel results for failed segments.
pub const ERROR_SENTINEL_TEXT: &str = "[error]";

static PROVIDER_PERMITS: OnceLock<Arc<Semaphore>> = OnceLock::new();

fn provider_permits() -> Arc<Semaphore> {
    PROVIDER_PERMITS
        .get_or_init(|| Arc::new(Semaphore::new(GLOBAL_PROVIDER_PERMITS)))
        .clone()
}

/// Per-segment transcription outcome, still carrying the local speaker
/// label; the merger maps it to a global identity.
#[derive(Debug, Clone)]
pub struct SegmentTranscript {
    pub start_sec: f64,
    pub end_sec: f64,
    pub local_speaker_label: String,
    pub text: String,
    pub confidence: f32,
    pub provider: String,
    pub word_timestamps: Vec<WordTimestamp>,
    pub error: Option<String>,
}

impl SegmentTranscript {
    fn sentinel(segment: &SpeakerSegment, provider: &str, error: &ProviderError) -> Self {
        Self {
            start_sec: segment.start_sec,
            end_sec: segment.end_sec,
            local_speaker_label: segment.local_speaker_label.clone(),
            text: ERROR_SENTINEL_TEXT.to_string(),
            confidence: 0.0,
            provider: provider.to_string(),
            word_timestamps: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Routes transcription work to provider backends.
pub struct Dispatcher {
    factory: Arc<dyn BackendFactory>,
    batch_size: usize,
}

impl Dispatcher {
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Transcribe a whole file, trying `primary` first and then each
    /// fallback in order. Only the last error surfaces if every
    /// configuration fails.
    pub async fn transcribe_whole(
        &self,
        path: &Path,
        primary: &ApiConfig,
        fallbacks: &[ApiConfig],
    ) -> Result<Transcription, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for (attempt, config) in std::iter::once(primary).chain(fallbacks.iter()).enumerate() {
            let backend = match self.factory.create(config) {
                Ok(backend) => backend,
                Err(e) => {
                    warn!(provider = %config.provider, "backend unavailable: {e}");
                    last_error = Some(e);
                    continue;
                }
            };

            info!(
                provider = %config.provider,
                attempt = attempt + 1,
                "attempting transcription"
            );
            let permits = provider_permits();
            let _permit = permits.acquire().await.expect("semaphore closed");
            match backend.transcribe(path).await {
                Ok(result) => {
                    info!(provider = %config.provider, "transcription succeeded");
                    return Ok(result);
                }
                Err(e) => {
                    warn!(provider = %config.provider, "transcription failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::Other("no provider configured".to_string())))
    }

    /// Transcribe segments with provider fallback.
    ///
    /// Runs the full set against `primary`, then re-dispatches only the
    /// failed segments against each fallback in order. Segments failing
    /// every configuration keep their sentinel from the last attempt.
    pub async fn transcribe_segments_with_fallback(
        &self,
        path: &Path,
        segments: &[SpeakerSegment],
        primary: &ApiConfig,
        fallbacks: &[ApiConfig],
    ) -> Result<Vec<SegmentTranscript>, ProviderError> {
        let mut results = self.transcribe_segments(path, segments, primary).await?;

        for fallback in fallbacks {
            let failed: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| r.error.is_some())
                .map(|(i, _)| i)
                .collect();
            if failed.is_empty() {
                break;
            }

            info!(
                provider = %fallback.provider,
                segments = failed.len(),
                "retrying failed segments against fallback provider"
            );
            let retry_segments: Vec<SpeakerSegment> = failed
                .iter()
                .map(|&i| SpeakerSegment {
                    start_sec: segments[i].start_sec,
                    end_sec: segments[i].end_sec,
                    local_speaker_label: segments[i].local_speaker_label.clone(),
                    confidence: segments[i].confidence,
                    embedding: None,
                })
                .collect();

            match self.transcribe_segments(path, &retry_segments, fallback).await {
                Ok(retried) => {
                    for (&slot, result) in failed.iter().zip(retried) {
                        if result.error.is_none() {
                            results[slot] = result;
                        }
                    }
                }
                Err(e) => {
                    warn!(provider = %fallback.provider, "fallback unavailable: {e}");
                }
            }
        }

        Ok(results)
    }

    /// Transcribe diarization segments against one provider.
    ///
    /// Splits `segments` into batches; within a batch the calls run
    /// concurrently, across batches sequentially. The output preserves
    /// input order, with failed segments replaced by sentinels.
    pub async fn transcribe_segments(
        &self,
        path: &Path,
        segments: &[SpeakerSegment],
        config: &ApiConfig,
    ) -> Result<Vec<SegmentTranscript>, ProviderError> {
        let backend = self.factory.create(config)?;
        let provider = backend.name();
        let mut results = Vec::with_capacity(segments.len());

        for batch in segments.chunks(self.batch_size) {
            let futures = batch.iter().map(|segment| {
                let backend: Arc<dyn SpeechBackend> = backend.clone();
                async move {
                    let permits = provider_permits();
                    let _permit = permits.acquire().await.expect("semaphore closed");
                    backend
                        .transcribe_segment(path, segment.start_sec, segment.end_sec)
                        .await
                }
            });

            for (segment, outcome) in batch.iter().zip(join_all(futures).await) {
                match outcome {
                    Ok(t) => results.push(SegmentTranscript {
                        start_sec: segment.start_sec,
                        end_sec: segment.end_sec,
                        local_speaker_label: segment.local_speaker_label.clone(),
                        text: t.text,
                        confidence: t.confidence,
                        provider: t.provider,
                        word_timestamps: t.word_timestamps,
                        error: None,
                    }),
                    Err(e) => {
                        warn!(
                            start = segment.start_sec,
                            end = segment.end_sec,
                            "segment transcription failed: {e}"
                        );
                        results.push(SegmentTranscript::sentinel(segment, provider, &e));
                    }
                }
            }
        }

        Ok(results)
    }
}

/// Audio traits feeding the advisory provider choice.
#[derive(Debug, Clone, Copy)]
pub struct AudioCharacteristics {
    pub duration_sec: f64,
    /// Estimated noise floor share in `[0, 1]`.
    pub noise_level: f64,
    pub speaker_count: usize,
}

/// Pick a provider from audio characteristics; used when the job config
/// selects `auto`.
pub fn choose_provider(traits: &AudioCharacteristics) -> SpeechProvider {
    if traits.duration_sec > 3600.0 {
        if traits.noise_level > 0.7 {
            return SpeechProvider::AssemblyAi;
        }
        return SpeechProvider::Deepgram;
    }
    if traits.speaker_count > 3 {
        return SpeechProvider::AssemblyAi;
    }
    if traits.noise_level > 0.6 {
        return SpeechProvider::OpenAi;
    }
    SpeechProvider::Deepgram
}

/// Advisory cost estimate in USD for transcribing `duration_sec` of audio.
pub fn estimate_cost(provider: SpeechProvider, duration_sec: f64) -> f64 {
    provider.cost_per_minute() * duration_sec / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that fails the first `fail_first` calls and any segment
    /// starting at `fail_marker`, succeeding otherwise.
    #[derive(Debug)]
    struct ScriptedBackend {
        name: &'static str,
        calls: AtomicUsize,
        fail_first: usize,
        fail_marker: Option<f64>,
    }

    impl ScriptedBackend {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail_first: 0,
                fail_marker: None,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail_first: usize::MAX,
                fail_marker: None,
            })
        }

        fn failing_at(name: &'static str, marker: f64) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail_first: 0,
                fail_marker: Some(marker),
            })
        }
    }

    #[async_trait]
    impl SpeechBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn transcribe(&self, _path: &Path) -> Result<Transcription, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ProviderError::from_status(
                    self.name,
                    500,
                    "server exploded".to_string(),
                ));
            }
            Ok(Transcription {
                text: format!("text from {}", self.name),
                confidence: 0.9,
                segments: Vec::new(),
                language: "ja-JP".to_string(),
                processing_time_sec: 0.01,
                provider: self.name.to_string(),
                model: "test".to_string(),
                word_timestamps: Vec::new(),
            })
        }

        async fn transcribe_segment(
            &self,
            path: &Path,
            start_sec: f64,
            _end_sec: f64,
        ) -> Result<Transcription, ProviderError> {
            if self.fail_marker == Some(start_sec) {
                return Err(ProviderError::TranscriptionFailed("marker".to_string()));
            }
            let mut t = self.transcribe(path).await?;
            t.text = format!("segment at {start_sec}");
            Ok(t)
        }
    }

    struct ScriptedFactory {
        backends: Vec<(SpeechProvider, Arc<ScriptedBackend>)>,
    }

    impl BackendFactory for ScriptedFactory {
        fn create(&self, config: &ApiConfig) -> Result<Arc<dyn SpeechBackend>, ProviderError> {
            self.backends
                .iter()
                .find(|(p, _)| *p == config.provider)
                .map(|(_, b)| b.clone() as Arc<dyn SpeechBackend>)
                .ok_or_else(|| ProviderError::NotFound(config.provider.to_string()))
        }
    }

    fn seg(label: &str, start: f64) -> SpeakerSegment {
        SpeakerSegment {
            start_sec: start,
            end_sec: start + 2.0,
            local_speaker_label: label.to_string(),
            confidence: 0.9,
            embedding: None,
        }
    }

    #[tokio::test]
    async fn fallback_reaches_working_provider() {
        let ok = ScriptedBackend::ok("deepgram");
        let factory = ScriptedFactory {
            backends: vec![
                (SpeechProvider::OpenAi, ScriptedBackend::failing("openai")),
                (SpeechProvider::Azure, ScriptedBackend::failing("azure")),
                (SpeechProvider::Deepgram, ok.clone()),
            ],
        };
        let dispatcher = Dispatcher::new(Arc::new(factory));

        let result = dispatcher
            .transcribe_whole(
                Path::new("unused.wav"),
                &ApiConfig::new(SpeechProvider::OpenAi, "k"),
                &[
                    ApiConfig::new(SpeechProvider::Azure, "k"),
                    ApiConfig::new(SpeechProvider::Deepgram, "k"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.provider, "deepgram");
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_failures_surface_last_error() {
        let factory = ScriptedFactory {
            backends: vec![
                (SpeechProvider::OpenAi, ScriptedBackend::failing("openai")),
                (SpeechProvider::Deepgram, ScriptedBackend::failing("deepgram")),
            ],
        };
        let dispatcher = Dispatcher::new(Arc::new(factory));

        let err = dispatcher
            .transcribe_whole(
                Path::new("unused.wav"),
                &ApiConfig::new(SpeechProvider::OpenAi, "k"),
                &[ApiConfig::new(SpeechProvider::Deepgram, "k")],
            )
            .await
            .unwrap_err();
        // The last provider in the chain owns the surfaced error.
        assert!(err.to_string().contains("deepgram"));
    }

    #[tokio::test]
    async fn segment_failures_are_localized() {
        let factory = ScriptedFactory {
            backends: vec![(
                SpeechProvider::Deepgram,
                ScriptedBackend::failing_at("deepgram", 13.0),
            )],
        };
        let dispatcher = Dispatcher::new(Arc::new(factory));

        let segments = vec![seg("A", 0.0), seg("B", 13.0), seg("A", 20.0)];
        let results = dispatcher
            .transcribe_segments(
                Path::new("unused.wav"),
                &segments,
                &ApiConfig::new(SpeechProvider::Deepgram, "k"),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].text, "segment at 0");
        assert_eq!(results[1].text, ERROR_SENTINEL_TEXT);
        assert_eq!(results[1].confidence, 0.0);
        assert!(results[1].error.is_some());
        assert_eq!(results[2].text, "segment at 20");
        // Input order preserved.
        assert_eq!(results[2].local_speaker_label, "A");
    }

    #[tokio::test]
    async fn batches_preserve_order_across_boundaries() {
        let factory = ScriptedFactory {
            backends: vec![(SpeechProvider::Deepgram, ScriptedBackend::ok("deepgram"))],
        };
        let dispatcher = Dispatcher::new(Arc::new(factory)).with_batch_size(2);

        let segments: Vec<SpeakerSegment> =
            (0..7).map(|i| seg("S", i as f64 * 10.0)).collect();
        let results = dispatcher
            .transcribe_segments(
                Path::new("unused.wav"),
                &segments,
                &ApiConfig::new(SpeechProvider::Deepgram, "k"),
            )
            .await
            .unwrap();

        let starts: Vec<f64> = results.iter().map(|r| r.start_sec).collect();
        assert_eq!(starts, vec![0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
    }

    #[tokio::test]
    async fn fallback_rescues_failed_segments() {
        let factory = ScriptedFactory {
            backends: vec![
                (SpeechProvider::OpenAi, ScriptedBackend::failing_at("openai", 13.0)),
                (SpeechProvider::Deepgram, ScriptedBackend::ok("deepgram")),
            ],
        };
        let dispatcher = Dispatcher::new(Arc::new(factory));

        let segments = vec![seg("A", 0.0), seg("A", 13.0)];
        let results = dispatcher
            .transcribe_segments_with_fallback(
                Path::new("unused.wav"),
                &segments,
                &ApiConfig::new(SpeechProvider::OpenAi, "k"),
                &[ApiConfig::new(SpeechProvider::Deepgram, "k")],
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        // Healthy segments keep the primary's result.
        assert_eq!(results[0].provider, "openai");
        assert!(results[0].error.is_none());
        // The failed segment was rescued by the fallback provider.
        assert_eq!(results[1].provider, "deepgram");
        assert!(results[1].error.is_none());
    }

    #[test]
    fn heuristic_table() {
        let pick = |duration_sec, noise_level, speaker_count| {
            choose_provider(&AudioCharacteristics {
                duration_sec,
                noise_level,
                speaker_count,
            })
        };
        assert_eq!(pick(4000.0, 0.8, 2), SpeechProvider::AssemblyAi);
        assert_eq!(pick(4000.0, 0.3, 2), SpeechProvider::Deepgram);
        assert_eq!(pick(600.0, 0.3, 4), SpeechProvider::AssemblyAi);
        assert_eq!(pick(600.0, 0.65, 2), SpeechProvider::OpenAi);
        assert_eq!(pick(600.0, 0.2, 1), SpeechProvider::Deepgram);
    }

    #[test]
    fn cost_estimate_scales_with_duration() {
        let one_hour = estimate_cost(SpeechProvider::Deepgram, 3600.0);
        assert!((one_hour - 0.258).abs() < 1e-9);
    }
}
