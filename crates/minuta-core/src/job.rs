//! Job orchestration: the phase state machine driving one audio job.
//!
//! ```text
//! queued -> preprocessing -> speaker_analysis -> (chunk_processing | transcribing)
//!        -> integrating -> completed
//!                          \_ any stage -> cancelled | error
//! ```
//!
//! The runner owns the job's scratch directory and removes it on every
//! exit path. Progress is published at fixed waypoints and is monotone
//! per job; cancellation is observed at every await point and results in
//! exactly one further status write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::audio::{self, Preprocessor, read_wav};
use crate::config::{ApiConfig, JobConfig, ProviderSelection};
use crate::diarization::{Diarizer, unify_speakers};
use crate::dispatch::{AudioCharacteristics, Dispatcher, choose_provider};
use crate::error::{MinutaError, Result};
use crate::merge::{ChunkTranscript, merge_chunks};
use crate::provider::BackendFactory;
use crate::store::{
    BlobStore, FingerprintService, ProgressReporter, ProgressStore, fetch_to_scratch,
};
use crate::types::{
    ChunkInfo, GlobalSpeakersDoc, JobStatus, MergedTranscript, SpeakerAnalysis, SpeakerSegment,
    StatusUpdate,
};

/// Process-scope collaborators injected into every job.
pub struct PipelineDeps {
    pub blob: Arc<dyn BlobStore>,
    pub preprocessor: Arc<dyn Preprocessor>,
    pub diarizer: Arc<dyn Diarizer>,
    pub fingerprints: Arc<FingerprintService>,
    pub progress: Arc<dyn ProgressStore>,
    pub backends: Arc<dyn BackendFactory>,
}

/// Final result of a completed job.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    pub transcription: MergedTranscript,
    pub speaker_analysis: SpeakerAnalysis,
    pub processing_time_sec: f64,
    pub total_chunks: Option<usize>,
}

/// Job-owned scratch directory, deleted on drop.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(user_id: &str, audio_id: &str) -> Result<Self> {
        let path = std::env::temp_dir()
            .join("minuta")
            .join(format!("{user_id}_{audio_id}"));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Drives one job through the phase graph.
pub struct JobRunner {
    deps: Arc<PipelineDeps>,
}

impl JobRunner {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    /// Run a job to a terminal state.
    ///
    /// On success the status document reads `completed`/100 and carries the
    /// transcription. On cancellation or error the terminal status is
    /// written once, scratch is removed, and the error is re-raised to the
    /// task runner.
    pub async fn run(
        &self,
        user_id: &str,
        audio_id: &str,
        config: &JobConfig,
        api: &ApiConfig,
        fallbacks: &[ApiConfig],
        cancel: &CancellationToken,
    ) -> Result<ProcessingOutcome> {
        let started = Instant::now();
        let scratch = ScratchDir::create(user_id, audio_id)?;
        let mut reporter = ProgressReporter::new(self.deps.progress.clone(), user_id, audio_id);

        let result = self
            .run_phases(
                user_id, audio_id, config, api, fallbacks, cancel, &scratch, &mut reporter,
            )
            .await;

        match result {
            Ok(mut outcome) => {
                reporter
                    .publish_simple(JobStatus::Completed, 100, "processing complete")
                    .await;
                outcome.processing_time_sec = started.elapsed().as_secs_f64();
                info!(
                    user_id,
                    audio_id,
                    elapsed_sec = outcome.processing_time_sec,
                    "job completed"
                );
                Ok(outcome)
            }
            Err(MinutaError::Cancelled) => {
                // Exactly one write after the signal; business state is
                // untouched beyond the status document.
                reporter
                    .publish_simple(JobStatus::Cancelled, 0, "processing cancelled")
                    .await;
                info!(user_id, audio_id, "job cancelled");
                Err(MinutaError::Cancelled)
            }
            Err(e) => {
                reporter
                    .publish_simple(JobStatus::Error, 0, &format!("processing failed: {e}"))
                    .await;
                error!(user_id, audio_id, "job failed: {e}");
                Err(e)
            }
        }
        // `scratch` drops here on every path, removing the directory.
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phases(
        &self,
        user_id: &str,
        audio_id: &str,
        config: &JobConfig,
        api: &ApiConfig,
        fallbacks: &[ApiConfig],
        cancel: &CancellationToken,
        scratch: &ScratchDir,
        reporter: &mut ProgressReporter,
    ) -> Result<ProcessingOutcome> {
        ensure_live(cancel)?;
        reporter
            .publish_simple(JobStatus::Preprocessing, 5, "downloading source audio")
            .await;
        let source = fetch_to_scratch(self.deps.blob.as_ref(), user_id, audio_id, scratch.path())
            .await?;

        ensure_live(cancel)?;
        reporter
            .publish_simple(JobStatus::Preprocessing, 10, "conditioning audio")
            .await;
        let (processed, _rate) = self.deps.preprocessor.precondition(&source).await?;
        reporter
            .publish_simple(JobStatus::Preprocessing, 15, "audio conditioned")
            .await;

        let duration_sec = audio::wav_duration_sec(&processed)?;
        reporter
            .publish_simple(JobStatus::Preprocessing, 20, "probing audio characteristics")
            .await;

        // Phase: speaker analysis.
        ensure_live(cancel)?;
        reporter
            .publish_simple(JobStatus::SpeakerAnalysis, 25, "running speaker diarization")
            .await;
        let segments = tokio::select! {
            _ = cancel.cancelled() => return Err(MinutaError::Cancelled),
            r = self.deps.diarizer.diarize(&processed, config.max_speakers) => r?,
        };
        reporter
            .publish_simple(JobStatus::SpeakerAnalysis, 35, "unifying speaker identities")
            .await;

        let fingerprint = self.deps.fingerprints.get(user_id).await?;
        let unified = unify_speakers(
            &segments,
            fingerprint.as_ref().map(|fp| fp.embedding.as_slice()),
            config.max_speakers,
            config.user_match_threshold,
        );
        // Consistency is scored on final speaker identities: turns the
        // unifier collapsed into one cluster must not count as changes.
        let global_turns = map_to_global_labels(&segments, &unified.speaker_map);
        let analysis = SpeakerAnalysis {
            speaker_count: unified.global_speakers.len(),
            consistency_score: SpeakerAnalysis::consistency_of(&global_turns),
            segments,
            global_speakers: unified.global_speakers,
            speaker_map: unified.speaker_map,
        };

        self.save_global_speakers(user_id, audio_id, &analysis).await?;
        reporter
            .publish_simple(JobStatus::SpeakerAnalysis, 40, "speaker analysis complete")
            .await;

        // Phase: transcription, chunked or direct.
        let api = self
            .resolve_api(config, api, duration_sec, &analysis, &processed)
            .await?;
        let dispatcher = Dispatcher::new(self.deps.backends.clone());

        let (chunk_results, total_chunks, method) = if duration_sec > config.chunk_threshold_sec {
            let (results, total) = self
                .transcribe_chunked(
                    &processed, config, &api, fallbacks, &analysis, cancel, scratch, reporter,
                    &dispatcher,
                )
                .await?;
            (results, Some(total), "chunk_integrated")
        } else {
            ensure_live(cancel)?;
            reporter
                .publish_simple(JobStatus::Transcribing, 60, "transcribing audio")
                .await;
            let results = tokio::select! {
                _ = cancel.cancelled() => return Err(MinutaError::Cancelled),
                r = dispatcher.transcribe_segments_with_fallback(
                    &processed,
                    &analysis.segments,
                    &api,
                    fallbacks,
                ) => r?,
            };
            reporter
                .publish_simple(JobStatus::Transcribing, 90, "transcription complete")
                .await;
            (vec![ChunkTranscript::direct(results)], None, "direct")
        };

        // Phase: integration.
        ensure_live(cancel)?;
        reporter
            .publish_simple(JobStatus::Integrating, 92, "merging transcription results")
            .await;
        let transcription = merge_chunks(
            chunk_results,
            &analysis.speaker_map,
            config.overlap_dedupe_threshold,
            method,
        );

        self.deps
            .progress
            .save_result(user_id, audio_id, &transcription, &analysis)
            .await?;
        reporter
            .publish_simple(JobStatus::Integrating, 98, "results persisted")
            .await;

        Ok(ProcessingOutcome {
            transcription,
            speaker_analysis: analysis,
            processing_time_sec: 0.0,
            total_chunks,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn transcribe_chunked(
        &self,
        processed: &Path,
        config: &JobConfig,
        api: &ApiConfig,
        fallbacks: &[ApiConfig],
        analysis: &SpeakerAnalysis,
        cancel: &CancellationToken,
        scratch: &ScratchDir,
        reporter: &mut ProgressReporter,
        dispatcher: &Dispatcher,
    ) -> Result<(Vec<ChunkTranscript>, usize)> {
        let source = processed.to_path_buf();
        let chunk_dir = scratch.path().to_path_buf();
        let (window, overlap) = (config.chunk_window_sec, config.overlap_sec);
        let chunks: Vec<ChunkInfo> =
            tokio::task::spawn_blocking(move || audio::split(&source, &chunk_dir, window, overlap))
                .await
                .map_err(|e| MinutaError::Fatal(format!("chunking task failed: {e}")))??;

        let total = chunks.len();
        reporter
            .publish(
                StatusUpdate::new(
                    JobStatus::ChunkProcessing,
                    40,
                    format!("split into {total} chunks"),
                )
                .with_chunks(0, total),
            )
            .await;

        let mut results = Vec::with_capacity(total);
        for chunk in &chunks {
            ensure_live(cancel)?;
            let local_segments = segments_for_chunk(&analysis.segments, chunk);
            let transcripts = tokio::select! {
                _ = cancel.cancelled() => return Err(MinutaError::Cancelled),
                r = dispatcher.transcribe_segments_with_fallback(
                    &chunk.path,
                    &local_segments,
                    api,
                    fallbacks,
                ) => r?,
            };
            results.push(ChunkTranscript {
                offset_sec: chunk.offset_sec,
                segments: transcripts,
            });

            let done = chunk.index + 1;
            let progress = 40 + ((done as f64 / total as f64) * 40.0) as u8;
            reporter
                .publish(
                    StatusUpdate::new(
                        JobStatus::ChunkProcessing,
                        progress,
                        format!("processed chunk {done}/{total}"),
                    )
                    .with_chunks(done, total),
                )
                .await;
        }

        Ok((results, total))
    }

    /// Resolve `auto` provider selection against measured audio traits and
    /// fold the job config's language/model into the API configuration.
    async fn resolve_api(
        &self,
        config: &JobConfig,
        api: &ApiConfig,
        duration_sec: f64,
        analysis: &SpeakerAnalysis,
        processed: &Path,
    ) -> Result<ApiConfig> {
        let mut resolved = api.clone();
        resolved.language = config.language.clone();
        if let Some(model) = &config.speech_model {
            resolved.model = Some(model.clone());
        }

        if let ProviderSelection::Fixed(provider) = config.speech_provider {
            resolved.provider = provider;
            return Ok(resolved);
        }

        // `auto`: estimate noise as the complement of the conditioning
        // quality score and let the heuristic pick.
        let path = processed.to_path_buf();
        let noise_level = tokio::task::spawn_blocking(move || -> Result<f64> {
            let data = read_wav(&path)?;
            Ok(1.0 - audio::audio_quality(&data.samples, data.sample_rate) as f64)
        })
        .await
        .map_err(|e| MinutaError::Fatal(format!("noise analysis task failed: {e}")))??;
        let traits = AudioCharacteristics {
            duration_sec,
            noise_level,
            speaker_count: analysis.speaker_count,
        };
        let provider = choose_provider(&traits);
        info!(
            provider = %provider,
            duration_sec,
            noise_level,
            speakers = analysis.speaker_count,
            "auto-selected speech provider"
        );
        resolved.provider = provider;
        resolved.model = None;
        Ok(resolved)
    }

    async fn save_global_speakers(
        &self,
        user_id: &str,
        audio_id: &str,
        analysis: &SpeakerAnalysis,
    ) -> Result<()> {
        let doc = GlobalSpeakersDoc {
            user_id: user_id.to_string(),
            speaker_clusters: analysis.global_speakers.clone(),
            user_speaker_mapping: analysis
                .global_speakers
                .iter()
                .filter(|g| g.is_self())
                .map(|g| (g.global_id.clone(), g.display_name.clone()))
                .collect::<HashMap<_, _>>(),
            speakers_count: analysis.speaker_count,
            confidence_scores: analysis.global_speakers.iter().map(|g| g.confidence).collect(),
            created_at: Utc::now(),
        };
        self.deps.progress.save_global_speakers(audio_id, &doc).await
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(MinutaError::Cancelled);
    }
    Ok(())
}

/// Relabel diarization turns with their global speaker ids; unknown
/// labels pass through unchanged.
fn map_to_global_labels(
    segments: &[SpeakerSegment],
    speaker_map: &HashMap<String, String>,
) -> Vec<SpeakerSegment> {
    segments
        .iter()
        .map(|s| SpeakerSegment {
            start_sec: s.start_sec,
            end_sec: s.end_sec,
            local_speaker_label: speaker_map
                .get(&s.local_speaker_label)
                .cloned()
                .unwrap_or_else(|| s.local_speaker_label.clone()),
            confidence: s.confidence,
            embedding: None,
        })
        .collect()
}

/// Project diarization segments onto one chunk's window, clipped and
/// re-based to chunk-relative time.
fn segments_for_chunk(segments: &[SpeakerSegment], chunk: &ChunkInfo) -> Vec<SpeakerSegment> {
    let chunk_end = chunk.offset_sec + chunk.duration_sec;
    segments
        .iter()
        .filter_map(|s| {
            let start = s.start_sec.max(chunk.offset_sec);
            let end = s.end_sec.min(chunk_end);
            if end - start < 0.1 {
                return None;
            }
            Some(SpeakerSegment {
                start_sec: start - chunk.offset_sec,
                end_sec: end - chunk.offset_sec,
                local_speaker_label: s.local_speaker_label.clone(),
                confidence: s.confidence,
                embedding: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(label: &str, start: f64, end: f64) -> SpeakerSegment {
        SpeakerSegment {
            start_sec: start,
            end_sec: end,
            local_speaker_label: label.to_string(),
            confidence: 0.9,
            embedding: None,
        }
    }

    #[test]
    fn chunk_projection_clips_and_rebases() {
        let chunk = ChunkInfo {
            index: 1,
            offset_sec: 100.0,
            path: PathBuf::from("chunk_1.wav"),
            duration_sec: 50.0,
        };
        let segments = vec![
            seg("A", 10.0, 20.0),   // before the chunk
            seg("B", 95.0, 110.0),  // straddles the start
            seg("C", 120.0, 130.0), // inside
            seg("D", 145.0, 160.0), // straddles the end
            seg("E", 200.0, 210.0), // after
        ];
        let local = segments_for_chunk(&segments, &chunk);
        assert_eq!(local.len(), 3);
        assert_eq!(local[0].local_speaker_label, "B");
        assert!((local[0].start_sec - 0.0).abs() < 1e-9);
        assert!((local[0].end_sec - 10.0).abs() < 1e-9);
        assert!((local[2].end_sec - 50.0).abs() < 1e-9);
    }

    #[test]
    fn unified_labels_restore_consistency() {
        // Two local labels alternating turn-to-turn, both belonging to the
        // same global cluster: raw labels score the 0.5 floor, global
        // labels score a clean 1.0.
        let segments = vec![
            seg("A0", 0.0, 2.0),
            seg("B0", 2.0, 4.0),
            seg("A0", 4.0, 6.0),
            seg("B0", 6.0, 8.0),
        ];
        assert_eq!(SpeakerAnalysis::consistency_of(&segments), 0.5);

        let map: HashMap<String, String> = [("A0", "SPEAKER_00"), ("B0", "SPEAKER_00")]
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let global = map_to_global_labels(&segments, &map);
        assert_eq!(SpeakerAnalysis::consistency_of(&global), 1.0);
    }

    #[test]
    fn unknown_labels_pass_through_unmapped() {
        let segments = vec![seg("GHOST", 0.0, 2.0)];
        let global = map_to_global_labels(&segments, &HashMap::new());
        assert_eq!(global[0].local_speaker_label, "GHOST");
    }

    #[test]
    fn scratch_dir_removed_on_drop() {
        let scratch = ScratchDir::create("user", "audio").unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(path.join("junk.bin"), b"x").unwrap();
        assert!(path.exists());
        drop(scratch);
        assert!(!path.exists());
    }
}
