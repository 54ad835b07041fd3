//! Core data model shared across the pipeline.
//!
//! Times are seconds as `f64`, confidences are `f32` in `[0, 1]`, and
//! voice embeddings are fixed-dimension `Vec<f32>` compared by cosine
//! similarity.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved display name for the speaker matching the user fingerprint.
pub const SELF_SPEAKER_NAME: &str = "self";

/// Lifecycle of one audio job. Terminal states are `Completed`,
/// `Cancelled` and `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Preprocessing,
    SpeakerAnalysis,
    ChunkProcessing,
    Transcribing,
    Integrating,
    Completed,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Preprocessing => "preprocessing",
            Self::SpeakerAnalysis => "speaker_analysis",
            Self::ChunkProcessing => "chunk_processing",
            Self::Transcribing => "transcribing",
            Self::Integrating => "integrating",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress write to the status document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: JobStatus,
    /// Percentage in `[0, 100]`, monotone non-decreasing per job.
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus, progress: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            progress,
            message: message.into(),
            current_chunk: None,
            total_chunks: None,
        }
    }

    pub fn with_chunks(mut self, current: usize, total: usize) -> Self {
        self.current_chunk = Some(current);
        self.total_chunks = Some(total);
        self
    }
}

/// Speaker turn produced by diarization, labeled locally to one
/// diarization call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    /// Label unique within the producing diarization call, e.g. `SPEAKER_00`.
    pub local_speaker_label: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl SpeakerSegment {
    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

/// Speaker identity unified across all chunks of one recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSpeaker {
    pub global_id: String,
    /// `"self"` when the cluster matches the user fingerprint, otherwise
    /// a stable numbered label.
    pub display_name: String,
    pub representative_embedding: Vec<f32>,
    pub confidence: f32,
    pub segment_count: usize,
}

impl GlobalSpeaker {
    pub fn is_self(&self) -> bool {
        self.display_name == SELF_SPEAKER_NAME
    }
}

/// Word-level timing attached to a transcribed segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
}

/// Transcribed, speaker-attributed interval of the final transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribedSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    pub confidence: f32,
    pub global_speaker_id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub word_timestamps: Vec<WordTimestamp>,
    /// Set on sentinel segments whose provider call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persistent per-user voice embedding, updated by a quality-weighted
/// running average and kept at unit L2 norm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceFingerprint {
    pub embedding: Vec<f32>,
    pub quality_score: f32,
    pub audio_count: u32,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

/// One window of the source recording, processed independently.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    pub index: usize,
    pub offset_sec: f64,
    pub path: PathBuf,
    pub duration_sec: f64,
}

/// Output of diarization plus cross-chunk unification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerAnalysis {
    pub speaker_count: usize,
    pub segments: Vec<SpeakerSegment>,
    pub global_speakers: Vec<GlobalSpeaker>,
    /// `local_speaker_label -> global_id`.
    pub speaker_map: HashMap<String, String>,
    pub consistency_score: f32,
}

impl SpeakerAnalysis {
    /// Ratio of adjacent segments keeping the same speaker, floored at 0.5.
    pub fn consistency_of(segments: &[SpeakerSegment]) -> f32 {
        if segments.len() < 2 {
            return 1.0;
        }
        let changes = segments
            .windows(2)
            .filter(|w| w[0].local_speaker_label != w[1].local_speaker_label)
            .count();
        let consistency = 1.0 - changes as f32 / (segments.len() - 1) as f32;
        consistency.max(0.5)
    }
}

/// Per-speaker aggregate over the merged transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakerStats {
    pub total_duration: f64,
    pub segment_count: usize,
    pub avg_confidence: f32,
}

/// Confidence distribution over the merged transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityStats {
    pub avg_confidence: f32,
    pub min_confidence: f32,
    pub max_confidence: f32,
    pub total_segments: usize,
    pub low_confidence_segments: usize,
}

/// Final merged transcript with statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedTranscript {
    pub segments: Vec<TranscribedSegment>,
    pub speaker_statistics: HashMap<String, SpeakerStats>,
    pub quality_statistics: QualityStats,
    pub total_segments: usize,
    pub processing_method: String,
}

/// Status document persisted under `audios/{user_id}/files/{audio_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    #[serde(rename = "processingProgress")]
    pub processing_progress: u8,
    #[serde(rename = "statusMessage")]
    pub status_message: String,
    #[serde(rename = "processedChunks", skip_serializing_if = "Option::is_none")]
    pub processed_chunks: Option<usize>,
    #[serde(rename = "totalChunks", skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<MergedTranscript>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_analysis: Option<SpeakerAnalysis>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Document persisted under `globalSpeakers/{audio_id}` after unification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSpeakersDoc {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "speakerClusters")]
    pub speaker_clusters: Vec<GlobalSpeaker>,
    #[serde(rename = "userSpeakerMapping")]
    pub user_speaker_mapping: HashMap<String, String>,
    #[serde(rename = "speakersCount")]
    pub speakers_count: usize,
    #[serde(rename = "confidenceScores")]
    pub confidence_scores: Vec<f32>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::ChunkProcessing.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&JobStatus::SpeakerAnalysis).unwrap();
        assert_eq!(s, r#""speaker_analysis""#);
    }

    #[test]
    fn consistency_floor() {
        let seg = |label: &str| SpeakerSegment {
            start_sec: 0.0,
            end_sec: 1.0,
            local_speaker_label: label.to_string(),
            confidence: 0.9,
            embedding: None,
        };
        // Alternating speakers would compute 0.0, floored to 0.5.
        let segments = vec![seg("a"), seg("b"), seg("a"), seg("b")];
        assert_eq!(SpeakerAnalysis::consistency_of(&segments), 0.5);
        assert_eq!(SpeakerAnalysis::consistency_of(&[seg("a")]), 1.0);
    }
}
