//! minuta-core: speaker-labeled transcription pipeline.
//!
//! A multi-phase orchestrator that downloads and conditions a source
//! recording, diarizes it with cross-chunk identity unification against a
//! persistent per-user voice fingerprint, dispatches time-bounded segments
//! to pluggable speech providers, and merges the results into one globally
//! consistent transcript.
//!
//! ```text
//! blob fetch -> precondition -> diarize + unify + fingerprint
//!            -> (chunk ->)* dispatch to provider -> merge -> persist
//! ```
//!
//! External collaborators (blob store, progress/metadata store,
//! fingerprint store, diarization model, the five speech APIs) sit behind
//! narrow traits with local implementations for tests and the CLI.

// Domain modules
pub mod audio;
pub mod diarization;
pub mod dispatch;
pub mod job;
pub mod merge;
pub mod provider;
pub mod store;
pub mod voice;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod http;
pub mod retry;
pub mod types;

// Re-export the main entry points
pub use config::{ApiConfig, DEFAULT_LANGUAGE, JobConfig, ProviderSelection, SpeechProvider};
pub use dispatch::{
    AudioCharacteristics, DEFAULT_BATCH_SIZE, Dispatcher, ERROR_SENTINEL_TEXT, SegmentTranscript,
    choose_provider, estimate_cost,
};
pub use error::{MinutaError, ProviderError, Result};
pub use job::{JobRunner, PipelineDeps, ProcessingOutcome, ScratchDir};
pub use merge::{ChunkTranscript, merge_chunks};
pub use provider::{
    BackendFactory, CloudBackendFactory, SpeechBackend, TextSpan, Transcription, create_backend,
};
pub use store::{
    BlobStore, FingerprintService, FingerprintStore, FsBlobStore, InMemoryFingerprintStore,
    InMemoryProgressStore, JsonFingerprintStore, JsonProgressStore, ProgressReporter,
    ProgressStore,
};
pub use types::{
    ChunkInfo, GlobalSpeaker, GlobalSpeakersDoc, JobRecord, JobStatus, MergedTranscript,
    QualityStats, SELF_SPEAKER_NAME, SpeakerAnalysis, SpeakerSegment, SpeakerStats, StatusUpdate,
    TranscribedSegment, VoiceFingerprint, WordTimestamp,
};
pub use voice::{LearnOutcome, MAX_LEARNING_DURATION_SEC, UserMatch, VoiceLearning};

pub use diarization::{
    Diarizer, HostedDiarizer, MockDiarizer, VoiceEmbedder, cosine_similarity, unify_speakers,
};
