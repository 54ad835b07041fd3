//! Job status and result persistence.
//!
//! The document store is an external collaborator; [`ProgressStore`] is the
//! narrow interface the orchestrator writes through. [`ProgressReporter`]
//! layers on the publication contract: monotone progress, issue-order
//! writes (the reporter is owned by the single job task and awaits each
//! write), and swallow-with-log on store failure so a flaky status write
//! can never mask the job's real error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{MinutaError, Result};
use crate::types::{
    GlobalSpeakersDoc, JobRecord, JobStatus, MergedTranscript, SpeakerAnalysis, StatusUpdate,
};

/// Narrow interface over the metadata/progress document store.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Upsert the status fields of `audios/{user_id}/files/{audio_id}`.
    async fn update_status(
        &self,
        user_id: &str,
        audio_id: &str,
        update: &StatusUpdate,
    ) -> Result<()>;

    /// Read the full status document.
    async fn read(&self, user_id: &str, audio_id: &str) -> Result<Option<JobRecord>>;

    /// Attach final transcription and speaker analysis to the document.
    async fn save_result(
        &self,
        user_id: &str,
        audio_id: &str,
        transcription: &MergedTranscript,
        speaker_analysis: &SpeakerAnalysis,
    ) -> Result<()>;

    /// Persist the unified speaker document for one recording.
    async fn save_global_speakers(&self, audio_id: &str, doc: &GlobalSpeakersDoc) -> Result<()>;
}

/// In-memory progress store for tests and the CLI's local mode.
#[derive(Default)]
pub struct InMemoryProgressStore {
    records: RwLock<HashMap<String, JobRecord>>,
    speakers: RwLock<HashMap<String, GlobalSpeakersDoc>>,
    history: RwLock<Vec<StatusUpdate>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, audio_id: &str) -> String {
        format!("{user_id}/{audio_id}")
    }

    /// Every status write in issue order, for asserting publication
    /// contracts in tests.
    pub async fn history(&self) -> Vec<StatusUpdate> {
        self.history.read().await.clone()
    }

    pub async fn global_speakers(&self, audio_id: &str) -> Option<GlobalSpeakersDoc> {
        self.speakers.read().await.get(audio_id).cloned()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn update_status(
        &self,
        user_id: &str,
        audio_id: &str,
        update: &StatusUpdate,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .entry(Self::key(user_id, audio_id))
            .or_insert_with(|| JobRecord {
                status: JobStatus::Queued,
                processing_progress: 0,
                status_message: String::new(),
                processed_chunks: None,
                total_chunks: None,
                transcription: None,
                speaker_analysis: None,
                updated_at: Utc::now(),
            });
        record.status = update.status;
        record.processing_progress = update.progress;
        record.status_message = update.message.clone();
        if update.current_chunk.is_some() {
            record.processed_chunks = update.current_chunk;
        }
        if update.total_chunks.is_some() {
            record.total_chunks = update.total_chunks;
        }
        record.updated_at = Utc::now();

        self.history.write().await.push(update.clone());
        Ok(())
    }

    async fn read(&self, user_id: &str, audio_id: &str) -> Result<Option<JobRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(&Self::key(user_id, audio_id))
            .cloned())
    }

    async fn save_result(
        &self,
        user_id: &str,
        audio_id: &str,
        transcription: &MergedTranscript,
        speaker_analysis: &SpeakerAnalysis,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&Self::key(user_id, audio_id))
            .ok_or_else(|| MinutaError::not_found(format!("job record {user_id}/{audio_id}")))?;
        record.transcription = Some(transcription.clone());
        record.speaker_analysis = Some(speaker_analysis.clone());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn save_global_speakers(&self, audio_id: &str, doc: &GlobalSpeakersDoc) -> Result<()> {
        self.speakers
            .write()
            .await
            .insert(audio_id.to_string(), doc.clone());
        Ok(())
    }
}

/// JSON-file-backed progress store used by the CLI
/// (`<root>/<user_id>_<audio_id>.json`, `<root>/speakers_<audio_id>.json`).
pub struct JsonProgressStore {
    root: std::path::PathBuf,
}

impl JsonProgressStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, user_id: &str, audio_id: &str) -> std::path::PathBuf {
        self.root.join(format!("{user_id}_{audio_id}.json"))
    }

    fn speakers_path(&self, audio_id: &str) -> std::path::PathBuf {
        self.root.join(format!("speakers_{audio_id}.json"))
    }

    async fn load(&self, user_id: &str, audio_id: &str) -> Result<Option<JobRecord>> {
        match tokio::fs::read(self.record_path(user_id, audio_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MinutaError::transient(format!("job record read failed: {e}"))),
        }
    }

    async fn persist(&self, user_id: &str, audio_id: &str, record: &JobRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| MinutaError::Other(format!("job record encode failed: {e}")))?;
        tokio::fs::write(self.record_path(user_id, audio_id), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for JsonProgressStore {
    async fn update_status(
        &self,
        user_id: &str,
        audio_id: &str,
        update: &StatusUpdate,
    ) -> Result<()> {
        let mut record = self.load(user_id, audio_id).await?.unwrap_or(JobRecord {
            status: JobStatus::Queued,
            processing_progress: 0,
            status_message: String::new(),
            processed_chunks: None,
            total_chunks: None,
            transcription: None,
            speaker_analysis: None,
            updated_at: Utc::now(),
        });
        record.status = update.status;
        record.processing_progress = update.progress;
        record.status_message = update.message.clone();
        if update.current_chunk.is_some() {
            record.processed_chunks = update.current_chunk;
        }
        if update.total_chunks.is_some() {
            record.total_chunks = update.total_chunks;
        }
        record.updated_at = Utc::now();
        self.persist(user_id, audio_id, &record).await
    }

    async fn read(&self, user_id: &str, audio_id: &str) -> Result<Option<JobRecord>> {
        self.load(user_id, audio_id).await
    }

    async fn save_result(
        &self,
        user_id: &str,
        audio_id: &str,
        transcription: &MergedTranscript,
        speaker_analysis: &SpeakerAnalysis,
    ) -> Result<()> {
        let mut record = self
            .load(user_id, audio_id)
            .await?
            .ok_or_else(|| MinutaError::not_found(format!("job record {user_id}/{audio_id}")))?;
        record.transcription = Some(transcription.clone());
        record.speaker_analysis = Some(speaker_analysis.clone());
        record.updated_at = Utc::now();
        self.persist(user_id, audio_id, &record).await
    }

    async fn save_global_speakers(&self, audio_id: &str, doc: &GlobalSpeakersDoc) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| MinutaError::Other(format!("speakers doc encode failed: {e}")))?;
        tokio::fs::write(self.speakers_path(audio_id), bytes).await?;
        Ok(())
    }
}

/// Single-job progress publisher enforcing the publication contract.
pub struct ProgressReporter {
    store: Arc<dyn ProgressStore>,
    user_id: String,
    audio_id: String,
    last_progress: u8,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn ProgressStore>, user_id: &str, audio_id: &str) -> Self {
        Self {
            store,
            user_id: user_id.to_string(),
            audio_id: audio_id.to_string(),
            last_progress: 0,
        }
    }

    /// Publish a status update. Progress is clamped to be monotone
    /// non-decreasing; store failures are logged and swallowed.
    pub async fn publish(&mut self, mut update: StatusUpdate) {
        if update.progress < self.last_progress {
            update.progress = self.last_progress;
        }
        self.last_progress = update.progress;

        debug!(
            user_id = %self.user_id,
            audio_id = %self.audio_id,
            status = %update.status,
            progress = update.progress,
            "{}",
            update.message
        );

        if let Err(e) = self
            .store
            .update_status(&self.user_id, &self.audio_id, &update)
            .await
        {
            warn!(
                user_id = %self.user_id,
                audio_id = %self.audio_id,
                "progress write failed (ignored): {e}"
            );
        }
    }

    pub async fn publish_simple(&mut self, status: JobStatus, progress: u8, message: &str) {
        self.publish(StatusUpdate::new(status, progress, message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    #[async_trait]
    impl ProgressStore for FailingStore {
        async fn update_status(&self, _: &str, _: &str, _: &StatusUpdate) -> Result<()> {
            Err(MinutaError::transient("store down"))
        }
        async fn read(&self, _: &str, _: &str) -> Result<Option<JobRecord>> {
            Ok(None)
        }
        async fn save_result(
            &self,
            _: &str,
            _: &str,
            _: &MergedTranscript,
            _: &SpeakerAnalysis,
        ) -> Result<()> {
            Ok(())
        }
        async fn save_global_speakers(&self, _: &str, _: &GlobalSpeakersDoc) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn progress_is_monotone() {
        let store = Arc::new(InMemoryProgressStore::new());
        let mut reporter = ProgressReporter::new(store.clone(), "u1", "a1");

        reporter
            .publish_simple(JobStatus::Preprocessing, 20, "preprocessing")
            .await;
        // A stale lower value is clamped up, never published as a regression.
        reporter
            .publish_simple(JobStatus::SpeakerAnalysis, 10, "diarizing")
            .await;
        reporter
            .publish_simple(JobStatus::Transcribing, 60, "transcribing")
            .await;

        let history = store.history().await;
        assert_eq!(history.len(), 3);
        for pair in history.windows(2) {
            assert!(pair[1].progress >= pair[0].progress);
        }
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let mut reporter = ProgressReporter::new(Arc::new(FailingStore), "u1", "a1");
        // Must not panic or propagate.
        reporter
            .publish_simple(JobStatus::Preprocessing, 5, "starting")
            .await;
    }

    #[tokio::test]
    async fn json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProgressStore::new(dir.path());
        assert!(store.read("u1", "a1").await.unwrap().is_none());

        store
            .update_status(
                "u1",
                "a1",
                &StatusUpdate::new(JobStatus::Transcribing, 70, "working").with_chunks(3, 4),
            )
            .await
            .unwrap();

        let record = store.read("u1", "a1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Transcribing);
        assert_eq!(record.processing_progress, 70);
        assert_eq!(record.processed_chunks, Some(3));
    }

    #[tokio::test]
    async fn chunk_counters_persist() {
        let store = Arc::new(InMemoryProgressStore::new());
        let mut reporter = ProgressReporter::new(store.clone(), "u1", "a1");
        reporter
            .publish(
                StatusUpdate::new(JobStatus::ChunkProcessing, 50, "chunk 2/4").with_chunks(2, 4),
            )
            .await;

        let record = store.read("u1", "a1").await.unwrap().unwrap();
        assert_eq!(record.processed_chunks, Some(2));
        assert_eq!(record.total_chunks, Some(4));
    }
}
