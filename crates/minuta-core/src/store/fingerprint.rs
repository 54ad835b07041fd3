//! Persistent per-user voice fingerprints.
//!
//! The store trait is raw document get/put; [`FingerprintService`] owns the
//! update semantics: a quality-weighted running average renormalized to unit
//! length, with writes serialized per `user_id` through a keyed lock so
//! concurrent jobs for the same user cannot interleave read-modify-write.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::diarization::embedding::normalize;
use crate::error::{MinutaError, Result};
use crate::types::VoiceFingerprint;

/// Presence flag and counters for one user's fingerprint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FingerprintStats {
    pub has_fingerprint: bool,
    pub audio_count: u32,
    pub quality_score: f32,
}

/// Raw fingerprint document storage (external collaborator).
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<VoiceFingerprint>>;
    async fn put(&self, user_id: &str, fingerprint: &VoiceFingerprint) -> Result<()>;
}

/// In-memory store for tests and local runs.
#[derive(Default)]
pub struct InMemoryFingerprintStore {
    entries: RwLock<HashMap<String, VoiceFingerprint>>,
}

impl InMemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FingerprintStore for InMemoryFingerprintStore {
    async fn get(&self, user_id: &str) -> Result<Option<VoiceFingerprint>> {
        Ok(self.entries.read().await.get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, fingerprint: &VoiceFingerprint) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(user_id.to_string(), fingerprint.clone());
        Ok(())
    }
}

/// JSON-file-backed store used by the CLI (`<root>/<user_id>.json`).
pub struct JsonFingerprintStore {
    root: PathBuf,
}

impl JsonFingerprintStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("{user_id}.json"))
    }
}

#[async_trait]
impl FingerprintStore for JsonFingerprintStore {
    async fn get(&self, user_id: &str) -> Result<Option<VoiceFingerprint>> {
        match tokio::fs::read(self.path_for(user_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MinutaError::transient(format!(
                "fingerprint read failed: {e}"
            ))),
        }
    }

    async fn put(&self, user_id: &str, fingerprint: &VoiceFingerprint) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let bytes = serde_json::to_vec_pretty(fingerprint)
            .map_err(|e| MinutaError::Other(format!("fingerprint encode failed: {e}")))?;
        tokio::fs::write(self.path_for(user_id), bytes).await?;
        Ok(())
    }
}

/// Fingerprint update semantics over any [`FingerprintStore`].
pub struct FingerprintService {
    store: Arc<dyn FingerprintStore>,
    // One lock per user_id; single-writer per user across the process.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FingerprintService {
    pub fn new(store: Arc<dyn FingerprintStore>) -> Self {
        Self {
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .lock()
            .await
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read the committed fingerprint, if any.
    pub async fn get(&self, user_id: &str) -> Result<Option<VoiceFingerprint>> {
        self.store.get(user_id).await
    }

    /// Merge a new embedding into the user's fingerprint.
    ///
    /// First observation stores `(embedding, quality, count 1)`. Afterwards
    /// the representative is the weighted average with `w_old = q_old·n_old`
    /// and `w_new = q_new`, renormalized to unit length; the count
    /// increments and the quality becomes the mean of old and new.
    pub async fn update(
        &self,
        user_id: &str,
        new_embedding: &[f32],
        new_quality: f32,
    ) -> Result<VoiceFingerprint> {
        if new_embedding.is_empty() {
            return Err(MinutaError::invalid_input("empty voice embedding"));
        }

        let lock = self.lock_for(user_id).await;
        let _guard = lock.lock().await;

        let merged = match self.store.get(user_id).await? {
            None => {
                let mut embedding = new_embedding.to_vec();
                normalize(&mut embedding);
                VoiceFingerprint {
                    embedding,
                    quality_score: new_quality,
                    audio_count: 1,
                    last_updated: Utc::now(),
                }
            }
            Some(existing) => {
                if existing.embedding.len() != new_embedding.len() {
                    return Err(MinutaError::invalid_input(format!(
                        "embedding dimension mismatch: stored {}, new {}",
                        existing.embedding.len(),
                        new_embedding.len()
                    )));
                }
                let w_old = existing.quality_score as f64 * existing.audio_count as f64;
                let w_new = new_quality as f64;
                let total = w_old + w_new;

                let mut embedding: Vec<f32> = existing
                    .embedding
                    .iter()
                    .zip(new_embedding.iter())
                    .map(|(&old, &new)| {
                        ((w_old * old as f64 + w_new * new as f64) / total) as f32
                    })
                    .collect();
                normalize(&mut embedding);

                VoiceFingerprint {
                    embedding,
                    quality_score: (existing.quality_score + new_quality) / 2.0,
                    audio_count: existing.audio_count + 1,
                    last_updated: Utc::now(),
                }
            }
        };

        self.store.put(user_id, &merged).await?;
        Ok(merged)
    }

    pub async fn stats(&self, user_id: &str) -> Result<FingerprintStats> {
        Ok(match self.store.get(user_id).await? {
            Some(fp) => FingerprintStats {
                has_fingerprint: true,
                audio_count: fp.audio_count,
                quality_score: fp.quality_score,
            },
            None => FingerprintStats {
                has_fingerprint: false,
                audio_count: 0,
                quality_score: 0.0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diarization::embedding::cosine_similarity;

    fn service() -> FingerprintService {
        FingerprintService::new(Arc::new(InMemoryFingerprintStore::new()))
    }

    #[tokio::test]
    async fn first_update_stores_normalized() {
        let svc = service();
        let fp = svc.update("u1", &[3.0, 4.0], 0.9).await.unwrap();
        assert_eq!(fp.audio_count, 1);
        assert_eq!(fp.quality_score, 0.9);
        let norm: f32 = fp.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn replay_converges_to_same_representative() {
        // update(u, e, q) twice must land on the same unit vector as a
        // single update with count 2, within 1e-6.
        let svc = service();
        let e = vec![0.6f32, 0.8, 0.0];
        svc.update("u1", &e, 0.8).await.unwrap();
        let fp = svc.update("u1", &e, 0.8).await.unwrap();

        assert_eq!(fp.audio_count, 2);
        let mut expected = e.clone();
        normalize(&mut expected);
        for (got, want) in fp.embedding.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn higher_quality_pulls_harder() {
        let svc = service();
        svc.update("u1", &[1.0, 0.0], 0.2).await.unwrap();
        let fp = svc.update("u1", &[0.0, 1.0], 0.9).await.unwrap();
        // The new, higher-quality embedding dominates the average.
        assert!(cosine_similarity(&fp.embedding, &[0.0, 1.0])
            > cosine_similarity(&fp.embedding, &[1.0, 0.0]));
        assert!((fp.quality_score - 0.55).abs() < 1e-6);
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let svc = service();
        svc.update("u1", &[1.0, 0.0], 0.8).await.unwrap();
        let err = svc.update("u1", &[1.0, 0.0, 0.0], 0.8).await.unwrap_err();
        assert!(matches!(err, MinutaError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn stats_reflect_presence() {
        let svc = service();
        assert!(!svc.stats("u1").await.unwrap().has_fingerprint);
        svc.update("u1", &[1.0, 0.0], 0.7).await.unwrap();
        let stats = svc.stats("u1").await.unwrap();
        assert!(stats.has_fingerprint);
        assert_eq!(stats.audio_count, 1);
    }

    #[tokio::test]
    async fn json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFingerprintStore::new(dir.path());
        assert!(store.get("u1").await.unwrap().is_none());

        let fp = VoiceFingerprint {
            embedding: vec![0.0, 1.0],
            quality_score: 0.8,
            audio_count: 3,
            last_updated: Utc::now(),
        };
        store.put("u1", &fp).await.unwrap();
        let loaded = store.get("u1").await.unwrap().unwrap();
        assert_eq!(loaded.audio_count, 3);
        assert_eq!(loaded.embedding, fp.embedding);
    }
}
