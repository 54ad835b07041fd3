//! Source-audio retrieval.
//!
//! The blob store itself is an external collaborator behind an opaque
//! `fetch`; this module adds error classification and the retry policy the
//! orchestrator relies on. `FsBlobStore` mirrors the bucket layout
//! `users/{user_id}/audios/{audio_id}` on a local root for the CLI and
//! tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::error::{MinutaError, Result};
use crate::retry::{RetryConfig, with_backoff};

/// Opaque blob storage: `(user_id, audio_id) -> bytes`.
///
/// Implementations classify failures as `NotFound` (absent blob, never
/// retried) or `Transient` (network, retried by the caller).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch(&self, user_id: &str, audio_id: &str) -> Result<Vec<u8>>;
}

/// Local-filesystem blob store using the bucket key layout.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, user_id: &str, audio_id: &str) -> PathBuf {
        self.root
            .join("users")
            .join(user_id)
            .join("audios")
            .join(audio_id)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn fetch(&self, user_id: &str, audio_id: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(user_id, audio_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(MinutaError::not_found(
                format!("audio blob users/{user_id}/audios/{audio_id}"),
            )),
            Err(e) => Err(MinutaError::transient(format!(
                "blob read failed for {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Fetch a source recording into the job's scratch directory, retrying
/// transient failures with exponential backoff.
pub async fn fetch_to_scratch(
    store: &dyn BlobStore,
    user_id: &str,
    audio_id: &str,
    scratch_dir: &Path,
) -> Result<PathBuf> {
    let retry = RetryConfig::default();
    let bytes = with_backoff("blob fetch", &retry, || store.fetch(user_id, audio_id)).await?;

    let local_path = scratch_dir.join("source.wav");
    tokio::fs::write(&local_path, &bytes).await?;
    info!(
        user_id,
        audio_id,
        bytes = bytes.len(),
        path = %local_path.display(),
        "downloaded source audio"
    );
    Ok(local_path)
}
