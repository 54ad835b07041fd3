//! Speech recognition provider adapters.
//!
//! All providers implement [`SpeechBackend`]: transcribe a whole file, or a
//! time-bounded segment of one. The default segment path slices the source
//! to a temporary WAV and delegates to `transcribe`, deleting the clip on
//! every exit path.
//!
//! Adapters normalize provider peculiarities away so the rest of the
//! pipeline sees one shape: confidences on `[0, 1]`, timestamps in float
//! seconds, BCP-47 language tags, and no provider-side speaker labels
//! (identity assignment is the unifier's job).

mod assemblyai;
mod azure;
mod clip;
mod deepgram;
pub mod error;
mod google;
mod openai;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ApiConfig, SpeechProvider};
use crate::types::WordTimestamp;

pub use assemblyai::AssemblyAiBackend;
pub use azure::AzureBackend;
pub use clip::slice_to_temp_wav;
pub use deepgram::DeepgramBackend;
pub use error::ProviderError;
pub use google::GoogleBackend;
pub use openai::OpenAiBackend;

/// Timed span of recognized text within one provider response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TextSpan {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f32,
}

/// Normalized transcription result, identical across providers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
    pub segments: Vec<TextSpan>,
    pub language: String,
    pub processing_time_sec: f64,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub word_timestamps: Vec<WordTimestamp>,
}

/// Uniform contract over the speech APIs.
#[async_trait]
pub trait SpeechBackend: Send + Sync + std::fmt::Debug {
    /// Provider identifier, e.g. `"deepgram"`.
    fn name(&self) -> &'static str;

    /// Transcribe a whole audio file.
    async fn transcribe(&self, path: &Path) -> Result<Transcription, ProviderError>;

    /// Transcribe a time-bounded segment of `path`.
    ///
    /// Default implementation: slice to a temporary WAV, delegate to
    /// [`SpeechBackend::transcribe`]. The clip is removed whether the call
    /// succeeds, fails or the future is dropped.
    async fn transcribe_segment(
        &self,
        path: &Path,
        start_sec: f64,
        end_sec: f64,
    ) -> Result<Transcription, ProviderError> {
        let source = path.to_path_buf();
        let temp_clip =
            tokio::task::spawn_blocking(move || slice_to_temp_wav(&source, start_sec, end_sec))
                .await
                .map_err(|e| ProviderError::Other(format!("segment slicing task failed: {e}")))??;
        self.transcribe(temp_clip.path()).await
    }
}

/// Build the backend for an API configuration.
///
/// Fails with `MissingApiKey` before any network traffic when the key is
/// absent.
pub fn create_backend(config: &ApiConfig) -> Result<Arc<dyn SpeechBackend>, ProviderError> {
    if config.api_key.trim().is_empty() {
        return Err(ProviderError::missing_api_key(config.provider));
    }
    Ok(match config.provider {
        SpeechProvider::OpenAi => Arc::new(OpenAiBackend::new(config)),
        SpeechProvider::Azure => Arc::new(AzureBackend::new(config)),
        SpeechProvider::Google => Arc::new(GoogleBackend::new(config)),
        SpeechProvider::AssemblyAi => Arc::new(AssemblyAiBackend::new(config)),
        SpeechProvider::Deepgram => Arc::new(DeepgramBackend::new(config)),
    })
}

/// Seam between the dispatcher and concrete backends, so tests can inject
/// scripted providers.
pub trait BackendFactory: Send + Sync {
    fn create(&self, config: &ApiConfig) -> Result<Arc<dyn SpeechBackend>, ProviderError>;
}

/// Default factory over the real cloud bindings.
#[derive(Debug, Default)]
pub struct CloudBackendFactory;

impl BackendFactory for CloudBackendFactory {
    fn create(&self, config: &ApiConfig) -> Result<Arc<dyn SpeechBackend>, ProviderError> {
        create_backend(config)
    }
}

/// Pass through a successful response, or classify the failure status.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(ProviderError::from_status(provider, status.as_u16(), body))
}
