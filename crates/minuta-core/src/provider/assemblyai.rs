//! AssemblyAI transcription backend.
//!
//! Two-step flow: upload the audio, create a transcript job, then poll
//! until it completes. Timestamps arrive in milliseconds and are
//! normalized to float seconds.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ProviderError, SpeechBackend, TextSpan, Transcription, check_status};
use crate::config::ApiConfig;
use crate::http::get_http_client;
use crate::types::WordTimestamp;

const UPLOAD_URL: &str = "https://api.assemblyai.com/v2/upload";
const TRANSCRIPT_URL: &str = "https://api.assemblyai.com/v2/transcript";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 150;

#[derive(Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Deserialize)]
struct TranscriptResponse {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    words: Vec<Word>,
    #[serde(default)]
    utterances: Option<Vec<Utterance>>,
}

#[derive(Deserialize)]
struct Word {
    text: String,
    start: u64,
    end: u64,
    #[serde(default)]
    confidence: f32,
}

#[derive(Deserialize)]
struct Utterance {
    start: u64,
    end: u64,
    text: String,
    #[serde(default)]
    confidence: f32,
}

fn ms_to_sec(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

#[derive(Debug)]
pub struct AssemblyAiBackend {
    api_key: String,
    model: String,
    language: String,
}

impl AssemblyAiBackend {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model_name().to_string(),
            language: config.language_primary().to_string(),
        }
    }

    async fn upload(&self, audio: Vec<u8>) -> Result<String, ProviderError> {
        let client = get_http_client().map_err(|e| ProviderError::Other(e.to_string()))?;
        let response = client
            .post(UPLOAD_URL)
            .header("Authorization", &self.api_key)
            .body(audio)
            .send()
            .await?;
        let response = check_status(self.name(), response).await?;
        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(self.name(), e))?;
        Ok(parsed.upload_url)
    }

    async fn poll_until_done(&self, id: &str) -> Result<TranscriptResponse, ProviderError> {
        let client = get_http_client().map_err(|e| ProviderError::Other(e.to_string()))?;
        for _ in 0..MAX_POLLS {
            let response = client
                .get(format!("{TRANSCRIPT_URL}/{id}"))
                .header("Authorization", &self.api_key)
                .send()
                .await?;
            let response = check_status(self.name(), response).await?;
            let parsed: TranscriptResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::invalid_response(self.name(), e))?;

            match parsed.status.as_str() {
                "completed" => return Ok(parsed),
                "error" => {
                    return Err(ProviderError::TranscriptionFailed(
                        parsed
                            .error
                            .unwrap_or_else(|| "AssemblyAI reported an error".to_string()),
                    ))
                }
                status => {
                    debug!(id, status, "waiting for AssemblyAI transcript");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
        Err(ProviderError::TranscriptionFailed(format!(
            "AssemblyAI transcript {id} did not complete in time"
        )))
    }
}

#[async_trait]
impl SpeechBackend for AssemblyAiBackend {
    fn name(&self) -> &'static str {
        "assemblyai"
    }

    async fn transcribe(&self, path: &Path) -> Result<Transcription, ProviderError> {
        let started = Instant::now();
        let audio = tokio::fs::read(path).await?;
        let upload_url = self.upload(audio).await?;

        let client = get_http_client().map_err(|e| ProviderError::Other(e.to_string()))?;
        let body = json!({
            "audio_url": upload_url,
            "language_code": self.language,
            "punctuate": true,
            "format_text": true,
        });
        let response = client
            .post(TRANSCRIPT_URL)
            .header("Authorization", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status(self.name(), response).await?;
        let created: TranscriptResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(self.name(), e))?;

        let done = self.poll_until_done(&created.id).await?;

        let segments = done
            .utterances
            .unwrap_or_default()
            .into_iter()
            .map(|u| TextSpan {
                start: ms_to_sec(u.start),
                end: ms_to_sec(u.end),
                text: u.text,
                confidence: u.confidence.clamp(0.0, 1.0),
            })
            .collect();

        let word_timestamps = done
            .words
            .into_iter()
            .map(|w| WordTimestamp {
                word: w.text,
                start: ms_to_sec(w.start),
                end: ms_to_sec(w.end),
                confidence: w.confidence.clamp(0.0, 1.0),
            })
            .collect();

        Ok(Transcription {
            text: done.text.unwrap_or_default(),
            confidence: done.confidence.unwrap_or(0.8).clamp(0.0, 1.0),
            segments,
            language: self.language.clone(),
            processing_time_sec: started.elapsed().as_secs_f64(),
            provider: self.name().to_string(),
            model: self.model.clone(),
            word_timestamps,
        })
    }
}
