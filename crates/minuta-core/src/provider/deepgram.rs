//! Deepgram transcription backend.
//!
//! Deepgram uses a different API shape than the OpenAI-style providers:
//! raw audio bytes in the request body, options as query parameters, and a
//! channel/alternative response structure.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProviderError, SpeechBackend, TextSpan, Transcription, check_status};
use crate::config::ApiConfig;
use crate::http::get_http_client;
use crate::types::WordTimestamp;

const API_URL: &str = "https://api.deepgram.com/v1/listen";

#[derive(Deserialize)]
struct Response {
    results: Results,
}

#[derive(Deserialize)]
struct Results {
    channels: Vec<Channel>,
    #[serde(default)]
    utterances: Vec<Utterance>,
}

#[derive(Deserialize)]
struct Channel {
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Deserialize)]
struct Word {
    word: String,
    start: f64,
    end: f64,
    #[serde(default)]
    confidence: f32,
}

#[derive(Deserialize)]
struct Utterance {
    start: f64,
    end: f64,
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug)]
pub struct DeepgramBackend {
    api_key: String,
    model: String,
    language: String,
}

impl DeepgramBackend {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model_name().to_string(),
            language: config.language_primary().to_string(),
        }
    }
}

#[async_trait]
impl SpeechBackend for DeepgramBackend {
    fn name(&self) -> &'static str {
        "deepgram"
    }

    async fn transcribe(&self, path: &Path) -> Result<Transcription, ProviderError> {
        let started = Instant::now();
        let audio = tokio::fs::read(path).await?;
        let client = get_http_client().map_err(|e| ProviderError::Other(e.to_string()))?;

        let mut url = reqwest::Url::parse(API_URL)
            .map_err(|e| ProviderError::Other(format!("bad Deepgram URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("language", &self.language)
            .append_pair("smart_format", "true")
            .append_pair("punctuate", "true")
            .append_pair("utterances", "true");

        let response = client
            .post(url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await?;
        let response = check_status(self.name(), response).await?;
        let parsed: Response = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(self.name(), e))?;

        let alternative = parsed
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .ok_or_else(|| ProviderError::invalid_response(self.name(), "no transcript found"))?;

        let segments = parsed
            .results
            .utterances
            .iter()
            .map(|u| TextSpan {
                start: u.start,
                end: u.end,
                text: u.transcript.clone(),
                confidence: u.confidence.clamp(0.0, 1.0),
            })
            .collect();

        let word_timestamps = alternative
            .words
            .iter()
            .map(|w| WordTimestamp {
                word: w.word.clone(),
                start: w.start,
                end: w.end,
                confidence: w.confidence.clamp(0.0, 1.0),
            })
            .collect();

        Ok(Transcription {
            text: alternative.transcript.clone(),
            confidence: alternative.confidence.clamp(0.0, 1.0),
            segments,
            language: self.language.clone(),
            processing_time_sec: started.elapsed().as_secs_f64(),
            provider: self.name().to_string(),
            model: self.model.clone(),
            word_timestamps,
        })
    }
}
