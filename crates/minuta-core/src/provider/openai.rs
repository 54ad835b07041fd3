//! OpenAI Whisper transcription backend.
//!
//! Uses the audio transcriptions endpoint with `verbose_json` so segment
//! and word timestamps come back in one call. Whisper reports
//! `avg_logprob` per segment; shifting by +1 and clamping maps it onto the
//! `[0, 1]` confidence scale the pipeline expects.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProviderError, SpeechBackend, TextSpan, Transcription, check_status};
use crate::config::ApiConfig;
use crate::http::get_http_client;
use crate::types::WordTimestamp;

const API_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

#[derive(Deserialize)]
struct Response {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<ResponseSegment>,
    #[serde(default)]
    words: Vec<ResponseWord>,
}

#[derive(Deserialize)]
struct ResponseSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    avg_logprob: f32,
}

#[derive(Deserialize)]
struct ResponseWord {
    word: String,
    start: f64,
    end: f64,
    #[serde(default = "default_word_probability")]
    probability: f32,
}

fn default_word_probability() -> f32 {
    0.9
}

#[derive(Debug)]
pub struct OpenAiBackend {
    api_key: String,
    model: String,
    language: String,
}

impl OpenAiBackend {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model_name().to_string(),
            language: config.language_primary().to_string(),
        }
    }
}

#[async_trait]
impl SpeechBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn transcribe(&self, path: &Path) -> Result<Transcription, ProviderError> {
        let started = Instant::now();
        let audio = tokio::fs::read(path).await?;
        let client = get_http_client().map_err(|e| ProviderError::Other(e.to_string()))?;

        let file_part = reqwest::multipart::Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ProviderError::Other(format!("invalid mime type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word")
            .text("timestamp_granularities[]", "segment");

        let response = client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let response = check_status(self.name(), response).await?;
        let parsed: Response = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(self.name(), e))?;

        let segments = parsed
            .segments
            .into_iter()
            .map(|s| TextSpan {
                start: s.start,
                end: s.end,
                text: s.text.trim().to_string(),
                confidence: (s.avg_logprob + 1.0).clamp(0.0, 1.0),
            })
            .collect();

        let word_timestamps = parsed
            .words
            .into_iter()
            .map(|w| WordTimestamp {
                word: w.word,
                start: w.start,
                end: w.end,
                confidence: w.probability.clamp(0.0, 1.0),
            })
            .collect();

        Ok(Transcription {
            text: parsed.text,
            confidence: 0.9,
            segments,
            language: parsed.language.unwrap_or_else(|| self.language.clone()),
            processing_time_sec: started.elapsed().as_secs_f64(),
            provider: self.name().to_string(),
            model: self.model.clone(),
            word_timestamps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verbose_json() {
        let raw = r#"{
            "text": "hello there",
            "language": "en",
            "segments": [
                {"id": 0, "start": 0.0, "end": 1.2, "text": " hello", "avg_logprob": -0.25},
                {"id": 1, "start": 1.2, "end": 2.0, "text": " there", "avg_logprob": -1.8}
            ],
            "words": [
                {"word": "hello", "start": 0.0, "end": 1.1, "probability": 0.98}
            ]
        }"#;
        let parsed: Response = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.segments.len(), 2);
        // Logprob normalization clamps into [0, 1].
        assert!(((parsed.segments[0].avg_logprob + 1.0).clamp(0.0, 1.0) - 0.75).abs() < 1e-6);
        assert_eq!((parsed.segments[1].avg_logprob + 1.0).clamp(0.0, 1.0), 0.0);
        assert_eq!(parsed.words[0].word, "hello");
    }
}
