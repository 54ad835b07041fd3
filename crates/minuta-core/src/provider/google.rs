//! Google Cloud Speech-to-Text backend.
//!
//! Uses the synchronous `speech:recognize` REST endpoint with inline
//! base64 content. Word offsets come back as duration strings like
//! `"1.500s"`; the adapter parses them to float seconds.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use super::{ProviderError, SpeechBackend, TextSpan, Transcription, check_status};
use crate::config::ApiConfig;
use crate::http::get_http_client;
use crate::types::WordTimestamp;

const API_URL: &str = "https://speech.googleapis.com/v1/speech:recognize";

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    results: Vec<RecognizeResult>,
}

#[derive(Deserialize)]
struct RecognizeResult {
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Word {
    word: String,
    #[serde(default)]
    start_time: String,
    #[serde(default)]
    end_time: String,
    #[serde(default)]
    confidence: f32,
}

/// `"1.500s"` -> `1.5`.
fn parse_duration(raw: &str) -> f64 {
    raw.trim_end_matches('s').parse().unwrap_or(0.0)
}

#[derive(Debug)]
pub struct GoogleBackend {
    api_key: String,
    model: String,
    language: String,
}

impl GoogleBackend {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model_name().to_string(),
            language: config.language.clone(),
        }
    }
}

#[async_trait]
impl SpeechBackend for GoogleBackend {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn transcribe(&self, path: &Path) -> Result<Transcription, ProviderError> {
        let started = Instant::now();
        let audio = tokio::fs::read(path).await?;
        let client = get_http_client().map_err(|e| ProviderError::Other(e.to_string()))?;

        let body = json!({
            "config": {
                "encoding": "LINEAR16",
                "sampleRateHertz": 16000,
                "languageCode": self.language,
                "enableWordTimeOffsets": true,
                "enableWordConfidence": true,
                "enableAutomaticPunctuation": true,
                "model": self.model,
            },
            "audio": {
                "content": base64::engine::general_purpose::STANDARD.encode(&audio),
            },
        });

        let response = client
            .post(format!("{API_URL}?key={}", self.api_key))
            .json(&body)
            .send()
            .await?;
        let response = check_status(self.name(), response).await?;
        let parsed: Response = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(self.name(), e))?;

        let mut text_parts = Vec::new();
        let mut segments = Vec::new();
        let mut word_timestamps = Vec::new();
        let mut confidence = 0.8f32;

        for (i, result) in parsed.results.iter().enumerate() {
            let Some(alternative) = result.alternatives.first() else {
                continue;
            };
            if i == 0 {
                confidence = alternative.confidence.clamp(0.0, 1.0);
            }
            text_parts.push(alternative.transcript.clone());

            // Google gives word-level timing only; span each result by its
            // first and last word.
            let start = alternative
                .words
                .first()
                .map(|w| parse_duration(&w.start_time))
                .unwrap_or(0.0);
            let end = alternative
                .words
                .last()
                .map(|w| parse_duration(&w.end_time))
                .unwrap_or(start);
            segments.push(TextSpan {
                start,
                end,
                text: alternative.transcript.clone(),
                confidence: alternative.confidence.clamp(0.0, 1.0),
            });

            for w in &alternative.words {
                word_timestamps.push(WordTimestamp {
                    word: w.word.clone(),
                    start: parse_duration(&w.start_time),
                    end: parse_duration(&w.end_time),
                    confidence: w.confidence.clamp(0.0, 1.0),
                });
            }
        }

        Ok(Transcription {
            text: text_parts.join(" "),
            confidence,
            segments,
            language: self.language.clone(),
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
    fn duration_string_parsing() {
        assert_eq!(parse_duration("1.500s"), 1.5);
        assert_eq!(parse_duration("0s"), 0.0);
        assert_eq!(parse_duration(""), 0.0);
    }

    #[test]
    fn parses_recognize_response() {
        let raw = r#"{
            "results": [{
                "alternatives": [{
                    "transcript": "ohayou gozaimasu",
                    "confidence": 0.91,
                    "words": [
                        {"word": "ohayou", "startTime": "0.200s", "endTime": "0.800s", "confidence": 0.92},
                        {"word": "gozaimasu", "startTime": "0.900s", "endTime": "1.600s", "confidence": 0.90}
                    ]
                }]
            }]
        }"#;
        let parsed: Response = serde_json::from_str(raw).unwrap();
        let alt = &parsed.results[0].alternatives[0];
        assert_eq!(alt.words.len(), 2);
        assert_eq!(parse_duration(&alt.words[1].end_time), 1.6);
    }

    #[test]
    fn empty_results_tolerated() {
        let parsed: Response = serde_json::from_str("{}").unwrap();
        assert!(parsed.results.is_empty());
    }
}
