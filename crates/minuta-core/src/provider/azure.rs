//! Azure Speech-to-Text backend.
//!
//! Uses the short-audio REST endpoint with `format=detailed`. Azure
//! reports offsets and durations in 100-nanosecond ticks; the adapter
//! converts them to float seconds.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProviderError, SpeechBackend, TextSpan, Transcription, check_status};
use crate::config::ApiConfig;
use crate::http::get_http_client;
use crate::types::WordTimestamp;

const DEFAULT_REGION: &str = "japaneast";
const TICKS_PER_SEC: f64 = 10_000_000.0;

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Response {
    recognition_status: String,
    #[serde(default)]
    display_text: Option<String>,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    duration: u64,
    #[serde(default, rename = "NBest")]
    n_best: Vec<NBest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NBest {
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    display: String,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Word {
    word: String,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug)]
pub struct AzureBackend {
    api_key: String,
    region: String,
    language: String,
}

impl AzureBackend {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            region: config
                .setting_str("region")
                .unwrap_or(DEFAULT_REGION)
                .to_string(),
            language: config.language.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1",
            self.region
        )
    }
}

#[async_trait]
impl SpeechBackend for AzureBackend {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn transcribe(&self, path: &Path) -> Result<Transcription, ProviderError> {
        let started = Instant::now();
        let audio = tokio::fs::read(path).await?;
        let client = get_http_client().map_err(|e| ProviderError::Other(e.to_string()))?;

        let mut url = reqwest::Url::parse(&self.endpoint())
            .map_err(|e| ProviderError::Other(format!("bad Azure URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("language", &self.language)
            .append_pair("format", "detailed");

        let response = client
            .post(url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "audio/wav; codecs=audio/pcm; samplerate=16000")
            .body(audio)
            .send()
            .await?;
        let response = check_status(self.name(), response).await?;
        let parsed: Response = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(self.name(), e))?;

        if parsed.recognition_status != "Success" {
            return Err(ProviderError::TranscriptionFailed(format!(
                "Azure recognition status: {}",
                parsed.recognition_status
            )));
        }

        let best = parsed.n_best.first();
        let text = best
            .map(|b| b.display.clone())
            .filter(|t| !t.is_empty())
            .or(parsed.display_text.clone())
            .unwrap_or_default();
        let confidence = best.map(|b| b.confidence).unwrap_or(0.85).clamp(0.0, 1.0);

        let start = parsed.offset as f64 / TICKS_PER_SEC;
        let end = start + parsed.duration as f64 / TICKS_PER_SEC;
        let segments = vec![TextSpan {
            start,
            end,
            text: text.clone(),
            confidence,
        }];

        let word_timestamps = best
            .map(|b| {
                b.words
                    .iter()
                    .map(|w| WordTimestamp {
                        word: w.word.clone(),
                        start: w.offset as f64 / TICKS_PER_SEC,
                        end: (w.offset + w.duration) as f64 / TICKS_PER_SEC,
                        confidence: w.confidence.clamp(0.0, 1.0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Transcription {
            text,
            confidence,
            segments,
            language: self.language.clone(),
            processing_time_sec: started.elapsed().as_secs_f64(),
            provider: self.name().to_string(),
            model: "azure-speech".to_string(),
            word_timestamps,
        })
    }
}
