//! Job configuration and provider selection.
//!
//! `JobConfig` is parsed strictly: unknown keys are rejected so a typo in a
//! client request fails loudly instead of silently running with defaults.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MinutaError;

/// Default BCP-47 language tag passed to providers.
pub const DEFAULT_LANGUAGE: &str = "ja-JP";

/// Speech recognition provider bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechProvider {
    OpenAi,
    Azure,
    Google,
    AssemblyAi,
    Deepgram,
}

impl SpeechProvider {
    pub const ALL: [SpeechProvider; 5] = [
        Self::OpenAi,
        Self::Azure,
        Self::Google,
        Self::AssemblyAi,
        Self::Deepgram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Google => "google",
            Self::AssemblyAi => "assemblyai",
            Self::Deepgram => "deepgram",
        }
    }

    /// Provider-default model identifier.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "whisper-1",
            Self::Azure => "azure-speech",
            Self::Google => "latest_long",
            Self::AssemblyAi => "best",
            Self::Deepgram => "nova-2",
        }
    }

    /// Rough per-minute USD cost, used for advisory estimates only.
    pub fn cost_per_minute(&self) -> f64 {
        match self {
            Self::OpenAi => 0.006,
            Self::Azure => 0.02,
            Self::Google => 0.024,
            Self::AssemblyAi => 0.0065,
            Self::Deepgram => 0.0043,
        }
    }
}

impl FromStr for SpeechProvider {
    type Err = MinutaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "azure" => Ok(Self::Azure),
            "google" => Ok(Self::Google),
            "assemblyai" => Ok(Self::AssemblyAi),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(MinutaError::invalid_input(format!(
                "unknown speech provider: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for SpeechProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either a fixed provider or `auto`, resolved by the dispatcher heuristic
/// from audio characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSelection {
    Auto,
    Fixed(SpeechProvider),
}

impl ProviderSelection {
    fn parse(s: &str) -> Result<Self, MinutaError> {
        if s == "auto" {
            Ok(Self::Auto)
        } else {
            Ok(Self::Fixed(s.parse()?))
        }
    }
}

/// Recognized per-job options. Unknown keys are rejected at parse time.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Chunking activates above this duration.
    pub chunk_threshold_sec: f64,
    pub chunk_window_sec: f64,
    pub overlap_sec: f64,
    pub max_speakers: usize,
    pub language: String,
    pub speech_provider: ProviderSelection,
    pub speech_model: Option<String>,
    /// Cosine threshold for naming a cluster `"self"`.
    pub user_match_threshold: f32,
    /// Overlap-to-min-duration ratio above which duplicates are dropped.
    pub overlap_dedupe_threshold: f64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chunk_threshold_sec: 1800.0,
            chunk_window_sec: 1800.0,
            overlap_sec: 300.0,
            max_speakers: 5,
            language: DEFAULT_LANGUAGE.to_string(),
            speech_provider: ProviderSelection::Fixed(SpeechProvider::OpenAi),
            speech_model: None,
            user_match_threshold: 0.80,
            overlap_dedupe_threshold: 0.80,
        }
    }
}

impl JobConfig {
    /// Parse from a JSON object, rejecting unknown keys and out-of-range
    /// values with `InvalidInput`.
    pub fn from_value(value: &Value) -> Result<Self, MinutaError> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            _ => {
                return Err(MinutaError::invalid_input(
                    "job config must be a JSON object",
                ))
            }
        };

        let mut cfg = Self::default();
        for (key, val) in map {
            match key.as_str() {
                "chunk_threshold_sec" => {
                    cfg.chunk_threshold_sec = positive_number(key, val)?;
                }
                "chunk_window_sec" => {
                    cfg.chunk_window_sec = positive_number(key, val)?;
                }
                "overlap_sec" => {
                    cfg.overlap_sec = positive_number(key, val)?;
                }
                "max_speakers" => {
                    let n = val.as_u64().ok_or_else(|| bad_value(key))?;
                    if n == 0 {
                        return Err(MinutaError::invalid_input(
                            "max_speakers must be at least 1",
                        ));
                    }
                    cfg.max_speakers = n as usize;
                }
                "language" => {
                    cfg.language = val
                        .as_str()
                        .ok_or_else(|| bad_value(key))?
                        .to_string();
                }
                "speech_provider" => {
                    let s = val.as_str().ok_or_else(|| bad_value(key))?;
                    cfg.speech_provider = ProviderSelection::parse(s)?;
                }
                "speech_model" => {
                    cfg.speech_model =
                        Some(val.as_str().ok_or_else(|| bad_value(key))?.to_string());
                }
                "user_match_threshold" => {
                    cfg.user_match_threshold = unit_interval(key, val)? as f32;
                }
                "overlap_dedupe_threshold" => {
                    cfg.overlap_dedupe_threshold = unit_interval(key, val)?;
                }
                other => {
                    return Err(MinutaError::invalid_input(format!(
                        "unknown config key: {other}"
                    )))
                }
            }
        }

        if cfg.chunk_window_sec <= cfg.overlap_sec {
            return Err(MinutaError::invalid_input(
                "chunk_window_sec must be greater than overlap_sec",
            ));
        }
        Ok(cfg)
    }
}

fn bad_value(key: &str) -> MinutaError {
    MinutaError::invalid_input(format!("invalid value for config key {key}"))
}

fn positive_number(key: &str, val: &Value) -> Result<f64, MinutaError> {
    let n = val.as_f64().ok_or_else(|| bad_value(key))?;
    if n <= 0.0 || !n.is_finite() {
        return Err(MinutaError::invalid_input(format!(
            "{key} must be a positive number"
        )));
    }
    Ok(n)
}

fn unit_interval(key: &str, val: &Value) -> Result<f64, MinutaError> {
    let n = val.as_f64().ok_or_else(|| bad_value(key))?;
    if !(n > 0.0 && n <= 1.0) {
        return Err(MinutaError::invalid_input(format!(
            "{key} must be in (0, 1]"
        )));
    }
    Ok(n)
}

/// Per-user transcription API configuration, read from the
/// `apiConfigs/{user_id}` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(rename = "speechProvider")]
    pub provider: SpeechProvider,
    #[serde(rename = "speechApiKey")]
    pub api_key: String,
    #[serde(rename = "speechModel", default)]
    pub model: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(rename = "speechSettings", default)]
    pub settings: HashMap<String, Value>,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

impl ApiConfig {
    pub fn new(provider: SpeechProvider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: None,
            language: DEFAULT_LANGUAGE.to_string(),
            settings: HashMap::new(),
        }
    }

    /// The configured model, falling back to the provider default.
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// ISO-639-1 primary subtag, which several providers want instead of
    /// the full BCP-47 tag.
    pub fn language_primary(&self) -> &str {
        self.language.split('-').next().unwrap_or(&self.language)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_when_empty() {
        let cfg = JobConfig::from_value(&json!({})).unwrap();
        assert_eq!(cfg.chunk_threshold_sec, 1800.0);
        assert_eq!(cfg.overlap_sec, 300.0);
        assert_eq!(cfg.max_speakers, 5);
        assert_eq!(cfg.language, "ja-JP");
        assert_eq!(
            cfg.speech_provider,
            ProviderSelection::Fixed(SpeechProvider::OpenAi)
        );
    }

    #[test]
    fn unknown_key_rejected() {
        let err = JobConfig::from_value(&json!({"chunk_treshold_sec": 600})).unwrap_err();
        assert!(matches!(err, MinutaError::InvalidInput(_)));
    }

    #[test]
    fn window_must_exceed_overlap() {
        let err = JobConfig::from_value(&json!({
            "chunk_window_sec": 100,
            "overlap_sec": 100,
        }))
        .unwrap_err();
        assert!(matches!(err, MinutaError::InvalidInput(_)));
    }

    #[test]
    fn auto_provider_selection() {
        let cfg = JobConfig::from_value(&json!({"speech_provider": "auto"})).unwrap();
        assert_eq!(cfg.speech_provider, ProviderSelection::Auto);

        let cfg = JobConfig::from_value(&json!({"speech_provider": "deepgram"})).unwrap();
        assert_eq!(
            cfg.speech_provider,
            ProviderSelection::Fixed(SpeechProvider::Deepgram)
        );
    }

    #[test]
    fn threshold_range_enforced() {
        assert!(JobConfig::from_value(&json!({"user_match_threshold": 1.5})).is_err());
        assert!(JobConfig::from_value(&json!({"overlap_dedupe_threshold": 0.0})).is_err());
    }

    #[test]
    fn api_config_model_fallback() {
        let cfg = ApiConfig::new(SpeechProvider::Deepgram, "key");
        assert_eq!(cfg.model_name(), "nova-2");
        assert_eq!(cfg.language_primary(), "ja");
    }
}
