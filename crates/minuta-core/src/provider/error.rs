//! Provider-specific error types

use crate::config::SpeechProvider;

/// Errors that can occur inside a speech provider adapter.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Provider id not known to the registry
    #[error("provider not found: {0}")]
    NotFound(String),

    /// API key is missing for a provider that requires one
    #[error("API key missing for {provider}")]
    MissingApiKey { provider: String },

    /// Transcription request failed
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Network/HTTP error during the API call
    #[error("network error: {0}")]
    Network(String),

    /// Provider returned a response the adapter could not interpret
    #[error("invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },

    /// Rate limit exceeded
    #[error("rate limit exceeded for {0}")]
    RateLimited(String),

    /// 5xx from the provider
    #[error("{provider} server error ({status}): {message}")]
    ServerError {
        provider: String,
        status: u16,
        message: String,
    },

    /// Non-retryable API rejection (4xx other than 408/429)
    #[error("{provider} rejected the request ({status}): {message}")]
    Rejected {
        provider: String,
        status: u16,
        message: String,
    },

    /// I/O error while slicing or reading audio
    #[error("provider I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn missing_api_key(provider: SpeechProvider) -> Self {
        Self::MissingApiKey {
            provider: provider.as_str().to_string(),
        }
    }

    pub fn invalid_response(provider: &str, message: impl std::fmt::Display) -> Self {
        Self::InvalidResponse {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    /// Classify an unsuccessful HTTP status into the matching variant.
    pub fn from_status(provider: &str, status: u16, message: String) -> Self {
        match status {
            429 => Self::RateLimited(provider.to_string()),
            500..=599 | 408 => Self::ServerError {
                provider: provider.to_string(),
                status,
                message,
            },
            _ => Self::Rejected {
                provider: provider.to_string(),
                status,
                message,
            },
        }
    }

    /// Whether a retry with backoff is worth attempting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited(_) | Self::ServerError { .. }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            ProviderError::RateLimited("API".to_string())
        } else if err.is_timeout() {
            ProviderError::Network(format!("request timeout: {err}"))
        } else if err.is_connect() {
            ProviderError::Network(format!("connection failed: {err}"))
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}
