//! Unified error types for minuta-core.
//!
//! Two levels: provider adapters have their own `ProviderError`, and the
//! pipeline wraps everything in `MinutaError`. The orchestrator keys its
//! behavior off the variant: `NotFound` and `InvalidInput` surface to the
//! caller unretried, `Transient` goes through backoff, `Auth` and `Fatal`
//! end the job.

pub use crate::provider::ProviderError;

/// Top-level error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum MinutaError {
    /// Blob or document absent; surfaced to the caller, never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or provider 5xx/quota; retried with backoff, then escalated.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Bad configuration or rejected input (e.g. low-quality learning audio).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing or invalid credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Unrecoverable failure (model init, preprocessing).
    #[error("fatal: {0}")]
    Fatal(String),

    /// Job observed the cancel signal at an await point.
    #[error("job cancelled")]
    Cancelled,

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl MinutaError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Whether a retry with backoff is worth attempting.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Provider(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Convenience result type using MinutaError.
pub type Result<T> = std::result::Result<T, MinutaError>;

impl From<serde_json::Error> for MinutaError {
    fn from(err: serde_json::Error) -> Self {
        MinutaError::InvalidInput(format!("malformed JSON: {err}"))
    }
}

impl From<hound::Error> for MinutaError {
    fn from(err: hound::Error) -> Self {
        MinutaError::Fatal(format!("WAV processing failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(MinutaError::transient("socket reset").is_transient());
        assert!(!MinutaError::not_found("blob").is_transient());
        assert!(!MinutaError::invalid_input("bad key").is_transient());
        assert!(!MinutaError::Cancelled.is_transient());
    }
}
