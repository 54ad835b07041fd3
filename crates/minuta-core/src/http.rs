//! Global HTTP client singleton.
//!
//! All provider adapters and the hosted diarizer share one client so TLS
//! setup and connection pools are paid for once per process.

use std::sync::OnceLock;

use anyhow::{Context, Result};

/// Default timeout for provider API requests (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get the global HTTP client, creating it on first use.
pub fn get_http_client() -> Result<&'static reqwest::Client> {
    if let Some(client) = HTTP_CLIENT.get() {
        return Ok(client);
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .context("Failed to create HTTP client")?;

    Ok(HTTP_CLIENT.get_or_init(|| client))
}
