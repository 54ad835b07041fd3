//! Subcommand implementations over local stores.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use minuta_core::audio::WavPreprocessor;
use minuta_core::diarization::{Diarizer, HostedDiarizer, MockDiarizer, VoiceEmbedder};
use minuta_core::provider::CloudBackendFactory;
use minuta_core::store::{
    FingerprintService, FsBlobStore, JsonFingerprintStore, JsonProgressStore, ProgressStore,
};
use minuta_core::types::{JobStatus, StatusUpdate};
use minuta_core::voice::VoiceLearning;
use minuta_core::{
    ApiConfig, JobConfig, JobRunner, MinutaError, PipelineDeps, SpeechProvider,
};

fn progress_store(data_dir: &Path) -> Arc<JsonProgressStore> {
    Arc::new(JsonProgressStore::new(data_dir.join("jobs")))
}

fn fingerprint_service(data_dir: &Path) -> Arc<FingerprintService> {
    Arc::new(FingerprintService::new(Arc::new(JsonFingerprintStore::new(
        data_dir.join("fingerprints"),
    ))))
}

fn api_key_for(provider: SpeechProvider, explicit: Option<&str>) -> minuta_core::Result<String> {
    if let Some(key) = explicit {
        return Ok(key.to_string());
    }
    let var = format!("{}_API_KEY", provider.as_str().to_uppercase());
    std::env::var(&var).map_err(|_| {
        MinutaError::Provider(minuta_core::ProviderError::MissingApiKey {
            provider: provider.as_str().to_string(),
        })
    })
}

/// Pick the hosted diarizer when an endpoint and token are configured,
/// otherwise fall back to the mock path so the pipeline stays usable.
fn select_diarizer(
    endpoint: Option<&str>,
) -> (Arc<dyn Diarizer>, Arc<dyn VoiceEmbedder>) {
    if let Some(endpoint) = endpoint {
        match HostedDiarizer::new(endpoint) {
            Ok(diarizer) => {
                let shared = Arc::new(diarizer);
                info!("using hosted diarization at {endpoint}");
                return (
                    shared.clone() as Arc<dyn Diarizer>,
                    shared as Arc<dyn VoiceEmbedder>,
                );
            }
            Err(e) => {
                warn!("hosted diarizer unavailable ({e}); using mock diarization");
            }
        }
    }
    let mock = Arc::new(MockDiarizer::new());
    (
        mock.clone() as Arc<dyn Diarizer>,
        mock as Arc<dyn VoiceEmbedder>,
    )
}

#[allow(clippy::too_many_arguments)]
pub async fn process(
    data_dir: PathBuf,
    user_id: String,
    audio_id: String,
    config_json: Option<String>,
    api_key: Option<String>,
    fallback: Vec<String>,
    diarizer_endpoint: Option<String>,
) -> minuta_core::Result<()> {
    let config = match config_json {
        Some(raw) => JobConfig::from_value(&serde_json::from_str(&raw)?)?,
        None => JobConfig::default(),
    };

    let primary_provider = match config.speech_provider {
        minuta_core::ProviderSelection::Fixed(p) => p,
        // `auto` resolves inside the runner; keys default to openai's.
        minuta_core::ProviderSelection::Auto => SpeechProvider::OpenAi,
    };
    let api = ApiConfig::new(primary_provider, api_key_for(primary_provider, api_key.as_deref())?);

    let mut fallbacks = Vec::new();
    for name in &fallback {
        let provider: SpeechProvider = name.parse()?;
        fallbacks.push(ApiConfig::new(provider, api_key_for(provider, None)?));
    }

    let diarizer_endpoint =
        diarizer_endpoint.or_else(|| std::env::var("DIARIZER_ENDPOINT").ok());
    let (diarizer, _embedder) = select_diarizer(diarizer_endpoint.as_deref());
    let deps = Arc::new(PipelineDeps {
        blob: Arc::new(FsBlobStore::new(data_dir.join("blobs"))),
        preprocessor: Arc::new(WavPreprocessor),
        diarizer,
        fingerprints: fingerprint_service(&data_dir),
        progress: progress_store(&data_dir),
        backends: Arc::new(CloudBackendFactory),
    });

    // Ctrl-C routes through the same cancel signal the front door uses.
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let runner = JobRunner::new(deps);
    let outcome = runner
        .run(&user_id, &audio_id, &config, &api, &fallbacks, &cancel)
        .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "status": "completed",
            "user_id": user_id,
            "audio_id": audio_id,
            "processing_time_sec": outcome.processing_time_sec,
            "total_chunks": outcome.total_chunks,
            "speakers": outcome.speaker_analysis.speaker_count,
            "segments": outcome.transcription.total_segments,
            "quality": outcome.transcription.quality_statistics,
        }))
        .unwrap_or_default()
    );
    Ok(())
}

pub async fn status(data_dir: PathBuf, user_id: String, audio_id: String) -> minuta_core::Result<()> {
    let store = progress_store(&data_dir);
    let record = store
        .read(&user_id, &audio_id)
        .await?
        .ok_or_else(|| MinutaError::not_found(format!("job {user_id}/{audio_id}")))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&record)
            .map_err(|e| MinutaError::Other(format!("encode failed: {e}")))?
    );
    Ok(())
}

pub async fn cancel(data_dir: PathBuf, user_id: String, audio_id: String) -> minuta_core::Result<()> {
    let store = progress_store(&data_dir);
    store
        .update_status(
            &user_id,
            &audio_id,
            &StatusUpdate::new(JobStatus::Cancelled, 0, "processing cancelled"),
        )
        .await?;
    println!(
        "{}",
        serde_json::json!({"status": "cancelled", "user_id": user_id, "audio_id": audio_id, "cancelled_at": Utc::now()})
    );
    Ok(())
}

pub async fn learn_voice(
    data_dir: PathBuf,
    user_id: String,
    file: PathBuf,
) -> minuta_core::Result<()> {
    let mock = Arc::new(MockDiarizer::new());
    let learning = VoiceLearning::new(
        Arc::new(WavPreprocessor),
        mock,
        fingerprint_service(&data_dir),
    );
    let outcome = learning.learn_from_file(&user_id, &file).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome)
            .map_err(|e| MinutaError::Other(format!("encode failed: {e}")))?
    );
    Ok(())
}

pub fn providers() {
    for provider in SpeechProvider::ALL {
        println!(
            "{:<12} default model: {:<12} ~${:.3}/min",
            provider.as_str(),
            provider.default_model(),
            provider.cost_per_minute(),
        );
    }
}
