//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "minuta", version, about = "Speaker-labeled transcription pipeline")]
pub struct Cli {
    /// Root directory for local blobs, job records and fingerprints
    #[arg(long, global = true, default_value = ".minuta")]
    pub data_dir: PathBuf,

    /// Verbose logging (equivalent to RUST_LOG=minuta=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a processing job end to end
    Process {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        audio_id: String,
        /// Job options as a JSON object (unknown keys are rejected)
        #[arg(long)]
        config: Option<String>,
        /// Primary provider API key; falls back to <PROVIDER>_API_KEY env
        #[arg(long)]
        api_key: Option<String>,
        /// Fallback providers to try when segments fail, in order
        #[arg(long, value_delimiter = ',')]
        fallback: Vec<String>,
        /// Hosted diarization endpoint (or DIARIZER_ENDPOINT env); the
        /// mock path is used when absent
        #[arg(long)]
        diarizer_endpoint: Option<String>,
    },

    /// Show the status document of a job
    Status {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        audio_id: String,
    },

    /// Mark a job as cancelled in the status document
    Cancel {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        audio_id: String,
    },

    /// Update the user's voice fingerprint from an audio file
    LearnVoice {
        #[arg(long)]
        user_id: String,
        /// Path to a WAV recording of the user's voice
        #[arg(long)]
        file: PathBuf,
    },

    /// List the available speech providers
    Providers,
}
