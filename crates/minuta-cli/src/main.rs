mod args;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = args::Cli::parse();

    let default_filter = if cli.verbose { "minuta=debug" } else { "minuta=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        error::display_error(&err);
        std::process::exit(error::exit_code(&err));
    }
}

async fn run(cli: args::Cli) -> minuta_core::Result<()> {
    match cli.command {
        args::Commands::Process {
            user_id,
            audio_id,
            config,
            api_key,
            fallback,
            diarizer_endpoint,
        } => {
            commands::process(
                cli.data_dir,
                user_id,
                audio_id,
                config,
                api_key,
                fallback,
                diarizer_endpoint,
            )
            .await
        }
        args::Commands::Status { user_id, audio_id } => {
            commands::status(cli.data_dir, user_id, audio_id).await
        }
        args::Commands::Cancel { user_id, audio_id } => {
            commands::cancel(cli.data_dir, user_id, audio_id).await
        }
        args::Commands::LearnVoice { user_id, file } => {
            commands::learn_voice(cli.data_dir, user_id, file).await
        }
        args::Commands::Providers => {
            commands::providers();
            Ok(())
        }
    }
}
