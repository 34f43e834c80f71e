mod cli;
mod commands;
mod inputs;
mod logging;
mod storage;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use snapshot_stream_core::PipelineConfig;
use snapshot_stream_word_count::GeneratorOptions;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Missing file means defaults; an unreadable or invalid file is an error
fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        warn!(config = %path.display(), "configuration file not found, using defaults");
        return Ok(PipelineConfig::default());
    }
    let config = PipelineConfig::load(path)?;
    info!(
        config = %path.display(),
        reducers = config.reducers.len(),
        mappers = config.mappers.len(),
        marker_interval = config.marker_interval,
        "configuration loaded"
    );
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let shutdown = CancellationToken::new();
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received, initiating shutdown");
                ctrl_c_token.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    match cli.command {
        Commands::Generate {
            dir,
            files,
            rows,
            words_per_row,
        } => commands::run_generate(
            &dir,
            &GeneratorOptions {
                files,
                rows_per_file: rows,
                words_per_row,
            },
        ),
        Commands::Reducer {
            index,
            exit_when_drained,
        } => {
            let config = load_config(&cli.config)?;
            commands::run_reducer(&config, index, exit_when_drained, shutdown).await
        }
        Commands::Mapper { index, inputs } => {
            let config = load_config(&cli.config)?;
            commands::run_mapper(&config, index, &inputs, shutdown).await
        }
        Commands::Local {
            inputs,
            top,
            drain_timeout_ms,
        } => {
            let config = load_config(&cli.config)?;
            commands::run_local(
                &config,
                &inputs,
                top,
                Duration::from_millis(drain_timeout_ms),
                shutdown,
            )
            .await
        }
        Commands::Checkpoints { reducer, sequence } => {
            let config = load_config(&cli.config)?;
            commands::run_checkpoints(&config, reducer.as_deref(), sequence).await
        }
    }
}
