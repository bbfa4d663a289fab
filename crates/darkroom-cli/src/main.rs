//! Darkroom CLI entrypoint.

use clap::Parser;
use darkroom_cli::DarkroomConfig;
use darkroom_trace::{init_tracer, shutdown_tracer};
use std::path::PathBuf;

mod commands;
mod handlers;

use commands::{CacheCommands, Commands, ConfigCommands, ModelCommands};

#[derive(Parser)]
#[command(name = "darkroom")]
#[command(author, version, about = "Darkroom cache and model tooling", long_about = None)]
struct Cli {
    /// Configuration file (YAML); defaults to ./darkroom.yaml when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = DarkroomConfig::load(cli.config.as_deref())?;
    init_tracer(&config.tracing)?;

    let result = match cli.command {
        Commands::Fingerprint { path, json } => handlers::fingerprint(&config, &path, json).await,
        Commands::Cache { command } => match command {
            CacheCommands::Health => handlers::cache_health(config).await,
            CacheCommands::Delete {
                stage,
                fingerprint,
                version,
                params,
                upstream,
            } => {
                handlers::cache_delete(config, &stage, &fingerprint, &version, &params, upstream)
                    .await
            }
        },
        Commands::Model { command } => match command {
            ModelCommands::Resolve { model_id } => handlers::model_resolve(config, &model_id).await,
            ModelCommands::List => handlers::model_list(&config),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config),
        },
    };

    shutdown_tracer();
    result
}
