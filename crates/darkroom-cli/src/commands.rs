//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Fingerprint an image by its pixel content
    Fingerprint {
        /// Image file
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Inspect and manage cached stage outputs
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Manage model artifacts
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show circuit breaker state per tier
    Health,

    /// Remove one stage output from every tier
    Delete {
        /// Stage name, e.g. bg-removal or effect:filmbw
        #[arg(long)]
        stage: String,

        /// Content fingerprint (64 hex chars)
        #[arg(long)]
        fingerprint: String,

        /// Transform version the output was produced with
        #[arg(long, default_value = "1")]
        version: String,

        /// Stage parameter as key=value; repeatable
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Key digest of the stage that fed this one
        #[arg(long)]
        upstream: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ModelCommands {
    /// Resolve a model to a verified local file
    Resolve {
        /// Registered model id
        model_id: String,
    },

    /// List registered models
    List,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}
