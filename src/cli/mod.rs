//! CLI interface for pmkit
//!
//! Provides subcommands for:
//! - `run`: Run the market-watch bot against a venue
//! - `markets`: Show the current, next, and guard-selected markets
//! - `config`: Show the loaded configuration

mod markets;
mod run;

pub use markets::MarketsArgs;
pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pmkit")]
#[command(about = "Connection-resilience and market-lifecycle engine for prediction-market bots")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the market-watch bot
    Run(RunArgs),
    /// Show current/next/selected markets for an asset
    Markets(MarketsArgs),
    /// Show current configuration
    Config,
}
