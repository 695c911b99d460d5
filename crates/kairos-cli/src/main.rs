//! Operator CLI for Kairos
//!
//! Inspects node configuration and runs the timestamp authority, request
//! coalescing and the sweep service together against in-memory backends.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{
    config::{handle_config_command, ConfigCommand},
    simulate::{handle_simulate_command, SimulateArgs},
};

#[derive(Parser)]
#[command(name = "kairos")]
#[command(about = "Kairos - fenced timestamps, request coalescing and resumable sweeps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Allocate, write and sweep against in-memory backends
    Simulate(SimulateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Config(cmd) => handle_config_command(cmd)?,
        Commands::Simulate(args) => handle_simulate_command(args).await?,
    }

    Ok(())
}
