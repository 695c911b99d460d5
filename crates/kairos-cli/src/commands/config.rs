//! `kairos config` - inspect and check node configuration

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show {
        /// Config file; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Load and validate a configuration file
    Validate {
        /// Config file to check
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Handle a config subcommand
pub fn handle_config_command(cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { config } => {
            let node = NodeConfig::load(config.as_deref())?;
            let text = toml::to_string_pretty(&node).context("rendering configuration")?;
            println!("{text}");
        }
        ConfigCommand::Validate { config } => {
            NodeConfig::load(Some(&config))
                .with_context(|| format!("{} is not a valid configuration", config.display()))?;
            println!("{}: ok", config.display());
        }
    }
    Ok(())
}
