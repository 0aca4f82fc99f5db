//! Prints the effective engine configuration.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use super::load_config;

/// Arguments for the config command.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = rotator_core::config_loader::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Config profile overlay (loads Config.{profile}.toml next to the config file)
    #[arg(long, env = "ROTATOR_PROFILE")]
    pub profile: Option<String>,
}

/// Runs the config command.
///
/// # Errors
/// Returns an error if the configuration cannot be parsed or is invalid.
pub fn run_show_config(args: &ConfigArgs) -> Result<()> {
    let config = load_config(&args.config, args.profile.as_deref())?;
    let json = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
    println!("{json}");
    Ok(())
}
