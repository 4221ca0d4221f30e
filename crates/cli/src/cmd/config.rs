//! Configuration inspection command

use crate::config;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

/// Show the config file path and whether it exists
pub async fn run_path() -> Result<()> {
    let config_path = config::config_file_path().context("Could not determine config file path")?;

    println!("{}", config_path.display());
    if !config_path.exists() {
        println!(
            "{}",
            "File does not exist. Defaults are in effect; see 'settle config --example'.".yellow()
        );
    }
    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", config::example_config());
    Ok(())
}

/// Print the effective configuration as TOML
pub async fn run_show(explicit: Option<&Path>) -> Result<()> {
    let config = config::load(explicit)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;

    println!("{}", "Effective Configuration".bold());
    println!();
    println!("{}", rendered);
    Ok(())
}
