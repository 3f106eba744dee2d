//! Configuration management command
//!
//! Provides CLI interface to view and edit the layer configuration.

use crate::util::{config_file_path, load_config};
use anyhow::{Context, Result};
use localfs_core::config::FsConfig;
use owo_colors::OwoColorize;
use std::path::Path;

/// List all configuration values
pub async fn run_list(override_path: Option<&Path>) -> Result<()> {
    let config = load_config(override_path)?;
    let config_path = config_file_path(override_path)?;

    println!("{}", "Configuration".bold());
    println!("{}: {}\n", "Location".dimmed(), config_path.display().dimmed());

    println!("{}", "[watcher]".yellow());
    println!(
        "  {} = {} {}",
        "debounce_ds".cyan(),
        config.watcher.debounce_ds,
        format!("({}ms)", config.watcher.debounce_ds * 100).dimmed()
    );
    println!(
        "  {} = {} {}",
        "rescan_interval_secs".cyan(),
        config.watcher.rescan_interval_secs,
        format!("({} min)", config.watcher.rescan_interval_secs / 60).dimmed()
    );
    println!("  {} = {:?}", "ignore_dir".cyan(), config.watcher.ignore_dir);

    println!("\n{}", "[io]".yellow());
    println!("  {} = {}", "workers".cyan(), config.io.workers);

    println!("\n{}", "Valid Ranges:".bold());
    println!("  debounce_ds: 0-600");
    println!("  rescan_interval_secs: 1-86400");
    println!("  workers: 1-64");

    Ok(())
}

fn lookup(config: &FsConfig, key: &str) -> Result<String> {
    let value = match key {
        "watcher.debounce_ds" => config.watcher.debounce_ds.to_string(),
        "watcher.rescan_interval_secs" => config.watcher.rescan_interval_secs.to_string(),
        "watcher.ignore_dir" => config.watcher.ignore_dir.clone(),
        "io.workers" => config.io.workers.to_string(),
        _ => anyhow::bail!(
            "Unknown config key: {}. Use 'lfs config' to see available keys.",
            key
        ),
    };
    Ok(value)
}

fn assign(config: &mut FsConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "watcher.debounce_ds" => {
            config.watcher.debounce_ds = value
                .parse()
                .context("Invalid value: must be a non-negative integer")?;
        }
        "watcher.rescan_interval_secs" => {
            config.watcher.rescan_interval_secs = value
                .parse()
                .context("Invalid value: must be a positive integer")?;
        }
        "watcher.ignore_dir" => config.watcher.ignore_dir = value.to_string(),
        "io.workers" => {
            config.io.workers = value
                .parse()
                .context("Invalid value: must be a positive integer")?;
        }
        _ => anyhow::bail!(
            "Unknown config key: {}. Use 'lfs config' to see available keys.",
            key
        ),
    }
    Ok(())
}

/// Get a single configuration value
pub async fn run_get(override_path: Option<&Path>, key: &str) -> Result<()> {
    let config = load_config(override_path)?;
    println!("{}", lookup(&config, key)?);
    Ok(())
}

/// Set a configuration value
pub async fn run_set(override_path: Option<&Path>, key: &str, value: &str) -> Result<()> {
    let mut config = load_config(override_path)?;
    assign(&mut config, key, value)?;

    config.validate().context("Invalid configuration value")?;
    config.save(&config_file_path(override_path)?)?;

    println!("{} {} = {}", "✓".green(), key.cyan(), value);
    Ok(())
}

/// Show the config file path
pub async fn run_path(override_path: Option<&Path>) -> Result<()> {
    let config_path = config_file_path(override_path)?;
    println!("{}", config_path.display());
    if !config_path.exists() {
        println!("{}", "File does not exist; defaults are in effect.".yellow());
    }
    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    print!("{}", FsConfig::example());
    Ok(())
}
