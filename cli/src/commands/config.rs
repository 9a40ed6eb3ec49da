// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use rift_governance_core::domain::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE};
use rift_governance_core::GovernanceConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show effective configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print as YAML instead of a summary
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Write the default configuration to a file
    Generate {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(&output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = GovernanceConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. {}", DEFAULT_CONFIG_FILE);
        println!("  4. ~/.rift/governance.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", render_yaml(&config)?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Capacities:".bold());
    println!("  Registry: {} tasks", config.registry_capacity);
    println!("  Token pool: {} tokens", config.token_capacity);
    println!("  Children per parent: {}", config.max_children_per_parent);
    println!("  Hierarchy depth: {}", config.max_hierarchy_depth);
    println!("  Event buffer: {}", config.event_bus_capacity);
    println!();

    println!("{}", "Heartbeat:".bold());
    println!("  Interval: {:?}", config.heartbeat_interval);
    match config.default_max_execution_time {
        Some(limit) if !limit.is_zero() => println!("  Default max execution time: {:?}", limit),
        _ => println!("  Default max execution time: {}", "unlimited".dimmed()),
    }
    println!("  Yield every: {} ticks", config.yield_every_ticks);
    println!();

    println!("{}", "Watchdog:".bold());
    if config.watchdog.enabled {
        println!("  Enabled: {}", "yes".green());
        println!("  Stale after: {:?}", config.watchdog.stale_after);
        println!("  Sweep interval: {:?}", config.watchdog.sweep_interval);
        println!("  Reclaim leaked tokens: {}", config.watchdog.reclaim_leaked_tokens);
    } else {
        println!("  Enabled: {}", "no".dimmed());
    }
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = GovernanceConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    GovernanceConfig::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

fn render_yaml(config: &GovernanceConfig) -> Result<String> {
    serde_yaml::to_string(config).context("Failed to render configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("governance.yaml");

        generate(&path, false).unwrap();
        let loaded = GovernanceConfig::from_yaml_file(&path).unwrap();
        assert_eq!(loaded, GovernanceConfig::default());

        assert!(generate(&path, false).is_err());
        assert!(generate(&path, true).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "token_capacity: 0\n").unwrap();

        assert!(validate(Some(path)).is_err());
    }

    #[test]
    fn test_render_yaml_uses_humantime() {
        let yaml = render_yaml(&GovernanceConfig::default()).unwrap();
        assert!(yaml.contains("heartbeat_interval: 100ms"));
    }
}
