// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use atlas_daemon_core::domain::node_config::NodeConfigManifest;

const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (file + environment overrides)
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./atlas-config.yaml")]
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
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(&output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  --config flag: {}", path.display()),
            None => println!("  --config flag: {}", "(not set)".dimmed()),
        }
        for (i, path) in NodeConfigManifest::discovery_paths().iter().enumerate() {
            let marker = if path.exists() {
                "found".green()
            } else {
                "missing".dimmed()
            };
            println!("  {}. {} ({})", i + 1, path.display(), marker);
        }
        println!();
    }

    let config = NodeConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let spec = &config.spec;

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    println!(
        "  Token: {}",
        if spec.node_token.is_empty() {
            "(empty)".red()
        } else {
            "(set)".green()
        }
    );
    println!();

    println!("{}", "Control plane:".bold());
    println!("  URL: {}", spec.control_plane.url);
    println!("  Timeout: {}s", spec.control_plane.request_timeout_secs);
    println!();

    println!("{}", "Listeners:".bold());
    println!("  HTTP API: {}:{}", spec.api.bind_addr, spec.api.port);
    if spec.sftp.enabled {
        println!("  SFTP: {}:{}", spec.sftp.bind_addr, spec.sftp.port);
    } else {
        println!("  SFTP: {}", "disabled".dimmed());
    }
    println!();

    println!("{}", "Storage:".bold());
    println!("  Data root: {}", spec.storage.data_root.display());
    println!(
        "  Owner: {}:{}",
        spec.storage.owner_uid, spec.storage.owner_gid
    );
    println!(
        "  Reinstall preserves: {}",
        spec.storage.reinstall_preserve.join(", ")
    );
    println!();

    println!("{}", "Runtime:".bold());
    println!(
        "  Docker socket: {}",
        spec.runtime
            .docker_socket_path
            .as_deref()
            .unwrap_or("(engine default)")
    );
    println!(
        "  Default install image: {}",
        spec.runtime.default_install_image
    );
    println!("  Stop grace: {}s", spec.runtime.stop_grace_secs);
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NodeConfigManifest::load_or_default(config_path)
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
            "{} already exists; pass --force to overwrite",
            output.display()
        );
    }

    std::fs::write(output, MINIMAL_TEMPLATE)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
