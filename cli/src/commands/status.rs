// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! `atlas-daemon status`

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use atlas_daemon_core::domain::node_config::NodeConfigManifest;

use crate::daemon::{check_daemon_running, DaemonStatus};

pub async fn handle_command(
    config_override: Option<PathBuf>,
    host: &str,
    port: Option<u16>,
) -> Result<()> {
    let port = match port {
        Some(port) => port,
        None => {
            NodeConfigManifest::load_or_default(config_override)
                .context("Failed to load configuration")?
                .spec
                .api
                .port
        }
    };

    match check_daemon_running(host, port).await? {
        DaemonStatus::Running { system } => {
            println!(
                "{}",
                format!("✓ {} is running on {}:{}", system, host, port).green()
            );
            Ok(())
        }
        DaemonStatus::Unhealthy { error } => {
            println!(
                "{}",
                format!("⚠ Daemon on {}:{} is unhealthy: {}", host, port, error).yellow()
            );
            std::process::exit(2);
        }
        DaemonStatus::Stopped => {
            println!(
                "{}",
                format!("✗ No daemon answering on {}:{}", host, port).red()
            );
            std::process::exit(1);
        }
    }
}
