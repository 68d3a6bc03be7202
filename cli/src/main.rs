// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Atlas Node Daemon
//!
//! The `atlas-daemon` binary runs on every game server node. It manages the
//! containers of the services the Atlas control plane assigns to this node.
//!
//! ## Commands
//!
//! - `atlas-daemon run` - Run the daemon in the foreground (default)
//! - `atlas-daemon config show|validate|generate` - Configuration management
//! - `atlas-daemon status` - Query a running daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use atlas_daemon::commands::{self, ConfigCommand};
use atlas_daemon::daemon::{self, RunOverrides};
use atlas_daemon_core::domain::node_config::NodeConfigManifest;

/// Atlas node daemon - container lifecycle, files, console and SFTP for game servers
#[derive(Parser)]
#[command(name = "atlas-daemon")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "ATLAS_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to the config value.
    #[arg(long, global = true, env = "ATLAS_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    #[command(name = "run")]
    Run {
        /// HTTP API port (overrides config and PORT)
        #[arg(long)]
        port: Option<u16>,

        /// HTTP API bind address (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Check whether a daemon is answering
    #[command(name = "status")]
    Status {
        /// Daemon host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Daemon HTTP port (default: from config)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Deployments configure NODE_TOKEN, CORE_URL etc. through a .env file
    let dotenv = dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        port: None,
        host: None,
    }) {
        Commands::Run { port, host } => {
            let config = NodeConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            let logging = &config.spec.observability.logging;
            init_logging(
                cli.log_level.as_deref().unwrap_or(&logging.level),
                &logging.format,
            )?;
            if let Some(path) = dotenv {
                info!("Loaded environment from {}", path.display());
            }
            daemon::start_daemon(config, RunOverrides { port, host }).await
        }
        Commands::Config { command } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "pretty")?;
            commands::config::handle_command(command, cli.config).await
        }
        Commands::Status { host, port } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "pretty")?;
            commands::status::handle_command(cli.config, &host, port).await
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format.eq_ignore_ascii_case("json") {
        builder.json().with_target(true).init();
    } else {
        builder.with_target(false).compact().init();
    }

    Ok(())
}
