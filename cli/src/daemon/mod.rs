// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Service wiring and background tasks
//! - HTTP liveness checks against a running daemon
//! - Graceful shutdown

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

pub mod server;

pub use server::{start_daemon, RunOverrides};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running { system: String },
    Stopped,
    Unhealthy { error: String },
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    system: String,
}

/// Probe the unauthenticated `/status` endpoint of a daemon.
pub async fn check_daemon_running(host: &str, port: u16) -> Result<DaemonStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let base_url = if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host.trim_end_matches('/'), port)
    } else {
        format!("http://{}:{}", host, port)
    };

    let response = match client.get(format!("{}/status", base_url)).send().await {
        Ok(response) => response,
        Err(e) if e.is_connect() || e.is_timeout() => return Ok(DaemonStatus::Stopped),
        Err(e) => {
            return Ok(DaemonStatus::Unhealthy {
                error: e.to_string(),
            })
        }
    };

    if !response.status().is_success() {
        return Ok(DaemonStatus::Unhealthy {
            error: format!("HTTP {}", response.status()),
        });
    }

    match response.json::<StatusResponse>().await {
        Ok(body) if body.status == "online" => Ok(DaemonStatus::Running {
            system: body.system,
        }),
        Ok(body) => Ok(DaemonStatus::Unhealthy {
            error: format!("reported status '{}'", body.status),
        }),
        Err(e) => Ok(DaemonStatus::Unhealthy {
            error: format!("unexpected response: {}", e),
        }),
    }
}
