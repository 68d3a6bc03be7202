// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Container Runtime Port
//!
//! The [`ContainerRuntime`] trait is the seam between the lifecycle
//! orchestrator and the container engine. The Docker adapter lives in
//! `infrastructure::runtime`; tests substitute in-memory fakes.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Engine-agnostic container operations and resource math

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain::service::ResourceLimits;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container conflict: {0}")]
    Conflict(String),

    #[error("Failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("Container engine error: {0}")]
    Engine(String),

    #[error("Container engine call timed out after {0:?}")]
    Timeout(Duration),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: String,
}

/// Engine-neutral description of a container to create.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub cmd: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub tty: bool,
    pub open_stdin: bool,
    pub mounts: Vec<BindMount>,
    /// Published on the host as both tcp and udp on the same port number.
    pub port: Option<u16>,
    pub limits: Option<ResourceLimits>,
    pub auto_remove: bool,
    /// `host:ip` entries added to the container's `/etc/hosts`.
    pub extra_hosts: Vec<String>,
}

/// Exit condition to block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    NotRunning,
    NextExit,
    Removed,
}

impl WaitCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitCondition::NotRunning => "not-running",
            WaitCondition::NextExit => "next-exit",
            WaitCondition::Removed => "removed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    pub follow: bool,
    pub timestamps: bool,
    pub tail: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEventAction {
    Start,
    Die,
    Stop,
    Other(String),
}

impl From<&str> for RuntimeEventAction {
    fn from(action: &str) -> Self {
        match action {
            "start" => RuntimeEventAction::Start,
            "die" => RuntimeEventAction::Die,
            "stop" => RuntimeEventAction::Stop,
            other => RuntimeEventAction::Other(other.to_string()),
        }
    }
}

/// A container-scoped engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    /// Container name when the engine reports one, else the container id.
    pub container: String,
    pub action: RuntimeEventAction,
}

/// Observed state of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// Raw counters from one engine stats sample (current and previous reading).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSample {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_cpu: u64,
    pub presystem_cpu: u64,
    pub online_cpus: u64,
    pub memory_usage: u64,
    pub memory_cache: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetworkUsage {
    pub rx: u64,
    pub tx: u64,
}

/// Point-in-time resource usage in the units the control plane displays.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub network: NetworkUsage,
}

impl ResourceSnapshot {
    pub fn from_sample(sample: &StatsSample) -> Self {
        Self {
            cpu_percent: cpu_percent(sample),
            memory_mb: memory_mb(sample),
            network: NetworkUsage {
                rx: sample.rx_bytes,
                tx: sample.tx_bytes,
            },
        }
    }

    /// Wire form: `{"cpu":"20.0","memory":400,"network":{"rx":..,"tx":..}}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "cpu": format!("{:.1}", self.cpu_percent),
            "memory": self.memory_mb,
            "network": self.network,
        })
    }
}

/// Delta-based CPU percentage across all online CPUs.
///
/// `online_cpus == 0` (older engines) counts as one CPU.
pub fn cpu_percent(sample: &StatsSample) -> f64 {
    let cpu_delta = sample.cpu_total as f64 - sample.precpu_total as f64;
    let system_delta = sample.system_cpu as f64 - sample.presystem_cpu as f64;
    let online = sample.online_cpus.max(1) as f64;

    if cpu_delta > 0.0 && system_delta > 0.0 {
        (cpu_delta / system_delta) * online * 100.0
    } else {
        0.0
    }
}

/// Working-set memory in MiB, page cache excluded.
pub fn memory_mb(sample: &StatsSample) -> u64 {
    sample.memory_usage.saturating_sub(sample.memory_cache) / 1_048_576
}

pub type LogStream = BoxStream<'static, Result<String, RuntimeError>>;
pub type EventStream = BoxStream<'static, Result<RuntimeEvent, RuntimeError>>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Liveness check against the engine.
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Returns the engine's container id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, name: &str, grace: Duration) -> Result<(), RuntimeError>;

    async fn restart_container(&self, name: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// SIGKILL, no grace period.
    async fn kill_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// Force-remove. Missing containers surface as [`RuntimeError::NotFound`].
    async fn remove_container(&self, name: &str, remove_volumes: bool) -> Result<(), RuntimeError>;

    async fn update_resources(&self, name: &str, limits: &ResourceLimits) -> Result<(), RuntimeError>;

    /// `None` when the container does not exist.
    async fn inspect_state(&self, name: &str) -> Result<Option<ContainerState>, RuntimeError>;

    /// One stats sample. Callers bound this with a timeout.
    async fn stats(&self, name: &str) -> Result<StatsSample, RuntimeError>;

    /// Block until `condition` is met and return the exit code.
    async fn wait_container(&self, name: &str, condition: WaitCondition) -> Result<i64, RuntimeError>;

    /// Attach, write `line` plus a newline to stdin, detach.
    async fn send_stdin(&self, name: &str, line: &str) -> Result<(), RuntimeError>;

    /// Combined stdout/stderr, one item per line with trailing whitespace
    /// removed and empty lines dropped.
    fn logs(&self, name: &str, options: LogOptions) -> LogStream;

    /// Container-scoped engine events for the lifetime of the stream.
    fn events(&self) -> EventStream;
}

/// Splits arbitrary output chunks into trimmed, non-empty lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = clean_line(&raw) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the source ends.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        clean_line(&raw)
    }
}

fn clean_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim_end_matches(['\r', '\n', ' ']);
    if trimmed.trim().is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
