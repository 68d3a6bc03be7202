// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Control Plane Port
//!
//! Outbound contract with the Atlas core: status pushes, heartbeats and SFTP
//! credential validation. All three are authenticated with the node token.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Upstream reporting interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::service::{ServiceId, ServiceStatus};

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("control plane request failed: {0}")]
    Transport(String),

    #[error("control plane rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid control plane response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl StatusUpdate {
    pub fn new(status: ServiceStatus) -> Self {
        Self {
            status,
            stage: None,
            progress: None,
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>, progress: u8) -> Self {
        self.stage = Some(stage.into());
        self.progress = Some(progress.min(100));
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NodeStats {
    /// Global CPU usage in percent.
    pub cpu: f64,
    /// Used memory in MB.
    pub ram: f64,
    /// Total memory in MB.
    pub ram_total: f64,
    /// Free bytes on the volume holding the data root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_free: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorHealth {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeHealth {
    pub event_monitor: MonitorHealth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatReport {
    pub stats: NodeStats,
    pub health: NodeHealth,
}

/// Answer of the delegated SFTP credential check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SftpValidation {
    pub valid: bool,
    #[serde(default)]
    pub service_uuid: Option<String>,
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn notify_status(
        &self,
        id: &ServiceId,
        update: &StatusUpdate,
    ) -> Result<(), ControlPlaneError>;

    async fn heartbeat(&self, report: &HeartbeatReport) -> Result<(), ControlPlaneError>;

    async fn validate_sftp(
        &self,
        username: &str,
        password: &str,
    ) -> Result<SftpValidation, ControlPlaneError>;
}
