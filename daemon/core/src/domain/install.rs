// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Install Outcome Model
//!
//! Sentinel files in a tenant's data directory are the durable record of the
//! last install attempt. They outlive the daemon process and are what other
//! operations poll to learn how a detached install ended.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Install sentinels, stages and errors

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub const INSTALLED_MARKER: &str = ".atlas_installed";
pub const INSTALL_FAILED_MARKER: &str = ".atlas_install_failed";
pub const START_SCRIPT: &str = "start.sh";
pub const INSTALL_SCRIPT: &str = "install.sh";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to pull install image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("failed to prepare data directory: {0}")]
    DataDirectory(String),

    #[error("failed to set data directory ownership to {uid}:{gid}: {message}")]
    Ownership { uid: u32, gid: u32, message: String },

    #[error("installer container error: {0}")]
    Runtime(String),

    #[error("install script exited with code {0}")]
    NonZeroExit(i64),

    #[error("failed waiting for installer container: {0}")]
    Wait(String),

    /// The service was deleted while the install was running.
    #[error("install aborted: service deleted")]
    Aborted,
}

/// Coarse progress reported while an install runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    PullingImage,
    PreparingVolume,
    RunningScript,
}

impl InstallStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStage::PullingImage => "pulling_image",
            InstallStage::PreparingVolume => "preparing_volume",
            InstallStage::RunningScript => "running_script",
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            InstallStage::PullingImage => 10,
            InstallStage::PreparingVolume => 25,
            InstallStage::RunningScript => 50,
        }
    }
}

/// Durable install outcome as read back from the sentinels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallState {
    None,
    Installed {
        #[serde(skip_serializing_if = "Option::is_none")]
        at: Option<DateTime<Utc>>,
    },
    Failed { error: String },
}

impl InstallState {
    /// Build from sentinel contents. A failure marker takes precedence.
    pub fn from_markers(installed: Option<&str>, failed: Option<&str>) -> Self {
        if let Some(error) = failed {
            return InstallState::Failed {
                error: error.trim().to_string(),
            };
        }
        match installed {
            Some(stamp) => InstallState::Installed {
                at: DateTime::parse_from_rfc3339(stamp.trim())
                    .ok()
                    .map(|t| t.with_timezone(&Utc)),
            },
            None => InstallState::None,
        }
    }
}

/// Contents of the success sentinel.
pub fn installed_marker_contents(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

/// Contents of the failure sentinel; never empty.
pub fn failed_marker_contents(error: &InstallError) -> String {
    let text = error.to_string();
    if text.trim().is_empty() {
        "install failed".to_string()
    } else {
        text
    }
}
