// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Local Tenant Storage
//!
//! One directory per service under the node's data root, bind-mounted into
//! the service container. Besides the tenant's own files it holds the
//! generated scripts and the install sentinels.
//!
//! **Layout:**
//! - `<data_root>/<uuid>/start.sh`
//! - `<data_root>/<uuid>/install.sh` (when an install ran)
//! - `<data_root>/<uuid>/.atlas_installed` or `.atlas_install_failed`
//! - `<data_root>/.ssh_host_key` (owned by the SFTP gateway)

use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::install::{
    failed_marker_contents, installed_marker_contents, InstallError, InstallState,
    INSTALLED_MARKER, INSTALL_FAILED_MARKER,
};
use crate::domain::path_sanitizer::TenantSandbox;
use crate::domain::service::ServiceId;
use crate::infrastructure::script_template_engine::write_executable;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("data directory for {0} does not exist")]
    NotFound(String),

    #[error("storage I/O error: {0}")]
    IoError(String),
}

/// Local filesystem storage for service data directories.
#[derive(Debug, Clone)]
pub struct TenantStorage {
    sandbox: TenantSandbox,
}

impl TenantStorage {
    /// Create the data root if needed and verify it is writable.
    pub fn new(data_root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_root = data_root.into();

        std::fs::create_dir_all(&data_root).map_err(|e| {
            StorageError::IoError(format!(
                "Failed to create data root {}: {}",
                data_root.display(),
                e
            ))
        })?;

        let test_file = data_root.join(".atlas-storage-test");
        std::fs::write(&test_file, b"test").map_err(|e| {
            StorageError::IoError(format!(
                "Data root {} is not writable: {}",
                data_root.display(),
                e
            ))
        })?;
        std::fs::remove_file(&test_file)
            .map_err(|e| StorageError::IoError(format!("Failed to cleanup test file: {}", e)))?;

        Ok(Self {
            sandbox: TenantSandbox::new(data_root),
        })
    }

    pub fn sandbox(&self) -> &TenantSandbox {
        &self.sandbox
    }

    pub fn data_root(&self) -> &Path {
        self.sandbox.data_root()
    }

    pub fn tenant_dir(&self, id: &ServiceId) -> PathBuf {
        self.sandbox.tenant_root(id)
    }

    pub fn exists(&self, id: &ServiceId) -> bool {
        self.tenant_dir(id).is_dir()
    }

    pub async fn ensure_tenant_dir(&self, id: &ServiceId) -> Result<PathBuf, StorageError> {
        let dir = self.tenant_dir(id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::IoError(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        Ok(dir)
    }

    /// chown the tenant directory itself (not recursive).
    pub async fn set_owner(&self, id: &ServiceId, uid: u32, gid: u32) -> Result<(), StorageError> {
        let dir = self.tenant_dir(id);
        tokio::task::spawn_blocking(move || std::os::unix::fs::chown(&dir, Some(uid), Some(gid)))
            .await
            .map_err(|e| StorageError::IoError(e.to_string()))?
            .map_err(|e| StorageError::IoError(e.to_string()))
    }

    /// Write an executable script into an existing tenant directory.
    pub async fn write_script(
        &self,
        id: &ServiceId,
        name: &str,
        contents: &str,
    ) -> Result<PathBuf, StorageError> {
        if !self.exists(id) {
            return Err(StorageError::NotFound(id.to_string()));
        }
        let path = self.tenant_dir(id).join(name);
        write_executable(&path, contents).await.map_err(|e| {
            StorageError::IoError(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(path)
    }

    /// Remove every top-level entry except those named in `keep`.
    /// Returns how many entries were removed. A missing directory is empty.
    pub async fn wipe_except(&self, id: &ServiceId, keep: &[String]) -> Result<usize, StorageError> {
        let dir = self.tenant_dir(id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::IoError(e.to_string())),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::IoError(e.to_string()))?
        {
            let name = entry.file_name();
            if keep.iter().any(|k| name.as_os_str() == k.as_str()) {
                continue;
            }

            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StorageError::IoError(e.to_string()))?;
            let result = if file_type.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove entry during reinstall wipe");
                }
            }
        }

        Ok(removed)
    }

    /// Recursively delete the tenant directory. Missing is fine.
    pub async fn remove_tenant(&self, id: &ServiceId) -> Result<(), StorageError> {
        let dir = self.tenant_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::IoError(format!(
                "Failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Persist the outcome of an install.
    ///
    /// Returns `Ok(false)` without writing anything when the tenant directory
    /// no longer exists, so a delete racing an install is not undone.
    pub async fn record_install_outcome(
        &self,
        id: &ServiceId,
        outcome: Result<(), &InstallError>,
    ) -> Result<bool, StorageError> {
        if !self.exists(id) {
            return Ok(false);
        }
        let dir = self.tenant_dir(id);

        let (write, contents, stale) = match outcome {
            Ok(()) => (
                INSTALLED_MARKER,
                installed_marker_contents(Utc::now()),
                INSTALL_FAILED_MARKER,
            ),
            Err(e) => (INSTALL_FAILED_MARKER, failed_marker_contents(e), INSTALLED_MARKER),
        };

        match tokio::fs::remove_file(dir.join(stale)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::IoError(e.to_string())),
        }
        tokio::fs::write(dir.join(write), contents)
            .await
            .map_err(|e| StorageError::IoError(e.to_string()))?;

        Ok(true)
    }

    pub async fn install_state(&self, id: &ServiceId) -> InstallState {
        let dir = self.tenant_dir(id);
        let installed = tokio::fs::read_to_string(dir.join(INSTALLED_MARKER)).await.ok();
        let failed = tokio::fs::read_to_string(dir.join(INSTALL_FAILED_MARKER)).await.ok();
        InstallState::from_markers(installed.as_deref(), failed.as_deref())
    }

    /// Total size of regular files under the tenant directory.
    pub async fn usage_bytes(&self, id: &ServiceId) -> u64 {
        let dir = self.tenant_dir(id);
        tokio::task::spawn_blocking(move || calculate_size(&dir))
            .await
            .unwrap_or(0)
    }
}

/// Calculate directory size recursively
fn calculate_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.metadata().ok())
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
        .sum()
}
