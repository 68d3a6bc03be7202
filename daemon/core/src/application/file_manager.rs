// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! File Manager Application Service
//!
//! Tenant file operations behind the HTTP file endpoints. Every path is
//! resolved through the tenant sandbox and checked for symlink escapes;
//! there is no operation that bypasses it.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::domain::path_sanitizer::{SandboxError, TenantSandbox};
use crate::domain::service::ServiceId;

#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("File operation failed: {0}")]
    Io(String),
}

impl FileError {
    fn from_io(path: &str, e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound(path.to_string()),
            _ => FileError::Io(format!("{}: {}", path, e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub mime: String,
}

fn mime_for(name: &str, is_dir: bool) -> String {
    if is_dir {
        return "inode/directory".to_string();
    }
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[derive(Debug, Clone)]
pub struct FileManager {
    sandbox: TenantSandbox,
}

impl FileManager {
    pub fn new(sandbox: TenantSandbox) -> Self {
        Self { sandbox }
    }

    fn ensure_tenant(&self, id: &ServiceId) -> Result<(), FileError> {
        if self.sandbox.tenant_root(id).is_dir() {
            Ok(())
        } else {
            Err(FileError::NotFound(format!("server {}", id)))
        }
    }

    fn resolve(&self, id: &ServiceId, path: &str) -> Result<PathBuf, FileError> {
        self.ensure_tenant(id)?;
        let absolute = self.sandbox.resolve(id, path)?;
        self.sandbox.check_symlinks(id, &absolute)?;
        Ok(absolute)
    }

    fn resolve_non_root(&self, id: &ServiceId, path: &str) -> Result<PathBuf, FileError> {
        self.ensure_tenant(id)?;
        let absolute = self.sandbox.resolve_non_root(id, path)?;
        self.sandbox.check_symlinks(id, &absolute)?;
        Ok(absolute)
    }

    /// Directories first, then case-insensitive by name.
    pub async fn list(&self, id: &ServiceId, path: &str) -> Result<Vec<FileEntry>, FileError> {
        let dir = self.resolve(id, path)?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| FileError::from_io(path, e))?;

        let mut listing = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FileError::from_io(path, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let is_dir = meta.is_dir();
            listing.push(FileEntry {
                mime: mime_for(&name, is_dir),
                size: if is_dir { 0 } else { meta.len() },
                is_dir,
                name,
            });
        }

        listing.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(listing)
    }

    pub async fn read(&self, id: &ServiceId, path: &str) -> Result<Vec<u8>, FileError> {
        let file = self.resolve(id, path)?;
        if file.is_dir() {
            return Err(FileError::InvalidRequest(format!("{} is a directory", path)));
        }
        tokio::fs::read(&file)
            .await
            .map_err(|e| FileError::from_io(path, e))
    }

    /// Write `content`, creating parent directories.
    pub async fn write(&self, id: &ServiceId, path: &str, content: &[u8]) -> Result<(), FileError> {
        let file = self.resolve_non_root(id, path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FileError::from_io(path, e))?;
        }
        tokio::fs::write(&file, content)
            .await
            .map_err(|e| FileError::from_io(path, e))?;
        info!(service = %id, path = %path, bytes = content.len(), "File written");
        Ok(())
    }

    pub async fn create_folder(&self, id: &ServiceId, path: &str) -> Result<(), FileError> {
        let dir = self.resolve_non_root(id, path)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| FileError::from_io(path, e))
    }

    /// Remove a file or a directory tree. The data directory itself is refused.
    pub async fn delete(&self, id: &ServiceId, path: &str) -> Result<(), FileError> {
        let target = self.resolve_non_root(id, path)?;
        let meta = tokio::fs::symlink_metadata(&target)
            .await
            .map_err(|e| FileError::from_io(path, e))?;
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        result.map_err(|e| FileError::from_io(path, e))?;
        info!(service = %id, path = %path, "File deleted");
        Ok(())
    }

    /// Store an uploaded file in `dir` under the basename of `filename`.
    pub async fn upload(
        &self,
        id: &ServiceId,
        dir: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<String, FileError> {
        let unified = filename.replace('\\', "/");
        let name = Path::new(&unified)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty() && n != "." && n != "..")
            .ok_or_else(|| FileError::InvalidRequest("Invalid upload filename".to_string()))?;

        let relative = format!("{}/{}", dir.trim_end_matches('/'), name);
        self.write(id, &relative, content).await?;
        Ok(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UUID: &str = "550e8400-e29b-41d4-a716-446655440000";

    fn setup() -> (TempDir, FileManager, ServiceId) {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(UUID)).unwrap();
        let manager = FileManager::new(TenantSandbox::new(tmp.path()));
        (tmp, manager, ServiceId::parse(UUID).unwrap())
    }

    #[tokio::test]
    async fn test_list_sorting_and_mime() {
        let (tmp, fm, id) = setup();
        let root = tmp.path().join(UUID);
        std::fs::write(root.join("b.txt"), "b").unwrap();
        std::fs::write(root.join("A.json"), "{}").unwrap();
        std::fs::create_dir(root.join("zworld")).unwrap();
        std::fs::create_dir(root.join("Logs")).unwrap();

        let names: Vec<_> = fm
            .list(&id, "/")
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.mime))
            .collect();
        assert_eq!(
            names,
            vec![
                ("Logs".to_string(), "inode/directory".to_string()),
                ("zworld".to_string(), "inode/directory".to_string()),
                ("A.json".to_string(), "application/json".to_string()),
                ("b.txt".to_string(), "text/plain".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let (_tmp, fm, id) = setup();
        fm.write(&id, "config/server.cfg", b"hostname x").await.unwrap();
        assert_eq!(fm.read(&id, "/config/server.cfg").await.unwrap(), b"hostname x");
    }

    #[tokio::test]
    async fn test_traversal_is_clamped_inside_tenant() {
        let (tmp, fm, id) = setup();
        fm.write(&id, "../../escape.txt", b"x").await.unwrap();
        assert!(tmp.path().join(UUID).join("escape.txt").exists());
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_delete_root_rejected() {
        let (tmp, fm, id) = setup();
        for path in ["", "/", "..", "a/.."] {
            assert!(matches!(
                fm.delete(&id, path).await,
                Err(FileError::Sandbox(SandboxError::RootDirectory))
            ));
        }
        assert!(tmp.path().join(UUID).exists());
    }

    #[tokio::test]
    async fn test_missing_file_not_found() {
        let (_tmp, fm, id) = setup();
        assert!(matches!(fm.read(&id, "nope.txt").await, Err(FileError::NotFound(_))));
        assert!(matches!(fm.delete(&id, "nope.txt").await, Err(FileError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let (tmp, fm, id) = setup();
        let outside = tmp.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, tmp.path().join(UUID).join("link")).unwrap();

        assert!(matches!(
            fm.write(&id, "link/pwned.txt", b"x").await,
            Err(FileError::Sandbox(SandboxError::PathTraversal(_)))
        ));
        assert!(!outside.join("pwned.txt").exists());
    }

    #[tokio::test]
    async fn test_dangling_symlink_write_rejected() {
        let (tmp, fm, id) = setup();
        let outside = tmp.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(outside.join("pwned.txt"), tmp.path().join(UUID).join("evil"))
            .unwrap();

        assert!(matches!(
            fm.write(&id, "evil", b"owned").await,
            Err(FileError::Sandbox(SandboxError::PathTraversal(_)))
        ));
        assert!(!outside.join("pwned.txt").exists());
    }

    #[tokio::test]
    async fn test_upload_uses_basename() {
        let (tmp, fm, id) = setup();
        let stored = fm
            .upload(&id, "/plugins", "../../../etc/evil.jar", b"jar")
            .await
            .unwrap();
        assert_eq!(stored, "/plugins/evil.jar");
        assert!(tmp.path().join(UUID).join("plugins/evil.jar").exists());
    }

    #[tokio::test]
    async fn test_unknown_tenant_not_found() {
        let (_tmp, fm, _) = setup();
        let other = ServiceId::parse("650e8400-e29b-41d4-a716-446655440000").unwrap();
        assert!(matches!(fm.list(&other, "/").await, Err(FileError::NotFound(_))));
    }
}
