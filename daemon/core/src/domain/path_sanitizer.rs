// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Path Sanitizer Domain Service
//!
//! Resolves tenant-relative paths onto `<data_root>/<service uuid>` and makes
//! sure nothing ever resolves outside that directory. Every file operation on
//! the HTTP surface and in the SFTP gateway goes through [`TenantSandbox`].
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Multi-tenant filesystem isolation

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::domain::service::ServiceId;

/// Path sanitization errors
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path too long: {0}")]
    PathTooLong(String),

    #[error("Refusing to operate on the server root directory")]
    RootDirectory,
}

/// Dangling links followed before giving up.
const MAX_LINK_DEPTH: usize = 8;

/// Tenant path sandbox
///
/// # Security Guarantees
/// - Relative paths are cleaned as if rooted at `/`, so `..` is clamped at the
///   tenant root instead of climbing out of it
/// - `\` is treated as a separator
/// - NUL bytes are rejected
/// - [`TenantSandbox::check_symlinks`] rejects paths whose nearest existing
///   ancestor canonicalizes outside the tenant root, including through a
///   dangling link
#[derive(Debug, Clone)]
pub struct TenantSandbox {
    data_root: PathBuf,
    max_path_len: usize,
}

impl TenantSandbox {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            max_path_len: 4096,
        }
    }

    pub fn with_max_length(mut self, max_path_len: usize) -> Self {
        self.max_path_len = max_path_len;
        self
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn tenant_root(&self, id: &ServiceId) -> PathBuf {
        self.data_root.join(id.as_str())
    }

    /// Clean `relative` into a tenant-relative path with no `.`/`..` parts.
    /// An empty result means the tenant root itself.
    pub fn normalize(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        if relative.len() > self.max_path_len {
            return Err(SandboxError::PathTooLong(relative.to_string()));
        }
        if relative.contains('\0') {
            tracing::warn!(path = %relative.escape_debug(), "Path contains null byte");
            return Err(SandboxError::InvalidPath(
                "Path contains null byte".to_string(),
            ));
        }

        let unified = relative.replace('\\', "/");
        let rooted = PathBuf::from(format!("/{}", unified));

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        let mut clamped = false;
        for component in rooted.components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        clamped = true;
                    }
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }

        if clamped {
            tracing::warn!(
                path = %relative,
                "Path traversal attempt clamped at tenant root"
            );
        }

        Ok(parts.iter().collect())
    }

    /// Resolve a tenant-relative path to an absolute path inside the tenant root.
    pub fn resolve(&self, id: &ServiceId, relative: &str) -> Result<PathBuf, SandboxError> {
        let root = self.tenant_root(id);
        let normalized = self.normalize(relative)?;
        let absolute = root.join(&normalized);

        if !absolute.starts_with(&root) {
            tracing::warn!(
                service = %id,
                path = %relative,
                "Path outside tenant root detected"
            );
            return Err(SandboxError::PathTraversal(relative.to_string()));
        }

        Ok(absolute)
    }

    /// Like [`TenantSandbox::resolve`] but refuses anything that names the
    /// tenant root itself. Used for deletes.
    pub fn resolve_non_root(
        &self,
        id: &ServiceId,
        relative: &str,
    ) -> Result<PathBuf, SandboxError> {
        if self.normalize(relative)?.as_os_str().is_empty() {
            return Err(SandboxError::RootDirectory);
        }
        self.resolve(id, relative)
    }

    /// Reject `path` if its nearest existing ancestor is a symlink chain that
    /// lands outside the tenant root. Dangling links are followed by hand,
    /// since a create through them would land on their target. A tenant root
    /// that does not exist yet passes trivially.
    pub fn check_symlinks(&self, id: &ServiceId, path: &Path) -> Result<(), SandboxError> {
        let root = self.tenant_root(id);
        let canonical_root = match std::fs::canonicalize(&root) {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        self.check_within(id, path, path, &canonical_root, 0)
    }

    fn check_within(
        &self,
        id: &ServiceId,
        original: &Path,
        path: &Path,
        canonical_root: &Path,
        depth: usize,
    ) -> Result<(), SandboxError> {
        let mut candidate = Some(path);
        while let Some(current) = candidate {
            if let Ok(real) = std::fs::canonicalize(current) {
                if real.starts_with(canonical_root) {
                    return Ok(());
                }
                return Err(Self::escape(id, original, &real));
            }

            // canonicalize fails on a dangling link
            let is_link = std::fs::symlink_metadata(current)
                .map(|meta| meta.file_type().is_symlink())
                .unwrap_or(false);
            if is_link {
                let target = std::fs::read_link(current)
                    .map_err(|e| SandboxError::InvalidPath(format!("{}: {}", current.display(), e)))?;
                // `..` after a link cannot be resolved lexically
                if depth >= MAX_LINK_DEPTH
                    || target.components().any(|c| c == Component::ParentDir)
                {
                    return Err(Self::escape(id, original, &target));
                }
                let target = match current.parent() {
                    Some(parent) if target.is_relative() => parent.join(&target),
                    _ => target,
                };
                return self.check_within(id, original, &target, canonical_root, depth + 1);
            }

            candidate = current.parent();
        }

        Ok(())
    }

    fn escape(id: &ServiceId, original: &Path, resolved: &Path) -> SandboxError {
        tracing::warn!(
            service = %id,
            path = %original.display(),
            resolved = %resolved.display(),
            "Symlink escape from tenant root detected"
        );
        SandboxError::PathTraversal(original.display().to_string())
    }

    /// Strip the tenant root from an absolute path, yielding a `/`-rooted
    /// display path for clients.
    pub fn display_path(&self, id: &ServiceId, absolute: &Path) -> Result<String, SandboxError> {
        let root = self.tenant_root(id);
        absolute
            .strip_prefix(&root)
            .map(|p| format!("/{}", p.display()))
            .map_err(|_| SandboxError::PathTraversal(absolute.display().to_string()))
    }
}
