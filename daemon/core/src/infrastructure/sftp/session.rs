// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Chrooted SFTP request handler.
//!
//! Client paths are interpreted relative to the service's data directory,
//! which the client sees as `/`. Every path goes through the tenant sandbox
//! and the symlink check before touching the filesystem.

use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::domain::path_sanitizer::{SandboxError, TenantSandbox};
use crate::domain::service::ServiceId;

/// Largest READ served in one reply; clients ask again for the rest.
const MAX_READ_LEN: u32 = 256 * 1024;

fn io_status(e: std::io::Error) -> StatusCode {
    match e.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

fn ok_status(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

struct DirListing {
    entries: Vec<File>,
    sent: bool,
}

pub struct TenantSftpSession {
    service: ServiceId,
    sandbox: TenantSandbox,
    version: Option<u32>,
    next_handle: u64,
    files: HashMap<String, tokio::fs::File>,
    dirs: HashMap<String, DirListing>,
}

impl TenantSftpSession {
    pub fn new(service: ServiceId, sandbox: TenantSandbox) -> Self {
        Self {
            service,
            sandbox,
            version: None,
            next_handle: 0,
            files: HashMap::new(),
            dirs: HashMap::new(),
        }
    }

    fn allocate_handle(&mut self) -> String {
        self.next_handle += 1;
        format!("h{}", self.next_handle)
    }

    fn sandbox_status(&self, path: &str, error: SandboxError) -> StatusCode {
        tracing::warn!(service = %self.service, path = %path, error = %error, "SFTP path rejected");
        StatusCode::PermissionDenied
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StatusCode> {
        let absolute = self
            .sandbox
            .resolve(&self.service, path)
            .map_err(|e| self.sandbox_status(path, e))?;
        self.sandbox
            .check_symlinks(&self.service, &absolute)
            .map_err(|e| self.sandbox_status(path, e))?;
        Ok(absolute)
    }

    /// For operations that must never target the data directory itself.
    fn resolve_entry(&self, path: &str) -> Result<PathBuf, StatusCode> {
        let absolute = self
            .sandbox
            .resolve_non_root(&self.service, path)
            .map_err(|e| self.sandbox_status(path, e))?;
        self.sandbox
            .check_symlinks(&self.service, &absolute)
            .map_err(|e| self.sandbox_status(path, e))?;
        Ok(absolute)
    }

    async fn list_dir(path: PathBuf) -> Result<Vec<File>, StatusCode> {
        let mut entries = tokio::fs::read_dir(&path).await.map_err(io_status)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_status)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let attrs = match tokio::fs::symlink_metadata(entry.path()).await {
                Ok(meta) => FileAttributes::from(&meta),
                Err(_) => FileAttributes::default(),
            };
            files.push(File::new(name, attrs));
        }
        Ok(files)
    }
}

impl russh_sftp::server::Handler for TenantSftpSession {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        if self.version.is_some() {
            tracing::error!(service = %self.service, "Duplicate SFTP init packet");
            return Err(StatusCode::ConnectionLost);
        }
        self.version = Some(version);
        Ok(Version::new())
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let normalized = self
            .sandbox
            .normalize(&path)
            .map_err(|e| self.sandbox_status(&path, e))?;
        let display = format!("/{}", normalized.display());
        Ok(Name {
            id,
            files: vec![File::dummy(display)],
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let absolute = self.resolve(&path)?;
        let meta = tokio::fs::metadata(&absolute).await.map_err(io_status)?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&meta),
        })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let absolute = self.resolve(&path)?;
        let meta = tokio::fs::symlink_metadata(&absolute)
            .await
            .map_err(io_status)?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&meta),
        })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let file = self.files.get(&handle).ok_or(StatusCode::Failure)?;
        let meta = file.metadata().await.map_err(io_status)?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&meta),
        })
    }

    async fn setstat(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        // Ownership and modes inside the data directory are managed by the node.
        self.resolve(&path)?;
        Ok(ok_status(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let absolute = self.resolve(&path)?;
        let entries = Self::list_dir(absolute).await?;
        let handle = self.allocate_handle();
        self.dirs.insert(
            handle.clone(),
            DirListing {
                entries,
                sent: false,
            },
        );
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        let listing = self.dirs.get_mut(&handle).ok_or(StatusCode::Failure)?;
        if listing.sent {
            return Err(StatusCode::Eof);
        }
        listing.sent = true;
        Ok(Name {
            id,
            files: std::mem::take(&mut listing.entries),
        })
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let absolute = self.resolve_entry(&filename)?;
        let options = tokio::fs::OpenOptions::from(std::fs::OpenOptions::from(pflags));
        let file = options.open(&absolute).await.map_err(io_status)?;
        let handle = self.allocate_handle();
        self.files.insert(handle.clone(), file);
        Ok(Handle { id, handle })
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let file = self.files.get_mut(&handle).ok_or(StatusCode::Failure)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(io_status)?;

        let mut data = vec![0u8; len.min(MAX_READ_LEN) as usize];
        let mut filled = 0;
        while filled < data.len() {
            let n = file.read(&mut data[filled..]).await.map_err(io_status)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(filled);
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let file = self.files.get_mut(&handle).ok_or(StatusCode::Failure)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(io_status)?;
        file.write_all(&data).await.map_err(io_status)?;
        Ok(ok_status(id))
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        if let Some(mut file) = self.files.remove(&handle) {
            file.flush().await.map_err(io_status)?;
        } else {
            self.dirs.remove(&handle);
        }
        Ok(ok_status(id))
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        let absolute = self.resolve_entry(&path)?;
        tokio::fs::create_dir(&absolute).await.map_err(io_status)?;
        Ok(ok_status(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        let absolute = self.resolve_entry(&path)?;
        tokio::fs::remove_dir(&absolute).await.map_err(io_status)?;
        Ok(ok_status(id))
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        let absolute = self.resolve_entry(&filename)?;
        tokio::fs::remove_file(&absolute).await.map_err(io_status)?;
        Ok(ok_status(id))
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        let from = self.resolve_entry(&oldpath)?;
        let to = self.resolve_entry(&newpath)?;
        tokio::fs::rename(&from, &to).await.map_err(io_status)?;
        Ok(ok_status(id))
    }
}
