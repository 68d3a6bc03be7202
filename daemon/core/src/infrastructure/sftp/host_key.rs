// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

use russh::keys::ssh_key::private::{KeypairData, RsaKeypair};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::LineEnding;
use russh::keys::PrivateKey;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HOST_KEY_FILE: &str = ".ssh_host_key";
const HOST_KEY_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum HostKeyError {
    #[error("failed to generate host key: {0}")]
    Generate(String),

    #[error("host key I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },
}

pub fn host_key_path(data_root: &Path) -> PathBuf {
    data_root.join(HOST_KEY_FILE)
}

/// Load the persisted host key, generating and saving a new RSA key if the
/// file is missing or does not parse.
pub async fn load_or_generate(path: &Path) -> Result<PrivateKey, HostKeyError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match PrivateKey::from_openssh(&bytes) {
            Ok(key) => {
                tracing::info!(path = %path.display(), "Loaded SFTP host key");
                return Ok(key);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Host key unparsable, regenerating");
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(HostKeyError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    }

    let key = tokio::task::spawn_blocking(generate)
        .await
        .map_err(|e| HostKeyError::Generate(e.to_string()))??;
    persist(path, &key).await?;
    tracing::info!(path = %path.display(), "Generated new SFTP host key");
    Ok(key)
}

fn generate() -> Result<PrivateKey, HostKeyError> {
    let keypair = RsaKeypair::random(&mut OsRng, HOST_KEY_BITS)
        .map_err(|e| HostKeyError::Generate(e.to_string()))?;
    PrivateKey::new(KeypairData::from(keypair), "atlas-daemon")
        .map_err(|e| HostKeyError::Generate(e.to_string()))
}

async fn persist(path: &Path, key: &PrivateKey) -> Result<(), HostKeyError> {
    use std::os::unix::fs::PermissionsExt;

    let io_err = |e: std::io::Error| HostKeyError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let encoded = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| HostKeyError::Generate(e.to_string()))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, encoded.as_bytes()).await.map_err(io_err)?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(io_err)
}
