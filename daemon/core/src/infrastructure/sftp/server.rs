// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! SSH Server
//!
//! russh server accepting password logins only. Credentials go through the
//! [`SftpAuthenticator`] strategy chain; the resulting service id pins the
//! session to that service's data directory.

use russh::server::{Auth, Msg, Server as _, Session};
use russh::{Channel, ChannelId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::host_key;
use super::session::TenantSftpSession;
use crate::domain::path_sanitizer::TenantSandbox;
use crate::domain::service::ServiceId;
use crate::domain::sftp_auth::SftpAuthenticator;

/// Listener side of the SFTP gateway.
#[derive(Clone)]
pub struct SftpGateway {
    authenticator: Arc<SftpAuthenticator>,
    sandbox: TenantSandbox,
}

impl SftpGateway {
    pub fn new(authenticator: Arc<SftpAuthenticator>, sandbox: TenantSandbox) -> Self {
        Self {
            authenticator,
            sandbox,
        }
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn serve(
        mut self,
        bind_addr: &str,
        port: u16,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let key_path = host_key::host_key_path(self.sandbox.data_root());
        let key = host_key::load_or_generate(&key_path).await?;

        let config = russh::server::Config {
            auth_rejection_time: Duration::from_secs(3),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            inactivity_timeout: Some(Duration::from_secs(3600)),
            keys: vec![key],
            ..Default::default()
        };

        tracing::info!(addr = %bind_addr, port, "SFTP gateway listening");
        tokio::select! {
            result = self.run_on_address(Arc::new(config), (bind_addr, port)) => {
                result.map_err(|e| anyhow::anyhow!("SFTP server failed: {}", e))
            }
            _ = shutdown.cancelled() => {
                tracing::info!("SFTP gateway stopped");
                Ok(())
            }
        }
    }
}

impl russh::server::Server for SftpGateway {
    type Handler = SshSession;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> Self::Handler {
        SshSession {
            peer,
            authenticator: self.authenticator.clone(),
            sandbox: self.sandbox.clone(),
            service: None,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        tracing::debug!(error = %error, "SFTP session ended with error");
    }
}

pub struct SshSession {
    peer: Option<SocketAddr>,
    authenticator: Arc<SftpAuthenticator>,
    sandbox: TenantSandbox,
    service: Option<ServiceId>,
    channels: Arc<Mutex<HashMap<ChannelId, Channel<Msg>>>>,
}

impl SshSession {
    async fn take_channel(&self, channel_id: ChannelId) -> Option<Channel<Msg>> {
        self.channels.lock().await.remove(&channel_id)
    }
}

impl russh::server::Handler for SshSession {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        match self.authenticator.authenticate(user, password).await {
            Some(service) => {
                tracing::info!(peer = ?self.peer, user = %user, service = %service, "SFTP session authenticated");
                self.service = Some(service);
                Ok(Auth::Accept)
            }
            None => Ok(Auth::reject()),
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.lock().await.insert(channel.id(), channel);
        Ok(true)
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.close(channel)?;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let service = match (&self.service, name) {
            (Some(service), "sftp") => service.clone(),
            _ => {
                session.channel_failure(channel_id)?;
                return Ok(());
            }
        };
        let Some(channel) = self.take_channel(channel_id).await else {
            session.channel_failure(channel_id)?;
            return Ok(());
        };

        let handler = TenantSftpSession::new(service, self.sandbox.clone());
        session.channel_success(channel_id)?;
        russh_sftp::server::run(channel.into_stream(), handler).await;
        Ok(())
    }
}
