// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! SFTP Authentication Strategies
//!
//! An ordered list of strategies decides whether a username/password pair may
//! open an SFTP session and, if so, which service directory it is confined to.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Credential to tenant mapping for the SFTP gateway

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::control_plane::ControlPlane;
use crate::domain::node_config::NodeToken;
use crate::domain::path_sanitizer::TenantSandbox;
use crate::domain::service::ServiceId;

/// Username prefix of node-token logins: `service_<uuid>`.
pub const LEGACY_USERNAME_PREFIX: &str = "service_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Granted(ServiceId),
    /// Stop evaluating; the credentials are definitely wrong.
    Rejected,
    /// This strategy does not apply; ask the next one.
    Continue,
}

#[async_trait]
pub trait SftpAuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, username: &str, password: &str) -> AuthDecision;
}

/// Asks the control plane, then requires the service to live on this node.
pub struct DelegatedAuth {
    validator: Arc<dyn ControlPlane>,
    sandbox: TenantSandbox,
}

impl DelegatedAuth {
    pub fn new(validator: Arc<dyn ControlPlane>, sandbox: TenantSandbox) -> Self {
        Self { validator, sandbox }
    }
}

#[async_trait]
impl SftpAuthStrategy for DelegatedAuth {
    fn name(&self) -> &'static str {
        "control_plane"
    }

    async fn evaluate(&self, username: &str, password: &str) -> AuthDecision {
        let answer = match self.validator.validate_sftp(username, password).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(user = %username, error = %e, "SFTP validation call failed");
                return AuthDecision::Continue;
            }
        };

        if !answer.valid {
            return AuthDecision::Continue;
        }

        let Some(id) = answer
            .service_uuid
            .as_deref()
            .and_then(|raw| ServiceId::parse(raw).ok())
        else {
            tracing::warn!(user = %username, "Control plane accepted SFTP login without a usable service uuid");
            return AuthDecision::Continue;
        };

        if !self.sandbox.tenant_root(&id).is_dir() {
            tracing::warn!(user = %username, service = %id, "SFTP login for a service not hosted on this node");
            return AuthDecision::Continue;
        }

        AuthDecision::Granted(id)
    }
}

/// `service_<uuid>` authenticated by the node token itself. The service must
/// have a data directory on this node.
pub struct LegacyTokenAuth {
    token: NodeToken,
    sandbox: TenantSandbox,
}

impl LegacyTokenAuth {
    pub fn new(token: NodeToken, sandbox: TenantSandbox) -> Self {
        Self { token, sandbox }
    }

    pub fn decide(&self, username: &str, password: &str) -> AuthDecision {
        let Some(raw) = username.strip_prefix(LEGACY_USERNAME_PREFIX) else {
            return AuthDecision::Continue;
        };
        let Ok(id) = ServiceId::parse(raw) else {
            return AuthDecision::Rejected;
        };
        if !self.token.matches(password) {
            return AuthDecision::Rejected;
        }
        if !self.sandbox.tenant_root(&id).is_dir() {
            tracing::warn!(user = %username, service = %id, "SFTP login for a service not hosted on this node");
            return AuthDecision::Rejected;
        }
        AuthDecision::Granted(id)
    }
}

#[async_trait]
impl SftpAuthStrategy for LegacyTokenAuth {
    fn name(&self) -> &'static str {
        "node_token"
    }

    async fn evaluate(&self, username: &str, password: &str) -> AuthDecision {
        self.decide(username, password)
    }
}

/// Runs strategies in order; the first decisive answer wins.
#[derive(Clone)]
pub struct SftpAuthenticator {
    strategies: Vec<Arc<dyn SftpAuthStrategy>>,
}

impl SftpAuthenticator {
    pub fn new(strategies: Vec<Arc<dyn SftpAuthStrategy>>) -> Self {
        Self { strategies }
    }

    /// Control plane delegation first, node token fallback second.
    pub fn standard(
        validator: Arc<dyn ControlPlane>,
        sandbox: TenantSandbox,
        token: NodeToken,
    ) -> Self {
        Self::new(vec![
            Arc::new(DelegatedAuth::new(validator, sandbox.clone())),
            Arc::new(LegacyTokenAuth::new(token, sandbox)),
        ])
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Option<ServiceId> {
        for strategy in &self.strategies {
            match strategy.evaluate(username, password).await {
                AuthDecision::Granted(id) => {
                    tracing::info!(user = %username, service = %id, strategy = strategy.name(), "SFTP login granted");
                    return Some(id);
                }
                AuthDecision::Rejected => {
                    tracing::warn!(user = %username, strategy = strategy.name(), "SFTP login rejected");
                    return None;
                }
                AuthDecision::Continue => {}
            }
        }
        tracing::warn!(user = %username, "SFTP login rejected: no strategy accepted credentials");
        None
    }
}
