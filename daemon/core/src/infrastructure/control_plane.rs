// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Control Plane HTTP Client
//!
//! reqwest implementation of [`ControlPlane`] against the core's internal API.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Outbound status, heartbeat and SFTP validation calls
//! - **Integration:** Lifecycle service → this client → `{core}/api/v1/internal/*`

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::domain::control_plane::{
    ControlPlane, ControlPlaneError, HeartbeatReport, NodeHealth, NodeStats, SftpValidation,
    StatusUpdate,
};
use crate::domain::node_config::NodeToken;
use crate::domain::service::ServiceId;

pub const NODE_TOKEN_HEADER: &str = "X-Node-Token";

// ============================================================================
// Wire bodies
// ============================================================================

#[derive(Serialize)]
struct StatusBody<'a> {
    token: &'a str,
    #[serde(flatten)]
    update: &'a StatusUpdate,
}

#[derive(Serialize)]
struct HeartbeatBody<'a> {
    token: &'a str,
    stats: &'a NodeStats,
    health: &'a NodeHealth,
}

#[derive(Serialize)]
struct SftpValidateBody<'a> {
    username: &'a str,
    password: &'a str,
}

// ============================================================================
// Client Implementation
// ============================================================================

pub struct HttpControlPlane {
    base_url: String,
    token: NodeToken,
    client: Client,
}

impl HttpControlPlane {
    pub fn new(
        base_url: impl Into<String>,
        token: NodeToken,
        timeout: Duration,
    ) -> Result<Self, ControlPlaneError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlPlaneError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/internal/{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ControlPlaneError> {
        let response = self
            .client
            .post(self.url(path))
            .header(NODE_TOKEN_HEADER, self.token.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControlPlaneError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn notify_status(
        &self,
        id: &ServiceId,
        update: &StatusUpdate,
    ) -> Result<(), ControlPlaneError> {
        let body = StatusBody {
            token: self.token.expose(),
            update,
        };
        self.post(&format!("services/{}/status", id), &body).await?;
        tracing::debug!(service = %id, status = %update.status, "Reported status");
        Ok(())
    }

    async fn heartbeat(&self, report: &HeartbeatReport) -> Result<(), ControlPlaneError> {
        let body = HeartbeatBody {
            token: self.token.expose(),
            stats: &report.stats,
            health: &report.health,
        };
        self.post("heartbeat", &body).await?;
        Ok(())
    }

    async fn validate_sftp(
        &self,
        username: &str,
        password: &str,
    ) -> Result<SftpValidation, ControlPlaneError> {
        let body = SftpValidateBody { username, password };
        self.post("sftp/validate", &body)
            .await?
            .json::<SftpValidation>()
            .await
            .map_err(|e| ControlPlaneError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::control_plane::MonitorHealth;
    use crate::domain::service::ServiceStatus;
    use mockito::Matcher;

    const UUID: &str = "550e8400-e29b-41d4-a716-446655440000";

    fn client(url: &str) -> HttpControlPlane {
        HttpControlPlane::new(url, NodeToken::new("node-secret"), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_notify_status_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", format!("/api/v1/internal/services/{}/status", UUID).as_str())
            .match_header("x-node-token", "node-secret")
            .match_body(Matcher::Json(serde_json::json!({
                "token": "node-secret",
                "status": "installing",
                "stage": "pulling_image",
                "progress": 10
            })))
            .with_status(200)
            .create_async()
            .await;

        let update = StatusUpdate::new(ServiceStatus::Installing).with_stage("pulling_image", 10);
        client(&server.url())
            .notify_status(&ServiceId::parse(UUID).unwrap(), &update)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_heartbeat_carries_health() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/internal/heartbeat")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "token": "node-secret",
                "health": {"event_monitor": "degraded"}
            })))
            .with_status(200)
            .create_async()
            .await;

        let report = HeartbeatReport {
            stats: NodeStats {
                cpu: 12.5,
                ram: 2048.0,
                ram_total: 8192.0,
                disk_free: None,
            },
            health: NodeHealth {
                event_monitor: MonitorHealth::Degraded,
            },
        };
        client(&server.url()).heartbeat(&report).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_validate_sftp_parses_answer() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/internal/sftp/validate")
            .match_body(Matcher::Json(serde_json::json!({
                "username": "alice.1a2b3c",
                "password": "pw"
            })))
            .with_status(200)
            .with_body(format!(r#"{{"valid":true,"service_uuid":"{}"}}"#, UUID))
            .create_async()
            .await;

        let answer = client(&server.url())
            .validate_sftp("alice.1a2b3c", "pw")
            .await
            .unwrap();
        assert!(answer.valid);
        assert_eq!(answer.service_uuid.as_deref(), Some(UUID));
    }

    #[tokio::test]
    async fn test_non_success_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/internal/heartbeat")
            .with_status(401)
            .with_body("bad token")
            .create_async()
            .await;

        let report = HeartbeatReport {
            stats: NodeStats::default(),
            health: NodeHealth {
                event_monitor: MonitorHealth::Healthy,
            },
        };
        let err = client(&server.url()).heartbeat(&report).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Rejected { status: 401, .. }));
    }
}
