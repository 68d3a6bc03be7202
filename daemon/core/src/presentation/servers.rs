// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Server lifecycle handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::application::lifecycle::ServerStatusReport;
use crate::domain::service::{
    CreateServiceSpec, Environment, InstallPlan, PowerAction, ResourceLimits, ScriptRefresh,
    ServiceId, ServiceModelError, UpdateServiceSpec,
};
use crate::presentation::api::AppState;
use crate::presentation::error::ApiError;
use crate::presentation::extract::ApiJson;

pub(crate) fn service_id(raw: &str) -> Result<ServiceId, ApiError> {
    ServiceId::parse(raw).map_err(ApiError::from)
}

/// `environment` arrives as a JSON object encoded in a string; a bare
/// object is accepted too.
fn parse_environment(raw: Option<&serde_json::Value>) -> Result<Environment, ServiceModelError> {
    match raw {
        None | Some(serde_json::Value::Null) => Ok(Environment::new()),
        Some(serde_json::Value::String(s)) => Environment::from_json_str(s),
        Some(obj @ serde_json::Value::Object(_)) => Environment::from_json_str(&obj.to_string()),
        Some(other) => Err(ServiceModelError::InvalidEnvironment(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub uuid: String,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub disk: u64,
    #[serde(default)]
    pub cpu: u64,
    pub port: u16,
    pub egg_image: String,
    #[serde(default)]
    pub startup_command: String,
    #[serde(default)]
    pub environment: Option<serde_json::Value>,
    #[serde(default)]
    pub install_script: String,
    #[serde(default)]
    pub install_container: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServerRequest {
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub disk: u64,
    #[serde(default)]
    pub cpu: u64,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub startup_command: Option<String>,
    #[serde(default)]
    pub environment: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PowerRequest {
    pub action: String,
    #[serde(default)]
    pub startup_command: Option<String>,
    #[serde(default)]
    pub environment: Option<serde_json::Value>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub memory: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct ReinstallRequest {
    #[serde(default)]
    pub install_script: String,
    #[serde(default)]
    pub install_container: Option<String>,
    #[serde(default)]
    pub environment: Option<serde_json::Value>,
}

pub async fn create_server(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CreateServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = service_id(&payload.uuid)?;
    if payload.egg_image.trim().is_empty() {
        return Err(ApiError::bad_request("egg_image is required"));
    }
    let environment = parse_environment(payload.environment.as_ref())?;

    let install = InstallPlan::from_parts(
        payload.install_container.as_deref(),
        &payload.install_script,
        environment.clone(),
        &state.lifecycle.settings().default_install_image,
    );

    let spec = CreateServiceSpec {
        id,
        limits: ResourceLimits::new(payload.memory, payload.disk, payload.cpu)?,
        port: payload.port,
        image: payload.egg_image,
        startup_command: payload.startup_command,
        environment,
        install,
    };

    let container_id = state.lifecycle.create(spec).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "container_id": container_id })),
    ))
}

pub async fn update_server(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    ApiJson(payload): ApiJson<UpdateServerRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = service_id(&uuid)?;
    let spec = UpdateServiceSpec {
        limits: ResourceLimits::new(payload.memory, payload.disk, payload.cpu)?,
        port: payload.port,
        image: non_empty(payload.docker_image),
        startup_command: non_empty(payload.startup_command),
        environment: parse_environment(payload.environment.as_ref())?,
    };

    state.lifecycle.update(&id, spec).await?;
    Ok(Json(json!({ "status": "updated" })))
}

pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = service_id(&uuid)?;
    state.lifecycle.delete(&id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

pub async fn power_server(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    ApiJson(payload): ApiJson<PowerRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = service_id(&uuid)?;
    let action: PowerAction = payload.action.parse()?;

    let refresh = match non_empty(payload.startup_command) {
        Some(startup_command) => Some(ScriptRefresh {
            startup_command,
            environment: parse_environment(payload.environment.as_ref())?,
            port: payload.port.unwrap_or_default(),
            memory_mb: payload.memory.unwrap_or_default(),
        }),
        None => None,
    };

    state.lifecycle.power(&id, action, refresh).await?;
    Ok(Json(json!({ "status": "success" })))
}

pub async fn send_command(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    ApiJson(payload): ApiJson<CommandRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = service_id(&uuid)?;
    state.lifecycle.send_command(&id, &payload.command).await?;
    Ok(Json(json!({ "status": "sent" })))
}

pub async fn reinstall_server(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    ApiJson(payload): ApiJson<ReinstallRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = service_id(&uuid)?;
    let environment = parse_environment(payload.environment.as_ref())?;
    let plan = InstallPlan::from_parts(
        payload.install_container.as_deref(),
        &payload.install_script,
        environment,
        &state.lifecycle.settings().default_install_image,
    )
    .ok_or_else(|| ApiError::bad_request("install_script is required"))?;

    state.lifecycle.reinstall(&id, plan).await?;
    Ok(Json(json!({ "status": "reinstall_triggered" })))
}

pub async fn server_stats(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = service_id(&uuid)?;
    let snapshot = state.lifecycle.stats(&id).await?;
    Ok(Json(snapshot.to_json()))
}

pub async fn server_status(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<ServerStatusReport>, ApiError> {
    let id = service_id(&uuid)?;
    Ok(Json(state.lifecycle.server_status(&id).await?))
}
