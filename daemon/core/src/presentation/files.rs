// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Sandboxed file handlers under `/api/servers/{uuid}/files`.

use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::application::file_manager::FileEntry;
use crate::presentation::api::AppState;
use crate::presentation::error::ApiError;
use crate::presentation::extract::ApiJson;
use crate::presentation::servers::service_id;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: Option<String>,
}

impl PathQuery {
    fn path_or_root(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub path: String,
}

pub async fn list_directory(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let id = service_id(&uuid)?;
    Ok(Json(state.files.list(&id, query.path_or_root()).await?))
}

pub async fn file_content(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let id = service_id(&uuid)?;
    let path = query
        .path
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("path is required"))?;
    let content = state.files.read(&id, path).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], content))
}

pub async fn write_file(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<PathQuery>,
    ApiJson(payload): ApiJson<WriteFileRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = service_id(&uuid)?;
    let path = payload
        .path
        .filter(|p| !p.is_empty())
        .or(query.path)
        .ok_or_else(|| ApiError::bad_request("path is required"))?;

    state
        .files
        .write(&id, &path, payload.content.as_bytes())
        .await?;
    Ok(Json(json!({ "status": "saved" })))
}

pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    ApiJson(payload): ApiJson<CreateFolderRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = service_id(&uuid)?;
    state.files.create_folder(&id, &payload.path).await?;
    Ok(Json(json!({ "status": "created" })))
}

pub async fn delete_path(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = service_id(&uuid)?;
    // A missing path means the root, which is refused
    let path = query.path.unwrap_or_default();
    state.files.delete(&id, &path).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<PathQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = service_id(&uuid)?;
    let mut multipart = multipart?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("Upload is missing a filename"))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;

        let stored = state
            .files
            .upload(&id, query.path_or_root(), &filename, &data)
            .await?;
        return Ok(Json(json!({ "status": "uploaded", "path": stored })));
    }

    Err(ApiError::bad_request("Missing multipart field 'file'"))
}
