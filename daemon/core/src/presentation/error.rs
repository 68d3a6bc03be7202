// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! HTTP error responses. Every failure is `{"error": .., "details"?: ..}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::application::file_manager::FileError;
use crate::application::lifecycle::LifecycleError;
use crate::domain::path_sanitizer::SandboxError;
use crate::domain::service::ServiceModelError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn internal(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.error,
            details: self.details.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceModelError> for ApiError {
    fn from(e: ServiceModelError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

impl From<SandboxError> for ApiError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::PathTraversal(_) => {
                warn!(error = %e, "Rejected path outside server directory");
                ApiError::new(StatusCode::FORBIDDEN, e.to_string())
            }
            SandboxError::RootDirectory
            | SandboxError::InvalidPath(_)
            | SandboxError::PathTooLong(_) => ApiError::bad_request(e.to_string()),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::NotFound(_) => ApiError::not_found(e.to_string()),
            LifecycleError::Installing(_) | LifecycleError::Conflict(_) => {
                ApiError::new(StatusCode::CONFLICT, e.to_string())
            }
            LifecycleError::InvalidRequest(msg) => ApiError::bad_request(msg),
            LifecycleError::Runtime(inner) => {
                error!(error = %inner, "Container runtime call failed");
                ApiError::internal("Container runtime error", inner.to_string())
            }
            LifecycleError::Storage(inner) => {
                error!(error = %inner, "Storage operation failed");
                ApiError::internal("Storage error", inner.to_string())
            }
        }
    }
}

impl From<FileError> for ApiError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Sandbox(inner) => inner.into(),
            FileError::NotFound(_) => ApiError::not_found(e.to_string()),
            FileError::InvalidRequest(msg) => ApiError::bad_request(msg),
            FileError::Io(msg) => {
                error!(error = %msg, "File operation failed");
                ApiError::internal("File operation failed", msg)
            }
        }
    }
}
