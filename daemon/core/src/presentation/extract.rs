// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Request extractors whose rejections use the JSON error body.
//!
//! `Result<Multipart, MultipartRejection>` in a handler goes through the
//! conversion below as well.

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, FromRequest, Request,
    },
    Json,
};
use serde::de::DeserializeOwned;

use crate::presentation::error::ApiError;

/// `Json<T>` with an [`ApiError`] rejection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let mut error = ApiError::bad_request("Invalid request body");
        error.details = Some(rejection.body_text());
        error
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        let mut error = ApiError::bad_request("Invalid multipart body");
        error.details = Some(rejection.body_text());
        error
    }
}
