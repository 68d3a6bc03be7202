// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Router assembly and node-token authentication.

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::application::file_manager::FileManager;
use crate::application::lifecycle::ServerLifecycleService;
use crate::domain::node_config::NodeToken;
use crate::presentation::error::ApiError;
use crate::presentation::{console, files, servers};

pub const NODE_TOKEN_HEADER: &str = "x-node-token";

/// Uploads carry plugin jars and world archives, well above axum's 2 MB default.
const UPLOAD_LIMIT_BYTES: usize = 512 * 1024 * 1024;

pub struct AppState {
    pub lifecycle: Arc<ServerLifecycleService>,
    pub files: Arc<FileManager>,
    pub node_token: NodeToken,
}

pub fn app(state: Arc<AppState>, cors_allowed_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/api/servers", post(servers::create_server))
        .route(
            "/api/servers/{uuid}",
            get(servers::server_status)
                .put(servers::update_server)
                .delete(servers::delete_server),
        )
        .route("/api/servers/{uuid}/power", post(servers::power_server))
        .route("/api/servers/{uuid}/command", post(servers::send_command))
        .route("/api/servers/{uuid}/reinstall", post(servers::reinstall_server))
        .route("/api/servers/{uuid}/stats", get(servers::server_stats))
        .route("/api/servers/{uuid}/console", get(console::console_ws))
        .route("/api/servers/{uuid}/files", delete(files::delete_path))
        .route("/api/servers/{uuid}/files/list", get(files::list_directory))
        .route("/api/servers/{uuid}/files/content", get(files::file_content))
        .route("/api/servers/{uuid}/files/write", post(files::write_file))
        .route(
            "/api/servers/{uuid}/files/create-folder",
            post(files::create_folder),
        )
        .route(
            "/api/servers/{uuid}/files/upload",
            post(files::upload_file).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_node_token,
        ));

    Router::new()
        .route("/status", get(status_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            HeaderName::from_static(NODE_TOKEN_HEADER),
        ])
}

async fn status_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "online",
        "system": "Atlas Daemon",
    }))
}

/// Browsers cannot set headers on a websocket handshake, so the console
/// route also accepts `?token=`.
fn presented_token(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(NODE_TOKEN_HEADER) {
        return value.to_str().ok().map(str::to_string);
    }
    if !request.uri().path().ends_with("/console") {
        return None;
    }
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}

async fn require_node_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    match presented_token(&request) {
        Some(token) if state.node_token.matches(&token) => next.run(request).await,
        presented => {
            debug!(
                path = %request.uri().path(),
                token_present = presented.is_some(),
                "Rejected unauthenticated request"
            );
            ApiError::unauthorized().into_response()
        }
    }
}
