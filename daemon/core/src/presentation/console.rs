// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Live console over websocket: one text frame per log line.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::runtime::LogStream;
use crate::domain::service::ServiceId;
use crate::presentation::api::AppState;
use crate::presentation::error::ApiError;
use crate::presentation::servers::service_id;

pub async fn console_ws(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let id = service_id(&uuid)?;
    // Resolve before upgrading so an unknown server is a plain 404
    let logs = state.lifecycle.console(&id).await?;
    Ok(ws.on_upgrade(move |socket| stream_console(socket, id, logs)))
}

async fn stream_console(mut socket: WebSocket, id: ServiceId, mut logs: LogStream) {
    debug!(service = %id, "Console attached");

    loop {
        tokio::select! {
            line = logs.next() => match line {
                Some(Ok(line)) => {
                    if socket.send(Message::Text(line.into())).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(service = %id, error = %e, "Console log stream failed");
                    break;
                }
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                // Input goes through the command endpoint
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(service = %id, "Console detached");
}
