// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! HTTP surface: CRUD for datasources and charts, backend discovery, and
//! the WebSocket metric stream.
//!
//! Reads return the entities directly; writes and failures return a
//! `{code, message}` envelope. The stream endpoint expects a session
//! descriptor as the first text frame and then pushes one metric per
//! message until either side closes.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::admin::Admin;
use crate::chart::Chart;
use crate::datasource::DataSource;
use crate::errors::{Error, Result};
use crate::session::{SessionDescriptor, Sessions};

/// Application state shared across handlers.
pub struct AppState {
    pub admin: Admin,
    pub sessions: Sessions,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/datasources",
            get(list_datasources)
                .post(create_datasources)
                .put(update_datasource)
                .delete(remove_datasource),
        )
        .route(
            "/api/v1/charts",
            get(list_charts)
                .post(create_charts)
                .put(update_chart)
                .delete(remove_chart),
        )
        .route("/api/v1/backends", get(list_backends))
        .route("/api/v1/stream", get(stream))
        .with_state(state)
}

/// Runs the server until the shutdown token fires, then stops accepting
/// and lets in-flight requests drain.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Wire envelope for write acknowledgements and errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusBody {
    pub code: u16,
    pub message: String,
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::MissingDataSources { .. }
        | Error::MissingBackend { .. }
        | Error::InvalidConnectionString { .. }
        | Error::InvalidDescriptor { .. } => StatusCode::BAD_REQUEST,
        Error::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &Error) -> Response {
    let code = status_for(error);
    let body = StatusBody {
        code: code.as_u16(),
        message: error.to_string(),
    };
    (code, Json(body)).into_response()
}

fn ok_response() -> Response {
    Json(StatusBody {
        code: StatusCode::OK.as_u16(),
        message: "ok".to_string(),
    })
    .into_response()
}

async fn list_datasources(State(state): State<Arc<AppState>>) -> Response {
    match state.admin.read_datasources().await {
        Ok(sources) => Json(sources).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn create_datasources(
    State(state): State<Arc<AppState>>,
    Json(sources): Json<Vec<DataSource>>,
) -> Response {
    match state.admin.create_datasources(sources).await {
        Ok(()) => ok_response(),
        Err(error) => error_response(&error),
    }
}

async fn update_datasource(
    State(state): State<Arc<AppState>>,
    Json(source): Json<DataSource>,
) -> Response {
    match state.admin.update_datasource(&source).await {
        Ok(()) => ok_response(),
        Err(error) => error_response(&error),
    }
}

async fn remove_datasource(
    State(state): State<Arc<AppState>>,
    Json(source): Json<DataSource>,
) -> Response {
    match state.admin.delete_datasource(&source).await {
        Ok(()) => ok_response(),
        Err(error) => error_response(&error),
    }
}

async fn list_charts(State(state): State<Arc<AppState>>) -> Response {
    match state.admin.read_charts().await {
        Ok(charts) => Json(charts).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn create_charts(
    State(state): State<Arc<AppState>>,
    Json(charts): Json<Vec<Chart>>,
) -> Response {
    match state.admin.create_charts(charts).await {
        Ok(()) => ok_response(),
        Err(error) => error_response(&error),
    }
}

async fn update_chart(State(state): State<Arc<AppState>>, Json(chart): Json<Chart>) -> Response {
    match state.admin.update_chart(&chart).await {
        Ok(()) => ok_response(),
        Err(error) => error_response(&error),
    }
}

async fn remove_chart(State(state): State<Arc<AppState>>, Json(chart): Json<Chart>) -> Response {
    match state.admin.delete_chart(&chart).await {
        Ok(()) => ok_response(),
        Err(error) => error_response(&error),
    }
}

async fn list_backends(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.admin.backends())
}

async fn stream(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_session(socket, state))
}

/// Drives one streaming session over its socket. Round failures are logged
/// and the stream continues; only cancellation, a send failure, or the
/// client going away ends it.
async fn stream_session(mut socket: WebSocket, state: Arc<AppState>) {
    let descriptor = match read_descriptor(&mut socket).await {
        Ok(descriptor) => descriptor,
        Err(error) => {
            warn!(error = %error, "rejecting stream request");
            send_error(&mut socket, &error).await;
            return;
        }
    };

    let mut session = match state.sessions.open(&descriptor).await {
        Ok(session) => session,
        Err(error) => {
            warn!(error = %error, "failed to open session");
            send_error(&mut socket, &error).await;
            return;
        }
    };

    loop {
        tokio::select! {
            received = session.recv() => match received {
                Ok(metric) => {
                    let Ok(payload) = serde_json::to_string(&metric) else {
                        continue;
                    };
                    if socket.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(Error::Cancelled) => break,
                Err(error) => {
                    warn!(session = session.id(), error = %error, "query round failed");
                }
            },
            frame = socket.recv() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    session.cancel();
    debug!(
        session = session.id(),
        dropped = session.dropped(),
        "stream session closed"
    );
}

/// The first data frame must be a text-encoded session descriptor. Clients
/// that open with a Ping or Pong keepalive are waited out, not rejected.
async fn read_descriptor(socket: &mut WebSocket) -> Result<SessionDescriptor> {
    loop {
        match socket.recv().await {
            Some(Ok(message)) => {
                if let Some(result) = descriptor_frame(message) {
                    return result;
                }
            }
            Some(Err(err)) => {
                return Err(Error::InvalidDescriptor {
                    reason: format!("socket failed before descriptor: {err}"),
                });
            }
            None => {
                return Err(Error::InvalidDescriptor {
                    reason: "socket closed before descriptor".to_string(),
                });
            }
        }
    }
}

/// Classifies one frame received while awaiting the descriptor. `None` is a
/// control frame to wait past.
fn descriptor_frame(message: Message) -> Option<Result<SessionDescriptor>> {
    match message {
        Message::Ping(_) | Message::Pong(_) => None,
        Message::Text(raw) => Some(serde_json::from_str(&raw).map_err(|err| {
            Error::InvalidDescriptor {
                reason: format!("malformed descriptor: {err}"),
            }
        })),
        _ => Some(Err(Error::InvalidDescriptor {
            reason: "first frame must be a text descriptor".to_string(),
        })),
    }
}

async fn send_error(socket: &mut WebSocket, error: &Error) {
    let code = status_for(error);
    let body = StatusBody {
        code: code.as_u16(),
        message: error.to_string(),
    };
    if let Ok(payload) = serde_json::to_string(&body) {
        let _ = socket.send(Message::Text(payload)).await;
    }
}
