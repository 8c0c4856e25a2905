//! Main HTTP Gateway Server.
//!
//! Routes: the WebSocket channel, the exec endpoint, stream redirects,
//! the session listing and a health probe.

use anyhow::Result;
use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info, instrument};

use aerodesk_core::GatewayError;
use aerodesk_executor::ExecOutcome;
use aerodesk_supervisor::NativeSession;

use crate::connection_manager::ConnectionManager;
use crate::ws_server::ws_handler;

/// Header carrying the channel connection id on HTTP requests.
pub const CONNECTION_HEADER: &str = "x-connection-id";
const CONNECTION_HEADER_ALIAS: &str = "x-socket-id";

/// Application state shared across routes.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: ConnectionManager,
}

impl GatewayState {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

/// Build the router with all gateway routes.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route("/api/exec", post(exec_handler))
        .route("/api/sessions", get(list_sessions))
        .route("/api/health", get(health))
        .route("/stream/:instance_id", get(stream_redirect))
        .with_state(state)
}

/// Serve `app` until the process is interrupted.
#[instrument(skip(app))]
pub async fn start_server(addr: SocketAddr, app: Router) -> Result<()> {
    info!("Gateway HTTP server listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ExecBody {
    pub command: String,
}

fn connection_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CONNECTION_HEADER)
        .or_else(|| headers.get(CONNECTION_HEADER_ALIAS))
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn forbidden(message: String) -> Response {
    (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
}

/// `POST /api/exec`: accept, park for approval, or refuse. The command's
/// output is delivered on the caller's channel, never in this response.
async fn exec_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<ExecBody>,
) -> Response {
    let Some(id) = connection_id(&headers) else {
        return forbidden(GatewayError::NoConnection(String::new()).to_string());
    };

    match state.manager.exec(id, &body.command).await {
        Ok(ExecOutcome::Started) => Json(json!({ "success": true })).into_response(),
        Ok(ExecOutcome::Pending { .. }) => Json(json!({ "pending": true })).into_response(),
        Err(e @ (GatewayError::PermanentlyBlocked { .. } | GatewayError::NoConnection(_))) => {
            forbidden(e.to_string())
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// `GET /stream/:instance_id`: redirect to the session's stream endpoint.
async fn stream_redirect(
    State(state): State<GatewayState>,
    Path(instance_id): Path<String>,
) -> Response {
    match state
        .manager
        .sessions()
        .get(&instance_id)
        .and_then(|s| s.stream_url)
    {
        Some(url) => {
            debug!(instance_id = %instance_id, url = %url, "Redirecting to stream");
            (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
        }
        None => (StatusCode::NOT_FOUND, "No active stream").into_response(),
    }
}

async fn list_sessions(State(state): State<GatewayState>) -> Json<Vec<NativeSession>> {
    Json(state.manager.sessions().list())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "aerodesk",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
