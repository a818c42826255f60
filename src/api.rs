//! HTTP admin API.
//!
//! Session control (status, connect, disconnect, pair), the QR challenge as a
//! PNG, and read access to the ledger. Spawned as a background task by the
//! gateway.

use crate::playback::PlaybackScheduler;
use crate::session::SessionManager;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use melodia_channels::{qr, LoopbackTransport};
use melodia_core::{
    config::ApiConfig,
    message::{phone_part, InboundMessage},
    traits::{Ledger, Transport},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

type ApiError = (StatusCode, Json<Value>);

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<SessionManager>,
    pub playback: Arc<PlaybackScheduler>,
    pub ledger: Arc<dyn Ledger>,
    pub transport: Arc<dyn Transport>,
    pub api_key: Option<String>,
    /// Default page size for `GET /api/requests`.
    pub request_limit: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairRequest {
    phone_number: String,
}

#[derive(Debug, Deserialize)]
struct RequestsQuery {
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundRequest {
    conversation_id: String,
    text: String,
    sender_id: Option<String>,
    #[serde(default)]
    is_group: bool,
    group_name: Option<String>,
}

fn message(status: StatusCode, text: impl Into<String>) -> ApiError {
    (status, Json(json!({ "message": text.into() })))
}

/// Constant-time string comparison for API token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check bearer token auth. `Err` carries the 401 response.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Result<(), ApiError> {
    let Some(key) = api_key else {
        return Ok(());
    };
    let header = headers
        .get("authorization")
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "missing Authorization header"))?;
    let value = header
        .to_str()
        .map_err(|_| message(StatusCode::UNAUTHORIZED, "invalid Authorization header"))?;
    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => Ok(()),
        _ => Err(message(StatusCode::UNAUTHORIZED, "invalid token")),
    }
}

/// `GET /api/bot/status`
async fn status(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<StatusResponse>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let snapshot = state.session.status();
    Ok(Json(StatusResponse {
        status: snapshot.state.as_api_str(),
        qr_code: snapshot.qr_challenge,
        phone_number: snapshot.identity,
    }))
}

/// `POST /api/bot/connect`: idempotent.
async fn connect(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    match state.session.connect().await {
        Ok(()) => Ok(Json(json!({ "success": true }))),
        Err(e) => {
            error!("api: connect failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false })),
            ))
        }
    }
}

/// `POST /api/bot/disconnect`
async fn disconnect(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    match state.session.disconnect().await {
        Ok(()) => Ok(Json(json!({ "success": true }))),
        Err(e) => {
            error!("api: disconnect failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false })),
            ))
        }
    }
}

/// `POST /api/bot/pair`: every failure is a 400 with a message.
async fn pair(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<PairRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let Json(request) =
        body.map_err(|e| message(StatusCode::BAD_REQUEST, format!("invalid body: {e}")))?;
    match state.session.pair(&request.phone_number).await {
        Ok(code) => Ok(Json(json!({ "code": code }))),
        Err(e) => {
            warn!("api: pairing rejected: {e}");
            Err(message(StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}

/// `GET /api/bot/qr`: the current QR challenge as a base64 PNG.
async fn qr_image(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let challenge = state
        .session
        .status()
        .qr_challenge
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "no QR challenge pending"))?;
    let png = qr::generate_qr_image(&challenge).map_err(|e| {
        error!("api: QR image generation failed: {e}");
        message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(json!({ "qrPngBase64": BASE64.encode(&png) })))
}

/// `GET /api/users`
async fn users(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let users = state.ledger.list_connected_users().await.map_err(|e| {
        error!("api: listing users failed: {e}");
        message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(json!(users)))
}

/// `GET /api/playback`: active jobs by conversation.
async fn playback(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    Ok(Json(json!(state.playback.active_jobs())))
}

/// `GET /api/requests?limit=`
async fn requests(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Query(query): Query<RequestsQuery>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let limit = query.limit.unwrap_or(state.request_limit);
    let requests = state.ledger.list_song_requests(limit).await.map_err(|e| {
        error!("api: listing requests failed: {e}");
        message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(json!(requests)))
}

/// `POST /api/bot/inbound`: deliver a chat message through the loopback transport.
async fn inbound(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<InboundRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check_auth(&headers, &state.api_key)?;
    let Json(request) =
        body.map_err(|e| message(StatusCode::BAD_REQUEST, format!("invalid body: {e}")))?;
    let loopback = state
        .transport
        .as_any()
        .downcast_ref::<LoopbackTransport>()
        .ok_or_else(|| {
            message(
                StatusCode::BAD_REQUEST,
                format!("transport '{}' does not accept injected messages", state.transport.name()),
            )
        })?;

    let sender_id = request
        .sender_id
        .unwrap_or_else(|| phone_part(&request.conversation_id).to_string());
    let msg = InboundMessage {
        id: Uuid::new_v4(),
        conversation_id: request.conversation_id,
        sender_id,
        text: request.text,
        is_group: request.is_group,
        group_name: request.group_name,
        from_self: false,
        timestamp: Utc::now(),
    };
    let id = msg.id;
    loopback
        .inject(msg)
        .await
        .map_err(|e| message(StatusCode::CONFLICT, e.to_string()))?;
    info!("api: injected inbound message {id}");
    Ok((StatusCode::ACCEPTED, Json(json!({ "id": id.to_string() }))))
}

/// Build the axum router with shared state.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/bot/status", get(status))
        .route("/api/bot/connect", post(connect))
        .route("/api/bot/disconnect", post(disconnect))
        .route("/api/bot/pair", post(pair))
        .route("/api/bot/qr", get(qr_image))
        .route("/api/bot/inbound", post(inbound))
        .route("/api/users", get(users))
        .route("/api/requests", get(requests))
        .route("/api/playback", get(playback))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

/// Start the API server. Called from `Gateway::run()`.
pub async fn serve(config: ApiConfig, state: ApiState) {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("API server failed to bind to {addr}: {e}");
            return;
        }
    };

    info!("API server listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("API server error: {e}");
    }
}
