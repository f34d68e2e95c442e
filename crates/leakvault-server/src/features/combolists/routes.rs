//! Combolist API routes
//!
//! # Route Structure
//!
//! - `POST /api/v1/combolists/bulk` - Store one agent submission

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use std::net::SocketAddr;

use crate::api::response::ApiResponse;
use crate::error::AppError;
use crate::features::FeatureState;

use super::commands::BulkUploadCommand;

pub fn combolists_routes() -> Router<FeatureState> {
    Router::new().route("/bulk", post(bulk_upload))
}

/// Store one agent submission
///
/// # Endpoint
///
/// `POST /api/v1/combolists/bulk`
///
/// # Headers
///
/// - `Authorization: <agent key>`
///
/// # Request Body
///
/// ```json
/// {
///   "hash": "5d41402abc4b2a76b9719d911017c592",
///   "metadata": {
///     "source": "telegram",
///     "collected_at": "2024-05-01T10:00:00Z",
///     "tags": ["combolist"],
///     "notes": ""
///   },
///   "data": [
///     {"email": "alice@example.com", "password": "secret", "username": "alice", "domain": "example.com"}
///   ]
/// }
/// ```
///
/// # Response
///
/// - `200 OK` - Submission stored (or already stored)
/// - `400 Bad Request` - Body is not valid JSON or the hash is empty
/// - `401 Unauthorized` - `{"error": "not authorized"}` for every gate refusal
/// - `500 Internal Server Error` - Storage failure
#[tracing::instrument(skip_all)]
async fn bulk_upload(
    State(state): State<FeatureState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let auth_key = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let agent = state
        .gate
        .authorize(auth_key, &state.combolist_platform)
        .await?;

    let command: BulkUploadCommand = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid JSON payload: {}", e)))?;

    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    state.gate.touch(auth_key, ip.as_deref()).await?;

    let response =
        super::commands::bulk_upload::handle(state.submissions.as_ref(), command).await?;

    // Records are committed; only log counter failures
    if let Err(err) = state.gate.record_processed(auth_key, response.received).await {
        tracing::error!(agent_id = agent.id, error = %err, "Failed to update processed counter");
    }

    tracing::info!(
        agent_id = agent.id,
        metadata_id = response.metadata_id,
        received = response.received,
        inserted = response.inserted,
        "Bulk upload accepted"
    );

    Ok(ApiResponse::success(response).into_response())
}

/// Client address as seen by the first proxy, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|value| value.to_str().ok()))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}
