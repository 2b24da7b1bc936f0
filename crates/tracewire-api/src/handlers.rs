//! Gateway handlers — translate HTTP/JSON into decoder service calls.
//!
//! Stream ids in request bodies and query strings travel as base64 of the
//! 16 raw bytes (standard or URL-safe alphabet, either accepted). Status
//! mapping: success statuses ride a 200; a bind conflict is 409, missing
//! packages 404, malformed input 400, remote-store trouble 503.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use tracewire_core::stream_id::StreamId;
use tracewire_core::wire::{ControlResponse, ResponseStatus};
use tracewire_services::decoder::{BindOutcome, DecoderService, RegisterOutcome, ServiceError};

#[derive(Clone)]
pub struct ApiState {
    pub decoder: Arc<DecoderService>,
}

type Reply = (StatusCode, Json<ControlResponse>);

fn bad_request(message: impl Into<String>) -> Reply {
    (
        StatusCode::BAD_REQUEST,
        Json(ControlResponse::invalid_argument(message)),
    )
}

fn error_reply(err: &ServiceError) -> Reply {
    let code = match err.status() {
        ResponseStatus::InvalidArgument => StatusCode::BAD_REQUEST,
        ResponseStatus::NotFound => StatusCode::NOT_FOUND,
        ResponseStatus::AlreadyExists => StatusCode::CONFLICT,
        ResponseStatus::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ResponseStatus::Ok => StatusCode::OK,
    };
    (code, Json(err.to_response()))
}

/// Parse a base64-encoded 16-byte stream id.
fn parse_stream_id(encoded: &str) -> Result<StreamId, Reply> {
    let bytes = STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE.decode(encoded))
        .map_err(|_| bad_request("stream id is not valid base64"))?;
    StreamId::from_slice(&bytes).map_err(|e| bad_request(e.to_string()))
}

// ── PUT /v1/schema ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSchemaBody {
    /// Base64 of the serialized descriptor set.
    pub descriptor: String,
}

pub async fn handle_upsert_schema(
    State(state): State<ApiState>,
    Json(body): Json<UpsertSchemaBody>,
) -> Reply {
    let descriptor = match STANDARD.decode(&body.descriptor) {
        Ok(bytes) => bytes,
        Err(_) => return bad_request("descriptor is not valid base64"),
    };

    match state.decoder.register_schema(&descriptor).await {
        Ok(RegisterOutcome::Stored { .. }) => (StatusCode::OK, Json(ControlResponse::ok())),
        Ok(RegisterOutcome::Unchanged { package }) => (
            StatusCode::OK,
            Json(ControlResponse::with_status(
                ResponseStatus::AlreadyExists,
                format!("package {package} already registered, checksum matches"),
            )),
        ),
        Err(err) => error_reply(&err),
    }
}

// ── PUT /v1/stream ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindStreamBody {
    pub stream_id: String,
    pub package: String,
    pub message: String,
}

pub async fn handle_bind_stream(
    State(state): State<ApiState>,
    Json(body): Json<BindStreamBody>,
) -> Reply {
    let stream_id = match parse_stream_id(&body.stream_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };

    match state
        .decoder
        .bind_stream(stream_id, &body.package, &body.message)
        .await
    {
        Ok(BindOutcome::Bound) => (StatusCode::OK, Json(ControlResponse::ok())),
        Ok(BindOutcome::Unchanged) => (
            StatusCode::OK,
            Json(ControlResponse::with_status(
                ResponseStatus::Ok,
                "stream already bound to this schema",
            )),
        ),
        Err(err) => error_reply(&err),
    }
}

// ── DELETE /v1/stream ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnbindStreamParams {
    pub stream_id: String,
}

pub async fn handle_unbind_stream(
    State(state): State<ApiState>,
    Query(params): Query<UnbindStreamParams>,
) -> Reply {
    let stream_id = match parse_stream_id(&params.stream_id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };

    match state.decoder.unbind_stream(stream_id).await {
        Ok(()) => (StatusCode::OK, Json(ControlResponse::ok())),
        Err(err) => error_reply(&err),
    }
}

// ── GET /v1/status ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub schemas: usize,
    pub bindings: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let (schemas, bindings) = state.decoder.counts().await;
    Json(StatusResponse { schemas, bindings })
}
