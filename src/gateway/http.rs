//! HTTP boundary
//!
//! Thin axum layer over [`Gateway`]: validates collection names, maps read
//! and write outcomes to status codes, and exposes health and metrics.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{validate_collection, QueryShape};
use crate::fallback::CircuitState;
use crate::gateway::{Gateway, ReadOutcome, WriteOperation, WriteOutcome};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// Creates the HTTP router with all public endpoints.
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/metrics", get(metrics))
        .route("/data/:collection/query", post(query))
        .route("/data/:collection/write", post(write))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

/// Payloads are JSON from the primary store; anything else is passed as a
/// string rather than dropped.
fn payload_json(data: &Bytes) -> Value {
    serde_json::from_slice(data)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(data).into_owned()))
}

fn invalid_collection(e: crate::Error) -> Response {
    (
        e.to_http_status(),
        Json(json!({ "error": "invalid_collection", "message": e.to_string() })),
    )
        .into_response()
}

fn store_rejected(message: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": "store_rejected", "message": message })),
    )
        .into_response()
}

async fn query(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(shape): Json<QueryShape>,
) -> Response {
    if let Err(e) = validate_collection(&collection) {
        return invalid_collection(e);
    }

    match state.gateway.read(&collection, &shape).await {
        ReadOutcome::Served(r) => Json(json!({
            "data": payload_json(&r.data),
            "cached": r.cached,
            "degraded": r.degraded,
            "source": r.source,
        }))
        .into_response(),
        ReadOutcome::Unavailable { circuit_state } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "data_unavailable",
                "message": "service degraded, no data available",
                "degraded": true,
                "circuitState": circuit_state,
            })),
        )
            .into_response(),
        ReadOutcome::Rejected(message) => store_rejected(&message),
    }
}

async fn write(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(op): Json<WriteOperation>,
) -> Response {
    if let Err(e) = validate_collection(&collection) {
        return invalid_collection(e);
    }

    match state.gateway.write(&collection, &op).await {
        WriteOutcome::Applied(data) => Json(json!({ "data": payload_json(&data) })).into_response(),
        WriteOutcome::Rejected(r) if r.is_read_only() => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "read_only_mode",
                "reason": r.reason,
                "circuitState": r.circuit_state,
                "message": r.message,
            })),
        )
            .into_response(),
        WriteOutcome::Rejected(r) => store_rejected(&r.message),
    }
}

/// Full health snapshot. Always 200: a degraded instance still serves reads.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.health_snapshot())
}

async fn health_live() -> impl IntoResponse {
    Json(json!({
        "alive": true,
        "version": crate::VERSION,
    }))
}

/// 200 only while the circuit is closed.
async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let circuit = state.gateway.coordinator().state();
    let status = if circuit == CircuitState::Normal {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "ready": circuit == CircuitState::Normal,
            "circuitState": circuit,
        })),
    )
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.gateway.metrics_text(),
    )
}
