//! API route definitions.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use super::state::AppState;
use crate::detect::DetectError;
use crate::storage::{self, SaveOutcome, TimestampSource};
use crate::telemetry::{RawSample, ValidationError};

const DEFAULT_LIST_LIMIT: usize = 500;
const MAX_LIST_LIMIT: usize = 5000;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/telemetry", get(list_telemetry).post(ingest_telemetry))
        .route("/telemetry/latest", get(latest_telemetry))
}

/// Handler failures, rendered as `{"error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Rejected(String),
    /// The body could not be read as a sample at all.
    Malformed(JsonRejection),
    NotFound(&'static str),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::Malformed(e)
    }
}

impl From<DetectError> for ApiError {
    fn from(e: DetectError) -> Self {
        match e {
            DetectError::Validation(v) => ApiError::Validation(v),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": e.to_string(), "field": e.field() }),
            ),
            ApiError::Rejected(msg) => (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": msg })),
            ApiError::Malformed(e) => (e.status(), json!({ "error": e.body_text() })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Internal(e) => {
                error!(error = %format!("{e:#}"), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal error" }))
            }
        };
        (status, Json(body)).into_response()
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    vehicle: Option<String>,
    limit: Option<usize>,
}

async fn list_telemetry(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let pool = state.pool.clone();
    let records = tokio::task::spawn_blocking(move || storage::list_records(&pool, q.vehicle.as_deref(), limit))
        .await
        .map_err(anyhow::Error::from)??;

    let total = records.len();
    Ok(Json(json!({ "data": records, "meta": { "total": total } })))
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    vehicle: Option<String>,
}

async fn latest_telemetry(
    State(state): State<AppState>,
    Query(q): Query<LatestQuery>,
) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let record = tokio::task::spawn_blocking(move || storage::latest_record(&pool, q.vehicle.as_deref()))
        .await
        .map_err(anyhow::Error::from)??
        .ok_or(ApiError::NotFound("no telemetry data available"))?;

    Ok(Json(json!({ "data": record })))
}

/// Evaluate and store one sample. Nothing is stored when validation fails
/// or when a producer-supplied timestamp is older than the vehicle's latest
/// sample. Server-stamped samples are moved forward instead.
async fn ingest_telemetry(
    State(state): State<AppState>,
    body: Result<Json<RawSample>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(raw) = body?;
    let vehicle = raw.vehicle_key();
    let source = if raw.timestamp.is_some() {
        TimestampSource::Client
    } else {
        TimestampSource::Server
    };

    let history = state.history.snapshot(&vehicle).await?;
    let history_len = history.len();
    let (sample, verdict) = state.evaluator.evaluate_offloaded(raw, history).await?;

    let pool = state.pool.clone();
    let (stored_sample, stored_verdict) = (sample.clone(), verdict.clone());
    let outcome = tokio::task::spawn_blocking(move || {
        storage::save_record_ordered(&pool, &stored_sample, &stored_verdict, source)
    })
    .await
    .map_err(anyhow::Error::from)??;

    let (id, timestamp) = match outcome {
        SaveOutcome::Saved { id, timestamp } => (id, timestamp),
        SaveOutcome::OutOfOrder { latest } => {
            warn!(%vehicle, ts = %sample.timestamp, %latest, "rejecting out-of-order sample");
            return Err(ApiError::Rejected(format!(
                "timestamp {} is earlier than the latest sample for vehicle {} ({})",
                sample.timestamp.to_rfc3339(),
                vehicle,
                latest.to_rfc3339()
            )));
        }
    };

    Ok(Json(json!({
        "data": {
            "id": id,
            "vehicle_id": sample.vehicle_id,
            "timestamp": timestamp,
            "verdict": verdict,
            "anomaly_reason": verdict.anomaly_reason(),
        },
        "meta": {
            "message": "telemetry stored",
            "history_size": history_len,
        }
    })))
}
