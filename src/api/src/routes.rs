//! API route handlers.

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::admin::{record_results, resettle};
use crate::error::{AdminError, SettleError};
use crate::ingest::{ResultIngestor, ResultSource};
use crate::settlement::{SettlementEngine, SettlementReport};
use crate::types::{
    ErrorResponse, HealthResponse, IngestResponse, RecordResultsRequest, RecordResultsResponse,
    ResettleRequest, ResettleResponse,
};

/// Application state shared across handlers.
pub struct AppState<S> {
    pub engine: Arc<SettlementEngine>,
    pub ingestor: ResultIngestor<S>,
    /// Bearer token for scheduler and admin calls. Empty rejects everything.
    pub cron_secret: String,
}

/// Error type for API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    fn with_status(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.status.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<SettleError> for ApiError {
    fn from(err: SettleError) -> Self {
        let status = match &err {
            SettleError::RaceNotFound(_) => StatusCode::NOT_FOUND,
            SettleError::NoResults(_) | SettleError::NoWinner(_) => StatusCode::CONFLICT,
            SettleError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::with_status(status, err.to_string())
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        let status = match &err {
            AdminError::RaceNotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::with_status(status, err.to_string())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        Self::internal(format!("Storage error: {}", err))
    }
}

fn authorize(headers: &HeaderMap, secret: &str) -> Result<(), ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if !secret.is_empty() && token == secret => Ok(()),
        _ => Err(ApiError::unauthorized("Missing or invalid bearer token")),
    }
}

/// Build the router with tracing and CORS layers.
pub fn router<S: ResultSource + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cron/auto-settle", post(auto_settle::<S>))
        .route("/admin/races/:race_id/results", post(post_results::<S>))
        .route("/admin/races/:race_id/settle", post(settle_race::<S>))
        .route("/admin/resettle", post(resettle_races::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Scheduler trigger: one ingestion cycle.
pub async fn auto_settle<S: ResultSource + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Result<Json<IngestResponse>, ApiError> {
    authorize(&headers, &state.cron_secret)?;

    let outcomes = state.ingestor.run_ingestion_cycle(Utc::now()).await?;
    Ok(Json(IngestResponse {
        processed: outcomes.len(),
        outcomes,
    }))
}

/// Manual result entry, optionally settling right away.
pub async fn post_results<S: ResultSource + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(race_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RecordResultsRequest>,
) -> Result<Json<RecordResultsResponse>, ApiError> {
    authorize(&headers, &state.cron_secret)?;

    record_results(state.engine.store(), &race_id, &req.results, &req.payouts)?;
    let settlement = if req.settle {
        Some(state.engine.settle(&race_id)?)
    } else {
        None
    };

    Ok(Json(RecordResultsResponse {
        race_id,
        results: req.results.len(),
        payouts: req.payouts.len(),
        settlement,
    }))
}

pub async fn settle_race<S: ResultSource + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(race_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SettlementReport>, ApiError> {
    authorize(&headers, &state.cron_secret)?;
    Ok(Json(state.engine.settle(&race_id)?))
}

/// Settle voting-open races by id or race date.
pub async fn resettle_races<S: ResultSource + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<ResettleRequest>,
) -> Result<Json<ResettleResponse>, ApiError> {
    authorize(&headers, &state.cron_secret)?;

    let outcomes = resettle(
        &state.engine,
        req.race_id.as_deref(),
        req.race_date,
        Utc::now(),
    )?;
    Ok(Json(ResettleResponse {
        processed: outcomes.len(),
        outcomes,
    }))
}
