//! AgentScope HTTP API
//!
//! Axum server exposing run ingestion and run queries. Every `/api` route
//! requires the `X-Agentscope-Key` header and is scoped to the key's project.
//!
//! Each endpoint has a thin axum handler that extracts the request parts and
//! delegates to an inner function returning `(StatusCode, Value)`, so the
//! request logic can be tested without axum dispatch.
//!
//! Endpoints:
//! - POST  /api/ingest/run                : start a run
//! - POST  /api/ingest/run/:run_id/step   : append a step
//! - PATCH /api/ingest/run/:run_id        : partially update a run
//! - GET   /api/runs                      : list recent runs
//! - GET   /api/runs/:run_id              : fetch one run
//! - GET   /api/runs/:run_id/steps        : ordered steps of a run
//! - GET   /api/runs/:run_id/timeline     : run, steps and totals
//! - GET   /health, /version, /

use std::sync::Arc;

use agentscope_core::{AgentScopeConfig, AgentScopeError, NewRun, NewStep, RunUpdate};
use agentscope_ingest::IngestGateway;
use anyhow::Result;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Header carrying the project API key.
pub const API_KEY_HEADER: &str = "x-agentscope-key";

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub gateway: IngestGateway,
    pub config: AgentScopeConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let max_body = state.config.http.max_body_bytes;

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/ingest/run", post(create_run_handler))
        .route("/api/ingest/run/:run_id", patch(update_run_handler))
        .route("/api/ingest/run/:run_id/step", post(add_step_handler))
        .route("/api/runs", get(list_runs_handler))
        .route("/api/runs/:run_id", get(get_run_handler))
        .route("/api/runs/:run_id/steps", get(list_steps_handler))
        .route("/api/runs/:run_id/timeline", get(timeline_handler))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    gateway: IngestGateway,
    config: AgentScopeConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = config.listen_addr();
    let state = Arc::new(HttpState { gateway, config });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("AgentScope API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ListRunsQuery {
    pub limit: Option<u32>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }

    pub fn into_body(self, status: StatusCode) -> (StatusCode, Value) {
        (status, json!(self))
    }
}

// ============================================================================
// Inner (directly testable) request logic
// ============================================================================

pub async fn health_inner(gateway: &IngestGateway) -> (StatusCode, Value) {
    match gateway.store().health().await {
        Ok(backend) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "service": "agentscope-api",
                "version": env!("CARGO_PKG_VERSION"),
                "storage": backend,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Pure, no IO.
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "agentscope-api",
    })
}

pub fn root_inner() -> Value {
    json!({
        "message": "AgentScope API",
        "version": env!("CARGO_PKG_VERSION"),
    })
}

pub async fn create_run_inner(
    gateway: &IngestGateway,
    key: Option<&str>,
    body: NewRun,
) -> (StatusCode, Value) {
    match gateway.create_run(key, body).await {
        Ok(run) => json_ok(&run),
        Err(e) => error_to_http(&e),
    }
}

pub async fn add_step_inner(
    gateway: &IngestGateway,
    key: Option<&str>,
    run_id: Uuid,
    body: NewStep,
) -> (StatusCode, Value) {
    match gateway.add_step(key, run_id, body).await {
        Ok(_) => (StatusCode::OK, json!({"message": "Step added successfully"})),
        Err(e) => error_to_http(&e),
    }
}

pub async fn update_run_inner(
    gateway: &IngestGateway,
    key: Option<&str>,
    run_id: Uuid,
    body: RunUpdate,
) -> (StatusCode, Value) {
    match gateway.update_run(key, run_id, body).await {
        Ok(_) => (StatusCode::OK, json!({"message": "Run updated successfully"})),
        Err(e) => error_to_http(&e),
    }
}

pub async fn list_runs_inner(
    gateway: &IngestGateway,
    key: Option<&str>,
    query: ListRunsQuery,
) -> (StatusCode, Value) {
    match gateway.list_runs(key, query.limit).await {
        Ok(runs) => json_ok(&runs),
        Err(e) => error_to_http(&e),
    }
}

pub async fn get_run_inner(
    gateway: &IngestGateway,
    key: Option<&str>,
    run_id: Uuid,
) -> (StatusCode, Value) {
    match gateway.get_run(key, run_id).await {
        Ok(run) => json_ok(&run),
        Err(e) => error_to_http(&e),
    }
}

pub async fn list_steps_inner(
    gateway: &IngestGateway,
    key: Option<&str>,
    run_id: Uuid,
) -> (StatusCode, Value) {
    match gateway.list_steps(key, run_id).await {
        Ok(steps) => json_ok(&steps),
        Err(e) => error_to_http(&e),
    }
}

pub async fn timeline_inner(
    gateway: &IngestGateway,
    key: Option<&str>,
    run_id: Uuid,
) -> (StatusCode, Value) {
    match gateway.timeline(key, run_id).await {
        Ok(timeline) => json_ok(&timeline),
        Err(e) => error_to_http(&e),
    }
}

// ============================================================================
// Axum handler wrappers (delegate to inner functions)
// ============================================================================

pub async fn root_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(root_inner()))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.gateway).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn create_run_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    payload: Result<Json<NewRun>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => create_run_inner(&state.gateway, api_key(&headers), req).await,
        Err(rejection) => json_rejection(&rejection),
    };
    (status, Json(body))
}

pub async fn add_step_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    run_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<NewStep>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match (run_id, payload) {
        (Ok(Path(run_id)), Ok(Json(req))) => {
            add_step_inner(&state.gateway, api_key(&headers), run_id, req).await
        }
        (Err(rejection), _) => path_rejection(&rejection),
        (_, Err(rejection)) => json_rejection(&rejection),
    };
    (status, Json(body))
}

pub async fn update_run_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    run_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<RunUpdate>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match (run_id, payload) {
        (Ok(Path(run_id)), Ok(Json(req))) => {
            update_run_inner(&state.gateway, api_key(&headers), run_id, req).await
        }
        (Err(rejection), _) => path_rejection(&rejection),
        (_, Err(rejection)) => json_rejection(&rejection),
    };
    (status, Json(body))
}

pub async fn list_runs_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    query: Result<Query<ListRunsQuery>, QueryRejection>,
) -> impl IntoResponse {
    let (status, body) = match query {
        Ok(Query(query)) => list_runs_inner(&state.gateway, api_key(&headers), query).await,
        Err(rejection) => {
            ErrorResponse::new(rejection.body_text()).into_body(rejection.status())
        }
    };
    (status, Json(body))
}

pub async fn get_run_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    run_id: Result<Path<Uuid>, PathRejection>,
) -> impl IntoResponse {
    let (status, body) = match run_id {
        Ok(Path(run_id)) => get_run_inner(&state.gateway, api_key(&headers), run_id).await,
        Err(rejection) => path_rejection(&rejection),
    };
    (status, Json(body))
}

pub async fn list_steps_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    run_id: Result<Path<Uuid>, PathRejection>,
) -> impl IntoResponse {
    let (status, body) = match run_id {
        Ok(Path(run_id)) => list_steps_inner(&state.gateway, api_key(&headers), run_id).await,
        Err(rejection) => path_rejection(&rejection),
    };
    (status, Json(body))
}

pub async fn timeline_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    run_id: Result<Path<Uuid>, PathRejection>,
) -> impl IntoResponse {
    let (status, body) = match run_id {
        Ok(Path(run_id)) => timeline_inner(&state.gateway, api_key(&headers), run_id).await,
        Err(rejection) => path_rejection(&rejection),
    };
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// The presented API key, if the header is present and valid UTF-8.
pub fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// Map a domain error onto an HTTP status and the standard error body.
pub fn error_to_http(err: &AgentScopeError) -> (StatusCode, Value) {
    let status = match err {
        AgentScopeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        AgentScopeError::NotFound(_) => StatusCode::NOT_FOUND,
        AgentScopeError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AgentScopeError::Database(_)
        | AgentScopeError::Config(_)
        | AgentScopeError::Io(_)
        | AgentScopeError::Other(_) => {
            tracing::error!(error = %err, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let message = match err {
        AgentScopeError::Unauthorized(msg) | AgentScopeError::Validation(msg) => msg.clone(),
        AgentScopeError::NotFound(_) => err.to_string(),
        _ => "Internal server error".to_string(),
    };

    ErrorResponse::new(message).into_body(status)
}

fn json_ok<T: Serialize>(value: &T) -> (StatusCode, Value) {
    match serde_json::to_value(value) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response");
            ErrorResponse::new("Internal server error").into_body(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn json_rejection(rejection: &JsonRejection) -> (StatusCode, Value) {
    ErrorResponse::new(rejection.body_text()).into_body(rejection.status())
}

fn path_rejection(rejection: &PathRejection) -> (StatusCode, Value) {
    ErrorResponse::new(rejection.body_text()).into_body(rejection.status())
}

// ============================================================================
// Unit Tests: call inner functions directly against the in-memory store
// ============================================================================
