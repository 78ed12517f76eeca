//! HTTP surface over [`MoveSubmissionService`].

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};
use axum::{Json, Router};
use santorini_engine::{
    CreateMatchRequest, MatchId, MatchState, SubmissionOutcome, SubmitMoveRequest,
};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::error::SubmissionError;
use crate::service::MoveSubmissionService;
use crate::session::AuthError;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    service: Arc<MoveSubmissionService>,
}

impl AppState {
    /// Wraps a service.
    pub fn new(service: Arc<MoveSubmissionService>) -> Self {
        Self { service }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/matches", post(create_match))
        .route("/matches/{id}", get(fetch_state))
        .route("/matches/{id}/join", post(join_match))
        .route("/matches/{id}/moves", post(submit_move))
        .with_state(state)
}

/// Extracts the bearer token; a missing header fails before the body is read.
fn bearer_token(headers: &HeaderMap) -> Result<String, SubmissionError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(SubmissionError::Unauthorized(AuthError::MissingToken))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, SubmissionError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| SubmissionError::InvalidRequest(rejection.body_text()))
}

/// Runs a blocking service call off the async runtime.
async fn blocking<T, F>(service: Arc<MoveSubmissionService>, call: F) -> Result<T, SubmissionError>
where
    T: Send + 'static,
    F: FnOnce(&MoveSubmissionService) -> Result<T, SubmissionError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(&service))
        .await
        .map_err(|e| SubmissionError::Internal(format!("worker task failed: {}", e)))?
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[instrument(skip_all)]
async fn create_match(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateMatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MatchState>), SubmissionError> {
    let token = bearer_token(&headers)?;
    let request = body(payload)?;
    let created = blocking(state.service, move |s| s.create_match(&token, request)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, headers))]
async fn join_match(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MatchState>, SubmissionError> {
    let token = bearer_token(&headers)?;
    let match_id = MatchId::new(id);
    let joined = blocking(state.service, move |s| s.join_match(&token, &match_id)).await?;
    Ok(Json(joined))
}

#[instrument(skip(state, headers))]
async fn fetch_state(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MatchState>, SubmissionError> {
    let token = bearer_token(&headers)?;
    let match_id = MatchId::new(id);
    let current = blocking(state.service, move |s| s.fetch_state(&token, &match_id)).await?;
    Ok(Json(current))
}

#[instrument(skip(state, headers, payload))]
async fn submit_move(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<SubmitMoveRequest>, JsonRejection>,
) -> Result<Json<SubmissionOutcome>, SubmissionError> {
    let token = bearer_token(&headers)?;
    let request = body(payload)?;
    debug!(?request, "Move submission received");
    let match_id = MatchId::new(id);
    let outcome = blocking(state.service, move |s| s.submit(&token, &match_id, request)).await?;
    Ok(Json(outcome))
}
