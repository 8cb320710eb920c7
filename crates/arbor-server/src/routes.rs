//! HTTP routes
//!
//! - `GET /health` - heartbeat (no auth)
//! - `POST /sync/status` - compare workspace hashes
//! - `POST /sync/pull` - snapshot of one workspace
//! - `POST /sync/push` - apply a batch of changes

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};

use arbor_core::protocol::{
    HealthResponse, PullRequest, PullResponse, PushRequest, PushResponse, StatusRequest,
    StatusResponse, HEALTH_PATH, PULL_PATH, PUSH_PATH, STATUS_PATH,
};

use crate::error::ApiResult;
use crate::gateway::Gateway;

type AppState = Arc<Gateway>;

/// Token from `Authorization: Bearer <token>`
fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

async fn health(State(gateway): State<AppState>) -> Json<HealthResponse> {
    Json(gateway.health())
}

async fn status(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    // Authenticate before looking at the body
    gateway.authenticate(bearer(&headers))?;
    let Json(request) = payload?;
    Ok(Json(gateway.status(bearer(&headers), &request)?))
}

async fn pull(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PullRequest>, JsonRejection>,
) -> ApiResult<Json<PullResponse>> {
    gateway.authenticate(bearer(&headers))?;
    let Json(request) = payload?;
    Ok(Json(gateway.pull(bearer(&headers), &request)?))
}

async fn push(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PushRequest>, JsonRejection>,
) -> ApiResult<Json<PushResponse>> {
    gateway.authenticate(bearer(&headers))?;
    let Json(request) = payload?;
    Ok(Json(gateway.push(bearer(&headers), &request)?))
}

/// Build the router
pub fn create_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(STATUS_PATH, post(status))
        .route(PULL_PATH, post(pull))
        .route(PUSH_PATH, post(push))
        .with_state(gateway)
}
