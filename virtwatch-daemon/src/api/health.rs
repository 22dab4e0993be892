//! `GET /health`

use super::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use virtwatch_core::observability::health::HealthStatus;

pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.health().report().await;
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy => StatusCode::OK,
    };
    (code, Json(report)).into_response()
}
