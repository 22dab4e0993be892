//! `GET /api/vms`

use super::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use virtwatch_core::observability::metrics;

const ENDPOINT: &str = "/api/vms";

/// Return the current snapshot as a JSON array.
///
/// A failure to list domains answers 500 with an empty body.
pub async fn list_vms(State(state): State<AppState>) -> Response {
    match state.snapshot().await {
        Ok(vms) => {
            metrics::record_api_request(ENDPOINT, 200);
            Json(vms).into_response()
        }
        Err(_) => {
            metrics::record_api_request(ENDPOINT, 500);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
