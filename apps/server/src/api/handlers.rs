//! Request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;
use crate::Result;

pub async fn health() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}

/// Trigger a synchronization run and return the per-directory report.
///
/// Runs synchronously; concurrent triggers queue on the engine's run lock.
pub async fn update(State(state): State<AppState>) -> Result<Response> {
    let report = state.update_client.run_update().await;
    Ok((StatusCode::OK, Json(report)).into_response())
}
