//! HTTP API surface.

pub mod handlers;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/mcsd/update", post(handlers::update))
        .with_state(state)
}
