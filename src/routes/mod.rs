mod health;
mod mastery;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::response::AppError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .nest("/health", health::router())
        .merge(mastery::router())
        .fallback(fallback_handler)
        .with_state(state)
}

async fn home() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Concept Mastery Service is running" }))
}

async fn fallback_handler() -> AppError {
    AppError::not_found("route not found")
}
