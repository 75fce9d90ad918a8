use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::operations::mastery::{get_all_mastery, get_mastery};
use crate::mastery::MasteryAggregate;
use crate::response::AppError;
use crate::services::batch::{apply_event, BatchEvent};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct ProcessEventRequest {
    user_id: String,
    concept_id: String,
    event_type: String,
    #[serde(default)]
    event_details: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ProcessEventResponse {
    status: &'static str,
    new_mastery: f64,
}

#[derive(Debug, Serialize)]
struct RecomputeResponse {
    processed: usize,
    skipped: usize,
    message: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/process_event", post(process_event))
        .route(
            "/mastery/recompute/:user_id",
            post(recompute_mastery).get(get_recompute_user_concept),
        )
        .route("/mastery/:user_id", get(get_user_mastery))
        .route("/mastery/:user_id/:concept_id", get(get_concept_mastery))
}

async fn get_user_mastery(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<MasteryAggregate>>, AppError> {
    let mut conn = state.store().acquire().await?;
    let aggregates = get_all_mastery(&mut conn, &user_id).await?;
    Ok(Json(aggregates))
}

async fn get_concept_mastery(
    State(state): State<AppState>,
    Path((user_id, concept_id)): Path<(String, String)>,
) -> Result<Json<MasteryAggregate>, AppError> {
    let mut conn = state.store().acquire().await?;
    get_mastery(&mut conn, &user_id, &concept_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("No mastery record found"))
}

/// GET on the recompute path is a concept lookup for the user literally named
/// "recompute", which the static segment would otherwise shadow.
async fn get_recompute_user_concept(
    state: State<AppState>,
    Path(concept_id): Path<String>,
) -> Result<Json<MasteryAggregate>, AppError> {
    get_concept_mastery(state, Path(("recompute".to_string(), concept_id))).await
}

async fn process_event(
    State(state): State<AppState>,
    Json(payload): Json<ProcessEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.user_id.trim().is_empty() {
        return Err(AppError::validation("user_id must not be empty"));
    }

    let event = BatchEvent {
        concept_id: Some(payload.concept_id),
        event_type: Some(payload.event_type),
        event_details: payload.event_details,
    }
    .validate(&payload.user_id)
    .map_err(|reason| AppError::validation(reason.to_string()))?;

    let aggregate = apply_event(state.store(), state.clock(), &event).await?;
    tracing::debug!(
        user_id = %event.user_id,
        concept_id = %event.concept_id,
        event_type = %event.event_type,
        "event applied"
    );

    Ok(Json(ProcessEventResponse {
        status: "updated",
        new_mastery: aggregate.map(|a| a.mastery_score).unwrap_or(0.0),
    }))
}

async fn recompute_mastery(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<RecomputeResponse>, AppError> {
    let cancel = state.shutdown_token().child_token();
    let result = state.recompute().recompute(&user_id, &cancel).await?;

    Ok(Json(RecomputeResponse {
        processed: result.processed,
        skipped: result.skipped,
        message: format!(
            "Successfully reprocessed {} events for {} ({} skipped)",
            result.processed, result.user_id, result.skipped
        ),
    }))
}
