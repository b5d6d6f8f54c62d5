use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::CurrentStaff;
use crate::api::validation::validate_payload;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::schemas::result::{ManualGradeRequest, PublishResponse, RankResponse, ResultResponse};
use crate::services::{manual_review, ranking, IntegrityError};

pub(crate) fn exam_router() -> Router<AppState> {
    Router::new()
        .route("/:exam_id/results", get(list_exam_results))
        .route("/:exam_id/ranks/recompute", post(recompute_ranks))
        .route("/:exam_id/monitor", get(crate::api::channel::monitor_channel))
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:result_id/manual-grades", post(apply_manual_grade))
        .route("/:result_id/publish", post(publish))
}

/// Ranked first, then unranked results in submission order.
async fn list_exam_results(
    Path(exam_id): Path<String>,
    CurrentStaff(_staff): CurrentStaff,
    State(state): State<AppState>,
) -> Result<Json<Vec<ResultResponse>>, ApiError> {
    let mut results = state.store().list_results(&exam_id).await.map_err(IntegrityError::from)?;
    results.sort_by(|left, right| {
        left.rank
            .unwrap_or(i32::MAX)
            .cmp(&right.rank.unwrap_or(i32::MAX))
            .then_with(|| left.created_at.cmp(&right.created_at))
            .then_with(|| left.id.cmp(&right.id))
    });

    Ok(Json(results.into_iter().map(ResultResponse::from).collect()))
}

async fn recompute_ranks(
    Path(exam_id): Path<String>,
    CurrentStaff(staff): CurrentStaff,
    State(state): State<AppState>,
) -> Result<Json<Vec<RankResponse>>, ApiError> {
    let assignments = ranking::recompute_ranks(&state, &exam_id).await?;
    tracing::info!(exam_id, staff_id = %staff, ranked = assignments.len(), "Ranks recomputed on request");

    Ok(Json(assignments.into_iter().map(RankResponse::from).collect()))
}

async fn apply_manual_grade(
    Path(result_id): Path<String>,
    CurrentStaff(staff): CurrentStaff,
    State(state): State<AppState>,
    Json(payload): Json<ManualGradeRequest>,
) -> Result<Json<ResultResponse>, ApiError> {
    validate_payload(&payload)?;

    let result = manual_review::apply_manual_grade(
        &state,
        &result_id,
        &payload.question_id,
        payload.marks,
        payload.feedback,
        primitive_now_utc(),
    )
    .await?;
    tracing::info!(result_id, staff_id = %staff, "Manual grade recorded");

    Ok(Json(ResultResponse::from(result)))
}

async fn publish(
    Path(result_id): Path<String>,
    CurrentStaff(_staff): CurrentStaff,
    State(state): State<AppState>,
) -> Result<Json<PublishResponse>, ApiError> {
    let outcome = manual_review::publish(&state, &result_id, primitive_now_utc()).await?;

    Ok(Json(PublishResponse {
        newly_published: outcome.newly_published,
        result: ResultResponse::from(outcome.result),
    }))
}
