use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::guards::{
    require_owner, require_owner_or_staff, CurrentCandidate, CurrentPrincipal, CurrentStaff,
};
use crate::api::validation::{validate_payload, validate_violation_kind};
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::ExamSession;
use crate::db::types::ResultStatus;
use crate::schemas::session::{
    stamp_answers, AutosaveRequest, AutosaveResponse, SessionResponse, SubmitRequest,
    SubmitResponse, ViolationRequest, ViolationResponse,
};
use crate::services::integrity_monitor::{self, ViolationOutcome};
use crate::services::session_lifecycle;
use crate::services::submission_coordinator::{self, SubmitReason};
use crate::services::IntegrityError;

pub(crate) fn exam_router() -> Router<AppState> {
    Router::new().route("/:exam_id/sessions", post(start_session))
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:session_id", get(get_session))
        .route("/:session_id/answers", put(autosave))
        .route("/:session_id/violations", post(record_violation).get(list_violations))
        .route("/:session_id/submit", post(submit))
        .route("/:session_id/channel", get(crate::api::channel::candidate_channel))
}

pub(crate) async fn load_session(
    state: &AppState,
    session_id: &str,
) -> Result<ExamSession, ApiError> {
    state
        .store()
        .find_session(session_id)
        .await
        .map_err(IntegrityError::from)?
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))
}

async fn start_session(
    Path(exam_id): Path<String>,
    candidate: CurrentCandidate,
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, ApiError> {
    let started = session_lifecycle::start_session(
        &state,
        &exam_id,
        candidate.identity,
        primitive_now_utc(),
    )
    .await?;
    tracing::debug!(
        exam_id,
        subject = %candidate.subject,
        resumed = started.resumed,
        "Session start requested"
    );

    Ok(Json(SessionResponse::from_session(started.session, Some(started.resumed))))
}

async fn get_session(
    Path(session_id): Path<String>,
    CurrentPrincipal(claims): CurrentPrincipal,
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = load_session(&state, &session_id).await?;
    require_owner_or_staff(&session, &claims)?;

    Ok(Json(SessionResponse::from_session(session, None)))
}

async fn autosave(
    Path(session_id): Path<String>,
    candidate: CurrentCandidate,
    State(state): State<AppState>,
    Json(payload): Json<AutosaveRequest>,
) -> Result<Json<AutosaveResponse>, ApiError> {
    validate_payload(&payload)?;
    let session = load_session(&state, &session_id).await?;
    require_owner(&session, &candidate.identity)?;

    let now = primitive_now_utc();
    let outcome =
        session_lifecycle::autosave(&state, &session_id, stamp_answers(payload.answers, now), now)
            .await?;
    if outcome.rate_limited {
        return Err(ApiError::TooManyRequests("Autosave rate limit exceeded"));
    }

    Ok(Json(AutosaveResponse { saved: outcome.saved, status: outcome.status }))
}

async fn record_violation(
    Path(session_id): Path<String>,
    candidate: CurrentCandidate,
    State(state): State<AppState>,
    Json(payload): Json<ViolationRequest>,
) -> Result<Json<ViolationOutcome>, ApiError> {
    validate_payload(&payload)?;
    validate_violation_kind(&payload.kind)?;
    let session = load_session(&state, &session_id).await?;
    require_owner(&session, &candidate.identity)?;

    let outcome = integrity_monitor::record_violation(
        &state,
        &session_id,
        &payload.kind,
        payload.detail,
        primitive_now_utc(),
    )
    .await?;

    Ok(Json(outcome))
}

async fn list_violations(
    Path(session_id): Path<String>,
    CurrentStaff(_staff): CurrentStaff,
    State(state): State<AppState>,
) -> Result<Json<Vec<ViolationResponse>>, ApiError> {
    load_session(&state, &session_id).await?;
    let violations =
        state.store().list_violations(&session_id).await.map_err(IntegrityError::from)?;

    Ok(Json(violations.into_iter().map(ViolationResponse::from).collect()))
}

async fn submit(
    Path(session_id): Path<String>,
    candidate: CurrentCandidate,
    State(state): State<AppState>,
    payload: Option<Json<SubmitRequest>>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();
    validate_payload(&payload)?;
    let session = load_session(&state, &session_id).await?;
    require_owner(&session, &candidate.identity)?;

    let now = primitive_now_utc();
    let answers = payload.answers.map(|answers| stamp_answers(answers, now));
    let outcome =
        submission_coordinator::submit(&state, &session_id, answers, SubmitReason::Candidate, now)
            .await?;

    let show_score =
        outcome.exam.policies.shows_score(outcome.result.status == ResultStatus::Published);
    Ok(Json(SubmitResponse::new(&outcome.session, &outcome.result, outcome.replayed, show_score)))
}
