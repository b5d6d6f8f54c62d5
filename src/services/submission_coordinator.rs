use std::fmt;

use uuid::Uuid;

use crate::core::state::AppState;
use crate::db::models::{AnswerMap, ExamConfig, ExamResult, ExamSession};
use crate::db::types::{ResultStatus, SessionStatus};
use crate::repositories::store::{FinalizeOutcome, SessionFinalize, StoreError};
use crate::services::deadline;
use crate::services::grading;
use crate::services::notifier::{CandidateEvent, MonitorEvent};
use crate::services::ranking;
use crate::services::IntegrityError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubmitReason {
    Candidate,
    ViolationLimit { count: i32, limit: i32 },
    Deadline,
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Candidate => f.write_str("candidate"),
            Self::ViolationLimit { count, limit } => {
                write!(f, "violation limit exceeded ({count}/{limit})")
            }
            Self::Deadline => f.write_str("deadline passed"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SubmitOutcome {
    pub(crate) session: ExamSession,
    pub(crate) exam: ExamConfig,
    pub(crate) result: ExamResult,
    /// This call performed the terminal transition.
    pub(crate) transitioned: bool,
    /// The result already existed and was returned unchanged.
    pub(crate) replayed: bool,
}

/// The only path that ends a session. Safe to call any number of times, from any entry
/// point, concurrently: every caller ends up with the one persisted result.
pub(crate) async fn submit(
    state: &AppState,
    session_id: &str,
    answers: Option<AnswerMap>,
    reason: SubmitReason,
    now: time::PrimitiveDateTime,
) -> Result<SubmitOutcome, IntegrityError> {
    let store = state.store();
    let session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| IntegrityError::SessionNotFound(session_id.to_string()))?;
    let exam = store
        .find_exam(&session.exam_id)
        .await?
        .ok_or_else(|| IntegrityError::ExamConfigMissing(session.exam_id.clone()))?;

    let (session, transitioned) = if session.status.is_terminal() {
        (session, false)
    } else {
        transition(state, &session, &exam, answers, &reason, now).await?
    };

    if session.status == SessionStatus::Abandoned {
        let existing = store.find_result(&session.result_key()).await?;
        return match existing {
            Some(result) => {
                Ok(SubmitOutcome { session, exam, result, transitioned, replayed: true })
            }
            None => Err(IntegrityError::InvalidTransition(format!(
                "session {} was abandoned",
                session.id
            ))),
        };
    }

    let (result, replayed) = find_or_create_result(state, &session, &exam, now).await?;
    Ok(SubmitOutcome { session, exam, result, transitioned, replayed })
}

async fn transition(
    state: &AppState,
    session: &ExamSession,
    exam: &ExamConfig,
    answers: Option<AnswerMap>,
    reason: &SubmitReason,
    now: time::PrimitiveDateTime,
) -> Result<(ExamSession, bool), IntegrityError> {
    let expired =
        deadline::check(session.end_time, now, &exam.policies.late_submission).is_expired();

    let finalize = if expired || *reason == SubmitReason::Deadline {
        // Work after the hard deadline is not accepted, so nothing late is merged.
        SessionFinalize {
            status: SessionStatus::TimedOut,
            submitted_at: Some(session.end_time.min(now)),
            answers: None,
            now,
        }
    } else {
        let status = match reason {
            SubmitReason::Candidate => SessionStatus::Completed,
            SubmitReason::ViolationLimit { .. } => SessionStatus::AutoSubmitted,
            SubmitReason::Deadline => SessionStatus::TimedOut,
        };
        SessionFinalize {
            status,
            submitted_at: Some(now),
            // The forced path never overwrites answers.
            answers: answers.filter(|_| *reason == SubmitReason::Candidate),
            now,
        }
    };
    let target = finalize.status;

    match state.store().finalize_session(&session.id, finalize).await? {
        FinalizeOutcome::Transitioned(updated) => {
            metrics::counter!("sessions_finalized_total", "status" => target.as_str())
                .increment(1);
            tracing::info!(
                session_id = %updated.id,
                exam_id = %updated.exam_id,
                status = target.as_str(),
                reason = %reason,
                "Session finalized"
            );
            state.notifier().publish_monitor(
                &updated.exam_id,
                MonitorEvent::SessionFinalized {
                    session_id: updated.id.clone(),
                    status: target,
                    reason: reason.to_string(),
                },
            );
            state
                .notifier()
                .notify_candidate(&updated.id, CandidateEvent::SessionClosed { status: target });
            Ok((updated, true))
        }
        FinalizeOutcome::AlreadyTerminal(current) => {
            tracing::debug!(
                session_id = %current.id,
                status = current.status.as_str(),
                "Lost the terminal transition race; replaying"
            );
            Ok((current, false))
        }
        FinalizeOutcome::NotFound => Err(IntegrityError::SessionNotFound(session.id.clone())),
    }
}

/// Find-or-create keyed by (exam, candidate, attempt). A losing insert re-reads the winner.
async fn find_or_create_result(
    state: &AppState,
    session: &ExamSession,
    exam: &ExamConfig,
    now: time::PrimitiveDateTime,
) -> Result<(ExamResult, bool), IntegrityError> {
    let store = state.store();
    let key = session.result_key();

    if let Some(existing) = store.find_result(&key).await? {
        metrics::counter!("results_replayed_total").increment(1);
        return Ok((existing, true));
    }

    let questions = store.list_questions(&exam.id).await?;
    let report = grading::grade(session, exam, &questions);
    let result = ExamResult {
        id: Uuid::new_v4().to_string(),
        session_id: session.id.clone(),
        exam_id: session.exam_id.clone(),
        candidate_key: key.candidate_key.clone(),
        attempt_number: session.attempt_number,
        status: report.status(),
        content_digest: report.digest(),
        report,
        rank: None,
        percentile: None,
        created_at: now,
        updated_at: now,
        published_at: None,
    };

    if !store.insert_result(&result).await? {
        let winner = store.find_result(&key).await?.ok_or_else(|| {
            StoreError::Corrupt(format!("result insert for session {} lost to nothing", session.id))
        })?;
        metrics::counter!("results_replayed_total").increment(1);
        tracing::info!(
            session_id = %session.id,
            result_id = %winner.id,
            "Concurrent submission already produced the result"
        );
        return Ok((winner, true));
    }

    metrics::counter!("results_created_total").increment(1);
    tracing::info!(
        session_id = %session.id,
        result_id = %result.id,
        status = ?result.status,
        clamped_total = result.report.score.clamped_total,
        "Result created"
    );

    if result.status == ResultStatus::Graded {
        if let Err(err) = ranking::recompute_ranks(state, &exam.id).await {
            tracing::error!(exam_id = %exam.id, error = %err, "Rank recomputation failed");
        }
    }

    Ok((result, false))
}
