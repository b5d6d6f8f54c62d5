use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::db::models::{AnswerMap, CandidateIdentity, ExamConfig, ExamSession};
use crate::db::types::SessionStatus;
use crate::repositories::store::{NewSession, SessionStart, StoreError};
use crate::services::deadline;
use crate::services::notifier::MonitorEvent;
use crate::services::submission_coordinator::{self, SubmitReason};
use crate::services::IntegrityError;

const AUTOSAVE_BURST: u64 = 3;

#[derive(Debug, Clone)]
pub(crate) struct StartedSession {
    pub(crate) session: ExamSession,
    pub(crate) exam: ExamConfig,
    pub(crate) resumed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AutosaveOutcome {
    pub(crate) saved: bool,
    pub(crate) status: SessionStatus,
    pub(crate) rate_limited: bool,
}

/// Returns the candidate's in-progress attempt, or opens the next one. A resumed attempt
/// that is already past its deadline is timed out first.
pub(crate) async fn start_session(
    state: &AppState,
    exam_id: &str,
    candidate: CandidateIdentity,
    now: time::PrimitiveDateTime,
) -> Result<StartedSession, IntegrityError> {
    let store = state.store();
    let exam = store
        .find_exam(exam_id)
        .await?
        .ok_or_else(|| IntegrityError::ExamConfigMissing(exam_id.to_string()))?;

    let mut question_order: Vec<String> =
        store.list_questions(exam_id).await?.into_iter().map(|question| question.id).collect();
    if exam.policies.shuffle_questions {
        question_order.shuffle(&mut rand::thread_rng());
    }

    let new_session = NewSession {
        id: Uuid::new_v4().to_string(),
        exam_id: exam_id.to_string(),
        candidate,
        start_time: now,
        end_time: deadline::hard_deadline(now, exam.duration_minutes),
        question_order,
        max_attempts: exam.policies.max_attempts,
    };

    let mut expired_retry = false;
    loop {
        match create_with_retry(state, &new_session, now).await? {
            SessionStart::Created(session) => {
                tracing::info!(
                    session_id = %session.id,
                    exam_id,
                    attempt_number = session.attempt_number,
                    "Session started"
                );
                state.notifier().publish_monitor(
                    exam_id,
                    MonitorEvent::SessionStarted {
                        session_id: session.id.clone(),
                        candidate_key: session.candidate.key(),
                        attempt_number: session.attempt_number,
                    },
                );
                return Ok(StartedSession { session, exam, resumed: false });
            }
            SessionStart::Resumed(session) => {
                let check =
                    deadline::check(session.end_time, now, &exam.policies.late_submission);
                if !check.is_expired() || expired_retry {
                    return Ok(StartedSession { session, exam, resumed: true });
                }
                submission_coordinator::submit(state, &session.id, None, SubmitReason::Deadline, now)
                    .await?;
                expired_retry = true;
            }
            SessionStart::AttemptsExhausted { attempts } => {
                return Err(IntegrityError::AttemptsExhausted { attempts });
            }
        }
    }
}

async fn create_with_retry(
    state: &AppState,
    new_session: &NewSession,
    now: time::PrimitiveDateTime,
) -> Result<SessionStart, IntegrityError> {
    let attempts = state.settings().integrity().counter_retry_attempts.max(1);
    let mut attempt = 1;
    loop {
        match state.store().create_session(new_session.clone(), now).await {
            Ok(start) => return Ok(start),
            Err(err) if err.is_retryable() && attempt < attempts => {
                tracing::warn!(exam_id = %new_session.exam_id, attempt, error = %err, "Retrying session creation");
                attempt += 1;
            }
            Err(err @ StoreError::Contention(_)) => {
                tracing::error!(exam_id = %new_session.exam_id, error = %err, "Session creation contended");
                return Err(IntegrityError::ContentionExhausted {
                    operation: "session creation",
                    attempts,
                });
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Last-write-wins merge of in-progress answers, rate limited per session.
pub(crate) async fn autosave(
    state: &AppState,
    session_id: &str,
    mut answers: AnswerMap,
    now: time::PrimitiveDateTime,
) -> Result<AutosaveOutcome, IntegrityError> {
    let store = state.store();
    let session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| IntegrityError::SessionNotFound(session_id.to_string()))?;

    if session.status.is_terminal() {
        return Ok(AutosaveOutcome { saved: false, status: session.status, rate_limited: false });
    }

    let exam = store
        .find_exam(&session.exam_id)
        .await?
        .ok_or_else(|| IntegrityError::ExamConfigMissing(session.exam_id.clone()))?;

    if deadline::check(session.end_time, now, &exam.policies.late_submission).is_expired() {
        let outcome =
            submission_coordinator::submit(state, session_id, None, SubmitReason::Deadline, now)
                .await?;
        return Ok(AutosaveOutcome {
            saved: false,
            status: outcome.session.status,
            rate_limited: false,
        });
    }

    let window = state.settings().integrity().auto_save_interval_seconds;
    let key = format!("examguard:autosave:{session_id}");
    let allowed = match state.redis().rate_limit(&key, AUTOSAVE_BURST, window).await {
        Ok(allowed) => allowed,
        Err(err) => {
            tracing::warn!(session_id, error = %err, "Autosave rate limiter unavailable");
            true
        }
    };
    if !allowed {
        return Ok(AutosaveOutcome {
            saved: false,
            status: session.status,
            rate_limited: true,
        });
    }

    let before = answers.len();
    answers.retain(|question_id, _| session.question_order.contains(question_id));
    if answers.len() != before {
        tracing::debug!(
            session_id,
            dropped = before - answers.len(),
            "Ignoring answers for questions not presented in this session"
        );
    }
    if answers.is_empty() {
        return Ok(AutosaveOutcome { saved: true, status: session.status, rate_limited: false });
    }

    let saved = store.save_answers(session_id, &answers, now).await?;
    let status = if saved {
        SessionStatus::InProgress
    } else {
        store
            .find_session(session_id)
            .await?
            .map_or(session.status, |current| current.status)
    };

    Ok(AutosaveOutcome { saved, status, rate_limited: false })
}
