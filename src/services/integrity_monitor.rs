use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::db::types::SessionStatus;
use crate::repositories::store::{AppendedViolation, NewViolation};
use crate::services::deadline;
use crate::services::notifier::{CandidateEvent, MonitorEvent};
use crate::services::submission_coordinator::{self, SubmitReason};
use crate::services::violation_classifier::{classify, ViolationKind};
use crate::services::IntegrityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Rejection {
    SessionTerminal,
    ProctoringDisabled,
    DeadlinePassed,
}

impl Rejection {
    fn as_str(self) -> &'static str {
        match self {
            Self::SessionTerminal => "session_terminal",
            Self::ProctoringDisabled => "proctoring_disabled",
            Self::DeadlinePassed => "deadline_passed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ViolationOutcome {
    pub(crate) accepted: bool,
    pub(crate) warning_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_warnings: Option<i32>,
    pub(crate) forced_submit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) rejection: Option<Rejection>,
}

impl ViolationOutcome {
    fn rejected(reason: Rejection, warning_count: i32, max_warnings: Option<i32>) -> Self {
        metrics::counter!("violations_rejected_total", "reason" => reason.as_str()).increment(1);
        Self {
            accepted: false,
            warning_count,
            max_warnings,
            forced_submit: false,
            message: None,
            rejection: Some(reason),
        }
    }
}

pub(crate) async fn record_violation(
    state: &AppState,
    session_id: &str,
    raw_kind: &str,
    detail: Value,
    now: time::PrimitiveDateTime,
) -> Result<ViolationOutcome, IntegrityError> {
    let store = state.store();
    let session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| IntegrityError::SessionNotFound(session_id.to_string()))?;

    if session.status.is_terminal() {
        tracing::debug!(session_id, status = session.status.as_str(), "Dropping late violation");
        return Ok(ViolationOutcome::rejected(Rejection::SessionTerminal, session.warning_count, None));
    }

    let exam = store
        .find_exam(&session.exam_id)
        .await?
        .ok_or_else(|| IntegrityError::ExamConfigMissing(session.exam_id.clone()))?;
    let proctoring = &exam.policies.proctoring;
    let limit = proctoring.warning_limit;

    if !proctoring.enabled {
        return Ok(ViolationOutcome::rejected(
            Rejection::ProctoringDisabled,
            session.warning_count,
            Some(limit),
        ));
    }

    if deadline::check(session.end_time, now, &exam.policies.late_submission).is_expired() {
        let outcome = submission_coordinator::submit(
            state,
            session_id,
            None,
            SubmitReason::Deadline,
            now,
        )
        .await?;
        return Ok(ViolationOutcome::rejected(
            Rejection::DeadlinePassed,
            outcome.session.warning_count,
            Some(limit),
        ));
    }

    let kind = ViolationKind::parse(raw_kind);
    let classification = classify(&kind);
    let violation = NewViolation {
        id: Uuid::new_v4().to_string(),
        kind: kind.as_str().to_string(),
        detail,
        severity: classification.severity,
        description: classification.description.clone(),
        detected_at: now,
    };

    let Some(appended) = append_with_retry(state, session_id, violation).await? else {
        // The session went terminal between the read above and the append.
        let current = store.find_session(session_id).await?;
        let count = current.map_or(session.warning_count, |session| session.warning_count);
        return Ok(ViolationOutcome::rejected(Rejection::SessionTerminal, count, Some(limit)));
    };

    let warning_count = appended.warning_count;
    metrics::counter!("violations_recorded_total", "severity" => classification.severity.as_str())
        .increment(1);
    tracing::info!(
        session_id,
        exam_id = %session.exam_id,
        kind = kind.as_str(),
        severity = classification.severity.as_str(),
        warning_count,
        warning_limit = limit,
        "Violation recorded"
    );

    let mut forced_submit = false;
    let mut forced_reason = None;
    if warning_count >= limit && proctoring.auto_submit {
        let reason = SubmitReason::ViolationLimit { count: warning_count, limit };
        let outcome =
            submission_coordinator::submit(state, session_id, None, reason.clone(), now).await?;
        if outcome.transitioned && outcome.session.status == SessionStatus::AutoSubmitted {
            store.mark_violation_trigger(&appended.violation.id).await?;
            forced_submit = true;
            forced_reason = Some(reason.to_string());
        }
    }

    let notifier = state.notifier();
    notifier.notify_candidate(
        session_id,
        CandidateEvent::Warning {
            warning_count,
            max_warnings: limit,
            kind: kind.as_str().to_string(),
            message: classification.description.clone(),
        },
    );
    if let Some(reason) = &forced_reason {
        notifier.notify_candidate(
            session_id,
            CandidateEvent::ForcedSubmit {
                reason: reason.clone(),
                warning_count,
                message: format!("Your exam was submitted automatically: {reason}"),
            },
        );
    }
    notifier.publish_monitor(
        &session.exam_id,
        MonitorEvent::ViolationRecorded {
            session_id: session_id.to_string(),
            kind: kind.as_str().to_string(),
            severity: classification.severity,
            description: classification.description.clone(),
            warning_count,
            max_warnings: limit,
            forced_submit,
        },
    );

    Ok(ViolationOutcome {
        accepted: true,
        warning_count,
        max_warnings: Some(limit),
        forced_submit,
        message: Some(forced_reason.unwrap_or(classification.description)),
        rejection: None,
    })
}

/// The counter increment is retried on contention and never silently skipped.
async fn append_with_retry(
    state: &AppState,
    session_id: &str,
    violation: NewViolation,
) -> Result<Option<AppendedViolation>, IntegrityError> {
    let attempts = state.settings().integrity().counter_retry_attempts.max(1);
    let mut attempt = 1;
    loop {
        match state.store().append_violation(session_id, violation.clone()).await {
            Ok(appended) => return Ok(appended),
            Err(err) if err.is_retryable() => {
                if attempt >= attempts {
                    tracing::error!(session_id, attempts, error = %err, "Warning counter contention");
                    return Err(IntegrityError::ContentionExhausted {
                        operation: "warning counter increment",
                        attempts,
                    });
                }
                metrics::counter!("counter_increment_retries_total").increment(1);
                tracing::warn!(session_id, attempt, error = %err, "Retrying warning counter increment");
                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
