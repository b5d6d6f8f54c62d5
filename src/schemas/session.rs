use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{AnswerMap, AnswerPayload, ExamResult, ExamSession, RecordedAnswer, Violation};
use crate::db::types::{ResultStatus, SessionStatus, ViolationSeverity};

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) payload: AnswerPayload,
    pub(crate) answered_at: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) candidate_key: String,
    pub(crate) status: SessionStatus,
    pub(crate) warning_count: i32,
    pub(crate) start_time: String,
    pub(crate) end_time: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) question_order: Vec<String>,
    pub(crate) answers: BTreeMap<String, AnswerResponse>,
    pub(crate) attempt_number: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) resumed: Option<bool>,
}

impl SessionResponse {
    pub(crate) fn from_session(session: ExamSession, resumed: Option<bool>) -> Self {
        let candidate_key = session.candidate.key();
        let answers = session
            .answers
            .into_iter()
            .map(|(question_id, answer)| {
                (
                    question_id,
                    AnswerResponse {
                        payload: answer.payload,
                        answered_at: format_primitive(answer.answered_at),
                    },
                )
            })
            .collect();

        Self {
            id: session.id,
            exam_id: session.exam_id,
            candidate_key,
            status: session.status,
            warning_count: session.warning_count,
            start_time: format_primitive(session.start_time),
            end_time: format_primitive(session.end_time),
            submitted_at: session.submitted_at.map(format_primitive),
            question_order: session.question_order,
            answers,
            attempt_number: session.attempt_number,
            resumed,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AutosaveRequest {
    #[validate(length(max = 500))]
    pub(crate) answers: BTreeMap<String, AnswerPayload>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AutosaveResponse {
    pub(crate) saved: bool,
    pub(crate) status: SessionStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ViolationRequest {
    #[validate(length(min = 1, max = 64))]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) detail: serde_json::Value,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub(crate) struct SubmitRequest {
    #[serde(default)]
    #[validate(length(max = 500))]
    pub(crate) answers: Option<BTreeMap<String, AnswerPayload>>,
}

/// Score fields are flattened into the submit response and all withheld together.
#[derive(Debug, Serialize)]
pub(crate) struct ScoreSummary {
    pub(crate) score: f64,
    pub(crate) total_marks: f64,
    pub(crate) passing_marks: f64,
    pub(crate) passed: bool,
    pub(crate) percentage: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    pub(crate) submitted: bool,
    pub(crate) session_id: String,
    pub(crate) status: SessionStatus,
    pub(crate) submitted_at: Option<String>,
    pub(crate) result_id: String,
    pub(crate) result_status: ResultStatus,
    pub(crate) replayed: bool,
    /// Absent when the exam's visibility policy withholds scores.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub(crate) score: Option<ScoreSummary>,
}

impl SubmitResponse {
    pub(crate) fn new(
        session: &ExamSession,
        result: &ExamResult,
        replayed: bool,
        show_score: bool,
    ) -> Self {
        let score = show_score.then(|| ScoreSummary {
            score: result.report.score.clamped_total,
            total_marks: result.report.score.total_possible,
            passing_marks: result.report.score.passing_marks,
            passed: result.report.score.passed,
            percentage: result.report.score.percentage,
        });

        Self {
            submitted: true,
            session_id: session.id.clone(),
            status: session.status,
            submitted_at: session.submitted_at.map(format_primitive),
            result_id: result.id.clone(),
            result_status: result.status,
            replayed,
            score,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ViolationResponse {
    pub(crate) id: String,
    pub(crate) kind: String,
    pub(crate) detail: serde_json::Value,
    pub(crate) severity: ViolationSeverity,
    pub(crate) description: String,
    pub(crate) triggered_auto_submit: bool,
    pub(crate) detected_at: String,
}

impl From<Violation> for ViolationResponse {
    fn from(violation: Violation) -> Self {
        Self {
            id: violation.id,
            kind: violation.kind,
            detail: violation.detail.0,
            severity: violation.severity,
            description: violation.description,
            triggered_auto_submit: violation.triggered_auto_submit,
            detected_at: format_primitive(violation.detected_at),
        }
    }
}

/// Server-side receipt time is the answer timestamp; client clocks are not trusted.
pub(crate) fn stamp_answers(
    answers: BTreeMap<String, AnswerPayload>,
    now: PrimitiveDateTime,
) -> AnswerMap {
    answers
        .into_iter()
        .map(|(question_id, payload)| (question_id, RecordedAnswer { payload, answered_at: now }))
        .collect()
}
