use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{
    CandidateKind, QuestionType, ResultStatus, SessionStatus, ViolationSeverity,
};
use crate::services::exam_policy::ExamPolicies;
use crate::services::grading::GradeReport;

/// Who is sitting the exam. Exactly one shape is ever populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum CandidateIdentity {
    Enrolled { user_id: String },
    Guest { invitation_id: String, contact: String },
}

impl CandidateIdentity {
    /// Stable key used by the result uniqueness constraint.
    pub(crate) fn key(&self) -> String {
        match self {
            Self::Enrolled { user_id } => format!("user:{user_id}"),
            Self::Guest { invitation_id, .. } => format!("guest:{invitation_id}"),
        }
    }

    pub(crate) fn kind(&self) -> CandidateKind {
        match self {
            Self::Enrolled { .. } => CandidateKind::Enrolled,
            Self::Guest { .. } => CandidateKind::Guest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnswerPayload {
    SingleChoice { option_id: String },
    MultiChoice { option_ids: Vec<String> },
    FreeText { text: String },
    Code {
        #[serde(default)]
        language: Option<String>,
        source: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RecordedAnswer {
    pub(crate) payload: AnswerPayload,
    pub(crate) answered_at: PrimitiveDateTime,
}

/// Question id to latest answer. Ordered so serialized snapshots are stable.
pub(crate) type AnswerMap = BTreeMap<String, RecordedAnswer>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExamSession {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) candidate: CandidateIdentity,
    pub(crate) status: SessionStatus,
    pub(crate) warning_count: i32,
    pub(crate) start_time: PrimitiveDateTime,
    pub(crate) end_time: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) question_order: Vec<String>,
    pub(crate) answers: AnswerMap,
    pub(crate) attempt_number: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl ExamSession {
    pub(crate) fn result_key(&self) -> ResultKey {
        ResultKey {
            exam_id: self.exam_id.clone(),
            candidate_key: self.candidate.key(),
            attempt_number: self.attempt_number,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Violation {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) kind: String,
    pub(crate) detail: sqlx::types::Json<serde_json::Value>,
    pub(crate) severity: ViolationSeverity,
    pub(crate) description: String,
    pub(crate) triggered_auto_submit: bool,
    pub(crate) detected_at: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub(crate) struct ExamConfig {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) duration_minutes: i32,
    pub(crate) policies: ExamPolicies,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct QuestionOption {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) is_correct: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) question_type: QuestionType,
    pub(crate) marks: f64,
    pub(crate) negative_marks: f64,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) expected_answers: Vec<String>,
    pub(crate) order_index: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ResultKey {
    pub(crate) exam_id: String,
    pub(crate) candidate_key: String,
    pub(crate) attempt_number: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExamResult {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) exam_id: String,
    pub(crate) candidate_key: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: ResultStatus,
    pub(crate) report: GradeReport,
    pub(crate) content_digest: String,
    pub(crate) rank: Option<i32>,
    pub(crate) percentile: Option<f64>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) published_at: Option<PrimitiveDateTime>,
}

impl ExamResult {
    pub(crate) fn key(&self) -> ResultKey {
        ResultKey {
            exam_id: self.exam_id.clone(),
            candidate_key: self.candidate_key.clone(),
            attempt_number: self.attempt_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_keys_do_not_collide_across_variants() {
        let enrolled = CandidateIdentity::Enrolled { user_id: "42".to_string() };
        let guest = CandidateIdentity::Guest {
            invitation_id: "42".to_string(),
            contact: "guest@example.com".to_string(),
        };

        assert_eq!(enrolled.key(), "user:42");
        assert_eq!(guest.key(), "guest:42");
        assert_eq!(guest.kind(), CandidateKind::Guest);
    }

    #[test]
    fn answer_payload_uses_explicit_tags() {
        let payload: AnswerPayload =
            serde_json::from_value(json!({"type": "multi_choice", "option_ids": ["a", "c"]}))
                .expect("payload");
        assert_eq!(
            payload,
            AnswerPayload::MultiChoice { option_ids: vec!["a".to_string(), "c".to_string()] }
        );

        let unknown = serde_json::from_value::<AnswerPayload>(json!({"option_id": "a"}));
        assert!(unknown.is_err());
    }

    #[test]
    fn identity_rejects_mixed_shapes() {
        let parsed = serde_json::from_value::<CandidateIdentity>(
            json!({"kind": "enrolled", "invitation_id": "i-1", "contact": "x"}),
        );
        assert!(parsed.is_err());
    }
}
