use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Policies read from `exams.settings`. Missing sections fall back to defaults so older
/// exams without proctoring keys still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ExamPolicies {
    pub(crate) grading: GradingPolicy,
    pub(crate) proctoring: ProctoringPolicy,
    pub(crate) late_submission: LateSubmissionPolicy,
    pub(crate) result_visibility: ResultVisibility,
    pub(crate) shuffle_questions: bool,
    pub(crate) max_attempts: i32,
}

impl Default for ExamPolicies {
    fn default() -> Self {
        Self {
            grading: GradingPolicy::default(),
            proctoring: ProctoringPolicy::default(),
            late_submission: LateSubmissionPolicy::default(),
            result_visibility: ResultVisibility::default(),
            shuffle_questions: false,
            max_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct GradingPolicy {
    /// Zero means "sum of question marks".
    pub(crate) total_marks: f64,
    pub(crate) passing_marks: f64,
    pub(crate) negative_marking: bool,
    /// Exam-wide deduction used when a question carries no deduction of its own.
    pub(crate) negative_marks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ProctoringPolicy {
    pub(crate) enabled: bool,
    pub(crate) warning_limit: i32,
    pub(crate) auto_submit: bool,
}

impl Default for ProctoringPolicy {
    fn default() -> Self {
        Self { enabled: false, warning_limit: 3, auto_submit: true }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct LateSubmissionPolicy {
    pub(crate) allowed: bool,
    /// Minutes after the session end time during which late work is still accepted.
    /// `None` leaves the window open.
    pub(crate) deadline_minutes: Option<i64>,
    pub(crate) penalty_marks: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ResultVisibility {
    #[default]
    Immediate,
    AfterPublish,
    /// Recruitment style: candidates only ever get a confirmation.
    ConfirmationOnly,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid exam settings: {0}")]
pub(crate) struct PolicyError(String);

impl ExamPolicies {
    pub(crate) fn from_exam_settings(settings: &Value) -> Result<Self, PolicyError> {
        let policies = match settings {
            Value::Null => Self::default(),
            other => serde_json::from_value::<Self>(other.clone())
                .map_err(|err| PolicyError(err.to_string()))?,
        };
        policies.validate()
    }

    fn validate(self) -> Result<Self, PolicyError> {
        if self.proctoring.enabled && self.proctoring.warning_limit < 1 {
            return Err(PolicyError("proctoring.warning_limit must be at least 1".to_string()));
        }
        if self.grading.total_marks < 0.0 || self.grading.passing_marks < 0.0 {
            return Err(PolicyError("grading marks must be non-negative".to_string()));
        }
        if self.grading.negative_marks < 0.0 || self.late_submission.penalty_marks < 0.0 {
            return Err(PolicyError("deductions are expressed as non-negative marks".to_string()));
        }
        if self.late_submission.deadline_minutes.is_some_and(|minutes| minutes < 0) {
            return Err(PolicyError("late_submission.deadline_minutes must be >= 0".to_string()));
        }
        if self.max_attempts < 1 {
            return Err(PolicyError("max_attempts must be at least 1".to_string()));
        }
        Ok(self)
    }

    /// Whether score fields may be returned to the candidate right now.
    pub(crate) fn shows_score(&self, published: bool) -> bool {
        match self.result_visibility {
            ResultVisibility::Immediate => true,
            ResultVisibility::AfterPublish => published,
            ResultVisibility::ConfirmationOnly => false,
        }
    }
}
