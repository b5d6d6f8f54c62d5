use thiserror::Error;

use crate::repositories::store::StoreError;
use crate::services::grading::ManualGradeError;

/// Failures surfaced by the integrity services. Already-terminal sessions and duplicate
/// results are not errors; they route to idempotent replay.
#[derive(Debug, Error)]
pub(crate) enum IntegrityError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("exam {0} has no configuration")]
    ExamConfigMissing(String),
    #[error("result {0} not found")]
    ResultNotFound(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("maximum attempts reached ({attempts})")]
    AttemptsExhausted { attempts: i32 },
    #[error(transparent)]
    ManualGrade(#[from] ManualGradeError),
    #[error("{operation} still contended after {attempts} attempts")]
    ContentionExhausted { operation: &'static str, attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}
