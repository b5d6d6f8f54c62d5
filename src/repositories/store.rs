//! The single synchronized access layer for sessions, violations and results.
//!
//! Callers never read-modify-write a session. Every mutation is one of the atomic
//! operations below, each of which is conditional on the session still being in progress
//! (or, for results, on the uniqueness key / content digest the caller observed).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{
    AnswerMap, CandidateIdentity, ExamConfig, ExamResult, ExamSession, Question, ResultKey,
    Violation,
};
use crate::db::types::{SessionStatus, ViolationSeverity};

pub(crate) type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to (de)serialize stored document: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("write contention on {0}")]
    Contention(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Serialization failures and deadlocks are safe to retry from the top.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            Self::Contention(_) => true,
            Self::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            Self::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NewSession {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) candidate: CandidateIdentity,
    pub(crate) start_time: PrimitiveDateTime,
    pub(crate) end_time: PrimitiveDateTime,
    pub(crate) question_order: Vec<String>,
    pub(crate) max_attempts: i32,
}

#[derive(Debug, Clone)]
pub(crate) enum SessionStart {
    Created(ExamSession),
    /// An attempt for this exam and candidate is still in progress.
    Resumed(ExamSession),
    AttemptsExhausted { attempts: i32 },
}

#[derive(Debug, Clone)]
pub(crate) struct NewViolation {
    pub(crate) id: String,
    pub(crate) kind: String,
    pub(crate) detail: Value,
    pub(crate) severity: ViolationSeverity,
    pub(crate) description: String,
    pub(crate) detected_at: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub(crate) struct AppendedViolation {
    pub(crate) violation: Violation,
    /// Counter value after this append; equals the number of accepted violations.
    pub(crate) warning_count: i32,
}

#[derive(Debug, Clone)]
pub(crate) struct SessionFinalize {
    pub(crate) status: SessionStatus,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    /// Final answers merged in the same step as the transition.
    pub(crate) answers: Option<AnswerMap>,
    pub(crate) now: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub(crate) enum FinalizeOutcome {
    Transitioned(ExamSession),
    AlreadyTerminal(ExamSession),
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RankAssignment {
    pub(crate) result_id: String,
    pub(crate) rank: i32,
    pub(crate) percentile: f64,
}

/// Orders a cohort of rankable results. Runs inside the store's per-exam critical section.
pub(crate) type Ranker = fn(&[ExamResult]) -> Vec<RankAssignment>;

#[async_trait]
pub(crate) trait IntegrityStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn find_exam(&self, exam_id: &str) -> StoreResult<Option<ExamConfig>>;

    async fn list_questions(&self, exam_id: &str) -> StoreResult<Vec<Question>>;

    /// Resumes the in-progress attempt if one exists, otherwise creates attempt
    /// `existing + 1` unless `max_attempts` is reached.
    async fn create_session(
        &self,
        session: NewSession,
        now: PrimitiveDateTime,
    ) -> StoreResult<SessionStart>;

    async fn find_session(&self, session_id: &str) -> StoreResult<Option<ExamSession>>;

    async fn list_violations(&self, session_id: &str) -> StoreResult<Vec<Violation>>;

    /// Appends the violation and increments the warning counter by exactly one as a single
    /// unit. `None` when the session is missing or no longer in progress.
    async fn append_violation(
        &self,
        session_id: &str,
        violation: NewViolation,
    ) -> StoreResult<Option<AppendedViolation>>;

    async fn mark_violation_trigger(&self, violation_id: &str) -> StoreResult<()>;

    /// Last-write-wins merge per question. `false` once the session is terminal.
    async fn save_answers(
        &self,
        session_id: &str,
        answers: &AnswerMap,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool>;

    /// Compare-and-swap from `in_progress` to a terminal status.
    async fn finalize_session(
        &self,
        session_id: &str,
        finalize: SessionFinalize,
    ) -> StoreResult<FinalizeOutcome>;

    async fn list_stale_sessions(
        &self,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> StoreResult<Vec<ExamSession>>;

    async fn find_result(&self, key: &ResultKey) -> StoreResult<Option<ExamResult>>;

    async fn find_result_by_id(&self, result_id: &str) -> StoreResult<Option<ExamResult>>;

    /// `false` when a result for the same session or attempt key already exists.
    async fn insert_result(&self, result: &ExamResult) -> StoreResult<bool>;

    /// Overwrites the graded content only if the stored digest still matches and the
    /// result has not been published.
    async fn replace_result(
        &self,
        result: &ExamResult,
        expected_digest: &str,
    ) -> StoreResult<bool>;

    /// Graded to published. `None` when the result is missing or not graded.
    async fn publish_result(
        &self,
        result_id: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<Option<ExamResult>>;

    async fn list_results(&self, exam_id: &str) -> StoreResult<Vec<ExamResult>>;

    /// Loads the rankable cohort, ranks it with `ranker` and writes the assignments,
    /// serialized per exam.
    async fn rerank(&self, exam_id: &str, ranker: Ranker) -> StoreResult<Vec<RankAssignment>>;
}
