use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{AnswerMap, CandidateIdentity, ExamSession};
use crate::db::types::{CandidateKind, SessionStatus};
use crate::repositories::store::StoreError;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, candidate_kind, user_id, invitation_id, guest_contact, status, \
    warning_count, start_time, end_time, submitted_at, question_order, answers, \
    attempt_number, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SessionRow {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) candidate_kind: CandidateKind,
    pub(crate) user_id: Option<String>,
    pub(crate) invitation_id: Option<String>,
    pub(crate) guest_contact: Option<String>,
    pub(crate) status: SessionStatus,
    pub(crate) warning_count: i32,
    pub(crate) start_time: PrimitiveDateTime,
    pub(crate) end_time: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) question_order: Json<Vec<String>>,
    pub(crate) answers: Json<AnswerMap>,
    pub(crate) attempt_number: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl TryFrom<SessionRow> for ExamSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let candidate = match (row.candidate_kind, row.user_id, row.invitation_id, row.guest_contact)
        {
            (CandidateKind::Enrolled, Some(user_id), None, None) => {
                CandidateIdentity::Enrolled { user_id }
            }
            (CandidateKind::Guest, None, Some(invitation_id), Some(contact)) => {
                CandidateIdentity::Guest { invitation_id, contact }
            }
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "session {} has an inconsistent candidate identity",
                    row.id
                )))
            }
        };

        Ok(ExamSession {
            id: row.id,
            exam_id: row.exam_id,
            candidate,
            status: row.status,
            warning_count: row.warning_count,
            start_time: row.start_time,
            end_time: row.end_time,
            submitted_at: row.submitted_at,
            question_order: row.question_order.0,
            answers: row.answers.0,
            attempt_number: row.attempt_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) struct CreateSession<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) candidate: &'a CandidateIdentity,
    pub(crate) start_time: PrimitiveDateTime,
    pub(crate) end_time: PrimitiveDateTime,
    pub(crate) question_order: &'a [String],
    pub(crate) attempt_number: i32,
    pub(crate) now: PrimitiveDateTime,
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<SessionRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>(&format!("SELECT {COLUMNS} FROM exam_sessions WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Serializes session creation for one candidate on one exam until the transaction ends.
pub(crate) async fn acquire_candidate_lock(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    candidate_key: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("session:{exam_id}:{candidate_key}"))
        .execute(executor)
        .await?;
    Ok(())
}

pub(crate) async fn find_active(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    candidate_key: &str,
) -> Result<Option<SessionRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions \
         WHERE exam_id = $1 AND candidate_key = $2 AND status = $3 \
         ORDER BY attempt_number DESC LIMIT 1"
    ))
    .bind(exam_id)
    .bind(candidate_key)
    .bind(SessionStatus::InProgress)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn count_attempts(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    candidate_key: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM exam_sessions WHERE exam_id = $1 AND candidate_key = $2",
    )
    .bind(exam_id)
    .bind(candidate_key)
    .fetch_one(executor)
    .await
}

pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    session: CreateSession<'_>,
) -> Result<bool, StoreError> {
    let (user_id, invitation_id, guest_contact) = match session.candidate {
        CandidateIdentity::Enrolled { user_id } => (Some(user_id.as_str()), None, None),
        CandidateIdentity::Guest { invitation_id, contact } => {
            (None, Some(invitation_id.as_str()), Some(contact.as_str()))
        }
    };

    let result = sqlx::query(
        "INSERT INTO exam_sessions (
            id, exam_id, candidate_kind, user_id, invitation_id, guest_contact, candidate_key,
            status, warning_count, start_time, end_time, question_order, answers,
            attempt_number, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,0,$9,$10,$11,'{}'::jsonb,$12,$13,$13)
        ON CONFLICT DO NOTHING",
    )
    .bind(session.id)
    .bind(session.exam_id)
    .bind(session.candidate.kind())
    .bind(user_id)
    .bind(invitation_id)
    .bind(guest_contact)
    .bind(session.candidate.key())
    .bind(SessionStatus::InProgress)
    .bind(session.start_time)
    .bind(session.end_time)
    .bind(Json(session.question_order))
    .bind(session.attempt_number)
    .bind(session.now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Increment-and-fetch, conditional on the session still being in progress.
pub(crate) async fn increment_warning_count(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar(
        "UPDATE exam_sessions
         SET warning_count = warning_count + 1, updated_at = $3
         WHERE id = $1 AND status = $2
         RETURNING warning_count",
    )
    .bind(id)
    .bind(SessionStatus::InProgress)
    .bind(now)
    .fetch_optional(executor)
    .await
}

/// JSONB `||` replaces whole per-question entries, so the newest write wins per question.
pub(crate) async fn merge_answers(
    pool: &PgPool,
    id: &str,
    answers: &AnswerMap,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_sessions
         SET answers = answers || $3, updated_at = $4
         WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(SessionStatus::InProgress)
    .bind(Json(answers))
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn finalize(
    pool: &PgPool,
    id: &str,
    status: SessionStatus,
    submitted_at: Option<PrimitiveDateTime>,
    answers: Option<&AnswerMap>,
    now: PrimitiveDateTime,
) -> Result<Option<SessionRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>(&format!(
        "UPDATE exam_sessions
         SET status = $3,
             submitted_at = $4,
             answers = CASE WHEN $5::jsonb IS NULL THEN answers ELSE answers || $5::jsonb END,
             updated_at = $6
         WHERE id = $1 AND status = $2
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(SessionStatus::InProgress)
    .bind(status)
    .bind(submitted_at)
    .bind(answers.map(Json))
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_stale(
    pool: &PgPool,
    cutoff: PrimitiveDateTime,
    limit: i64,
) -> Result<Vec<SessionRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions
         WHERE status = $1 AND end_time < $2
         ORDER BY end_time
         LIMIT $3"
    ))
    .bind(SessionStatus::InProgress)
    .bind(cutoff)
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await
}
