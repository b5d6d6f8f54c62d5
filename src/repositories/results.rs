use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{ExamResult, ResultKey};
use crate::db::types::ResultStatus;
use crate::repositories::store::RankAssignment;
use crate::services::grading::GradeReport;

pub(crate) const COLUMNS: &str = "\
    id, session_id, exam_id, candidate_key, attempt_number, status, report, content_digest, \
    rank, percentile, created_at, updated_at, published_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ResultRow {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) exam_id: String,
    pub(crate) candidate_key: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: ResultStatus,
    pub(crate) report: Json<GradeReport>,
    pub(crate) content_digest: String,
    pub(crate) rank: Option<i32>,
    pub(crate) percentile: Option<f64>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) published_at: Option<PrimitiveDateTime>,
}

impl From<ResultRow> for ExamResult {
    fn from(row: ResultRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            exam_id: row.exam_id,
            candidate_key: row.candidate_key,
            attempt_number: row.attempt_number,
            status: row.status,
            report: row.report.0,
            content_digest: row.content_digest,
            rank: row.rank,
            percentile: row.percentile,
            created_at: row.created_at,
            updated_at: row.updated_at,
            published_at: row.published_at,
        }
    }
}

pub(crate) async fn find_by_key(
    pool: &PgPool,
    key: &ResultKey,
) -> Result<Option<ExamResult>, sqlx::Error> {
    let row = sqlx::query_as::<_, ResultRow>(&format!(
        "SELECT {COLUMNS} FROM exam_results
         WHERE exam_id = $1 AND candidate_key = $2 AND attempt_number = $3"
    ))
    .bind(&key.exam_id)
    .bind(&key.candidate_key)
    .bind(key.attempt_number)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(ExamResult::from))
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<ExamResult>, sqlx::Error> {
    let row = sqlx::query_as::<_, ResultRow>(&format!(
        "SELECT {COLUMNS} FROM exam_results WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(ExamResult::from))
}

/// Both the session and the attempt key are unique, so a racing second insert is a no-op.
pub(crate) async fn insert(pool: &PgPool, result: &ExamResult) -> Result<bool, sqlx::Error> {
    let inserted = sqlx::query(
        "INSERT INTO exam_results (
            id, session_id, exam_id, candidate_key, attempt_number, status, report,
            content_digest, clamped_total, time_spent_seconds, rank, percentile,
            created_at, updated_at, published_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,NULL,NULL,$11,$11,NULL)
        ON CONFLICT DO NOTHING",
    )
    .bind(&result.id)
    .bind(&result.session_id)
    .bind(&result.exam_id)
    .bind(&result.candidate_key)
    .bind(result.attempt_number)
    .bind(result.status)
    .bind(Json(&result.report))
    .bind(&result.content_digest)
    .bind(result.report.score.clamped_total)
    .bind(result.report.time.time_spent_seconds)
    .bind(result.created_at)
    .execute(pool)
    .await?;

    Ok(inserted.rows_affected() > 0)
}

/// Published rows are frozen; the digest alone does not change on publish.
pub(crate) async fn replace_graded_content(
    pool: &PgPool,
    result: &ExamResult,
    expected_digest: &str,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE exam_results
         SET status = $3, report = $4, content_digest = $5, clamped_total = $6, updated_at = $7
         WHERE id = $1 AND content_digest = $2 AND status <> $8",
    )
    .bind(&result.id)
    .bind(expected_digest)
    .bind(result.status)
    .bind(Json(&result.report))
    .bind(&result.content_digest)
    .bind(result.report.score.clamped_total)
    .bind(result.updated_at)
    .bind(ResultStatus::Published)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn publish(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<ExamResult>, sqlx::Error> {
    let row = sqlx::query_as::<_, ResultRow>(&format!(
        "UPDATE exam_results
         SET status = $3, published_at = $4, updated_at = $4
         WHERE id = $1 AND status = $2
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(ResultStatus::Graded)
    .bind(ResultStatus::Published)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(ExamResult::from))
}

pub(crate) async fn list_by_exam(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    rankable_only: bool,
) -> Result<Vec<ExamResult>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ResultRow>(&format!(
        "SELECT {COLUMNS} FROM exam_results
         WHERE exam_id = $1 AND (NOT $2 OR status IN ($3, $4))
         ORDER BY rank NULLS LAST, created_at, id"
    ))
    .bind(exam_id)
    .bind(rankable_only)
    .bind(ResultStatus::Graded)
    .bind(ResultStatus::Published)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(ExamResult::from).collect())
}

pub(crate) async fn acquire_rank_lock(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("ranks:{exam_id}"))
        .execute(executor)
        .await?;
    Ok(())
}

pub(crate) async fn apply_ranks(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    ranks: &[RankAssignment],
) -> Result<(), sqlx::Error> {
    let ids: Vec<&str> = ranks.iter().map(|rank| rank.result_id.as_str()).collect();
    let positions: Vec<i32> = ranks.iter().map(|rank| rank.rank).collect();
    let percentiles: Vec<f64> = ranks.iter().map(|rank| rank.percentile).collect();

    sqlx::query(
        "UPDATE exam_results AS r
         SET rank = data.rank, percentile = data.percentile
         FROM UNNEST($2::text[], $3::int4[], $4::float8[]) AS data(id, rank, percentile)
         WHERE r.exam_id = $1 AND r.id = data.id",
    )
    .bind(exam_id)
    .bind(ids)
    .bind(positions)
    .bind(percentiles)
    .execute(executor)
    .await?;
    Ok(())
}
