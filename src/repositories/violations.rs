use sqlx::types::Json;
use sqlx::PgPool;

use crate::db::models::Violation;
use crate::repositories::store::NewViolation;

pub(crate) const COLUMNS: &str = "\
    id, session_id, kind, detail, severity, description, triggered_auto_submit, detected_at";

pub(crate) async fn insert(
    executor: impl sqlx::PgExecutor<'_>,
    session_id: &str,
    violation: &NewViolation,
) -> Result<Violation, sqlx::Error> {
    sqlx::query_as::<_, Violation>(&format!(
        "INSERT INTO violations (
            id, session_id, kind, detail, severity, description, triggered_auto_submit, detected_at
        ) VALUES ($1,$2,$3,$4,$5,$6,FALSE,$7)
        RETURNING {COLUMNS}"
    ))
    .bind(&violation.id)
    .bind(session_id)
    .bind(&violation.kind)
    .bind(Json(&violation.detail))
    .bind(violation.severity)
    .bind(&violation.description)
    .bind(violation.detected_at)
    .fetch_one(executor)
    .await
}

pub(crate) async fn list_by_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<Violation>, sqlx::Error> {
    sqlx::query_as::<_, Violation>(&format!(
        "SELECT {COLUMNS} FROM violations WHERE session_id = $1 ORDER BY detected_at, id"
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn mark_trigger(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE violations SET triggered_auto_submit = TRUE WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
