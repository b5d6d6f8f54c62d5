use sqlx::types::Json;
use sqlx::PgPool;

use crate::db::models::{ExamConfig, Question, QuestionOption};
use crate::db::types::QuestionType;
use crate::repositories::store::StoreError;
use crate::services::exam_policy::ExamPolicies;

#[derive(Debug, sqlx::FromRow)]
struct ExamRow {
    id: String,
    title: String,
    duration_minutes: i32,
    settings: Json<serde_json::Value>,
}

#[derive(Debug, sqlx::FromRow)]
struct QuestionRow {
    id: String,
    exam_id: String,
    question_type: QuestionType,
    marks: f64,
    negative_marks: f64,
    options: Json<Vec<QuestionOption>>,
    expected_answers: Json<Vec<String>>,
    order_index: i32,
}

pub(crate) async fn find_config(pool: &PgPool, id: &str) -> Result<Option<ExamConfig>, StoreError> {
    let row = sqlx::query_as::<_, ExamRow>(
        "SELECT id, title, duration_minutes, settings FROM exams WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let policies = ExamPolicies::from_exam_settings(&row.settings.0)
        .map_err(|err| StoreError::Corrupt(format!("exam {}: {err}", row.id)))?;

    Ok(Some(ExamConfig {
        id: row.id,
        title: row.title,
        duration_minutes: row.duration_minutes,
        policies,
    }))
}

pub(crate) async fn list_questions(pool: &PgPool, exam_id: &str) -> Result<Vec<Question>, sqlx::Error> {
    let rows = sqlx::query_as::<_, QuestionRow>(
        "SELECT id, exam_id, question_type, marks, negative_marks, options, expected_answers, \
         order_index
         FROM questions
         WHERE exam_id = $1
         ORDER BY order_index, id",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Question {
            id: row.id,
            exam_id: row.exam_id,
            question_type: row.question_type,
            marks: row.marks,
            negative_marks: row.negative_marks,
            options: row.options.0,
            expected_answers: row.expected_answers.0,
            order_index: row.order_index,
        })
        .collect())
}
