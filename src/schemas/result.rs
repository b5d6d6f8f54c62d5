use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::ExamResult;
use crate::db::types::ResultStatus;
use crate::repositories::store::RankAssignment;
use crate::services::grading::GradeReport;

#[derive(Debug, Serialize)]
pub(crate) struct ResultResponse {
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
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
    pub(crate) published_at: Option<String>,
}

impl From<ExamResult> for ResultResponse {
    fn from(result: ExamResult) -> Self {
        Self {
            id: result.id,
            session_id: result.session_id,
            exam_id: result.exam_id,
            candidate_key: result.candidate_key,
            attempt_number: result.attempt_number,
            status: result.status,
            report: result.report,
            content_digest: result.content_digest,
            rank: result.rank,
            percentile: result.percentile,
            created_at: format_primitive(result.created_at),
            updated_at: format_primitive(result.updated_at),
            published_at: result.published_at.map(format_primitive),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ManualGradeRequest {
    #[validate(length(min = 1, max = 128))]
    pub(crate) question_id: String,
    pub(crate) marks: f64,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PublishResponse {
    pub(crate) newly_published: bool,
    #[serde(flatten)]
    pub(crate) result: ResultResponse,
}

#[derive(Debug, Serialize)]
pub(crate) struct RankResponse {
    pub(crate) result_id: String,
    pub(crate) rank: i32,
    pub(crate) percentile: f64,
}

impl From<RankAssignment> for RankResponse {
    fn from(assignment: RankAssignment) -> Self {
        Self {
            result_id: assignment.result_id,
            rank: assignment.rank,
            percentile: assignment.percentile,
        }
    }
}
