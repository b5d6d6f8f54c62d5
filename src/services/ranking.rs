use std::cmp::Ordering;

use crate::core::state::AppState;
use crate::db::models::ExamResult;
use crate::repositories::store::RankAssignment;
use crate::services::IntegrityError;

/// Full recomputation over the graded and published cohort of one exam.
pub(crate) async fn recompute_ranks(
    state: &AppState,
    exam_id: &str,
) -> Result<Vec<RankAssignment>, IntegrityError> {
    let ranks = state.store().rerank(exam_id, compute_ranks).await?;
    tracing::debug!(exam_id, ranked = ranks.len(), "Ranks recomputed");
    Ok(ranks)
}

/// Higher clamped total first; on a tie the faster candidate ranks higher. Remaining ties
/// fall back to creation order and id so the ordering is total.
pub(crate) fn compute_ranks(results: &[ExamResult]) -> Vec<RankAssignment> {
    let mut cohort: Vec<&ExamResult> =
        results.iter().filter(|result| result.status.is_rankable()).collect();
    cohort.sort_by(|a, b| compare(a, b));

    let total = cohort.len();
    cohort
        .into_iter()
        .enumerate()
        .map(|(index, result)| {
            let rank = index + 1;
            RankAssignment {
                result_id: result.id.clone(),
                rank: rank as i32,
                percentile: percentile(rank, total),
            }
        })
        .collect()
}

fn compare(a: &ExamResult, b: &ExamResult) -> Ordering {
    b.report
        .score
        .clamped_total
        .total_cmp(&a.report.score.clamped_total)
        .then_with(|| a.report.time.time_spent_seconds.cmp(&b.report.time.time_spent_seconds))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn percentile(rank: usize, total: usize) -> f64 {
    if total <= 1 {
        return 100.0;
    }
    let value = (total - rank + 1) as f64 / total as f64 * 100.0;
    (value * 100.0).round() / 100.0
}
