use crate::core::state::AppState;
use crate::db::models::ExamResult;
use crate::db::types::ResultStatus;
use crate::services::grading;
use crate::services::notifier::MonitorEvent;
use crate::services::ranking;
use crate::services::IntegrityError;

/// Applies a reviewer's marks with optimistic concurrency on the result digest, so two
/// reviewers grading different questions never overwrite each other.
pub(crate) async fn apply_manual_grade(
    state: &AppState,
    result_id: &str,
    question_id: &str,
    marks: f64,
    feedback: Option<String>,
    now: time::PrimitiveDateTime,
) -> Result<ExamResult, IntegrityError> {
    let store = state.store();
    let attempts = state.settings().integrity().counter_retry_attempts.max(1);

    for _ in 0..attempts {
        let current = load_unpublished(state, result_id).await?;

        let mut updated = current.clone();
        grading::apply_manual_grade(&mut updated.report, question_id, marks, feedback.clone())?;
        updated.status = updated.report.status();
        updated.content_digest = updated.report.digest();
        updated.updated_at = now;

        if store.replace_result(&updated, &current.content_digest).await? {
            tracing::info!(
                result_id,
                question_id,
                marks,
                status = ?updated.status,
                "Manual grade applied"
            );
            if needs_rerank(&current, &updated) {
                match ranking::recompute_ranks(state, &updated.exam_id).await {
                    Ok(_) => {
                        // Return the row with its fresh rank.
                        if let Some(ranked) = store.find_result_by_id(result_id).await? {
                            return Ok(ranked);
                        }
                    }
                    Err(err) => {
                        tracing::error!(exam_id = %updated.exam_id, error = %err, "Rank recomputation failed");
                    }
                }
            }
            return Ok(updated);
        }

        // A publish that raced this grade wins; anything else is a concurrent reviewer.
        load_unpublished(state, result_id).await?;
        tracing::debug!(result_id, "Result changed under manual grading; retrying");
    }

    Err(IntegrityError::ContentionExhausted { operation: "manual grading", attempts })
}

async fn load_unpublished(state: &AppState, result_id: &str) -> Result<ExamResult, IntegrityError> {
    let current = state
        .store()
        .find_result_by_id(result_id)
        .await?
        .ok_or_else(|| IntegrityError::ResultNotFound(result_id.to_string()))?;
    if current.status == ResultStatus::Published {
        return Err(IntegrityError::InvalidTransition(format!(
            "result {result_id} is already published"
        )));
    }
    Ok(current)
}

/// Ranks depend on the clamped total of every rankable result, so a regrade of an
/// already graded result moves the cohort just like a pending result completing.
fn needs_rerank(before: &ExamResult, after: &ExamResult) -> bool {
    after.status.is_rankable()
        && (before.status != after.status
            || before.report.score.clamped_total != after.report.score.clamped_total)
}

#[derive(Debug, Clone)]
pub(crate) struct PublishOutcome {
    pub(crate) result: ExamResult,
    pub(crate) newly_published: bool,
}

/// One-way graded to published flip. Publishing twice is a no-op.
pub(crate) async fn publish(
    state: &AppState,
    result_id: &str,
    now: time::PrimitiveDateTime,
) -> Result<PublishOutcome, IntegrityError> {
    let store = state.store();

    let Some(result) = store.publish_result(result_id, now).await? else {
        let current = store
            .find_result_by_id(result_id)
            .await?
            .ok_or_else(|| IntegrityError::ResultNotFound(result_id.to_string()))?;
        return match current.status {
            ResultStatus::Published => Ok(PublishOutcome { result: current, newly_published: false }),
            ResultStatus::Pending => Err(IntegrityError::InvalidTransition(format!(
                "result {result_id} still has questions awaiting manual grading"
            ))),
            ResultStatus::Graded => Err(IntegrityError::InvalidTransition(format!(
                "result {result_id} changed while publishing"
            ))),
        };
    };

    tracing::info!(result_id, exam_id = %result.exam_id, "Result published");
    state.notifier().publish_monitor(
        &result.exam_id,
        MonitorEvent::ResultPublished {
            result_id: result.id.clone(),
            session_id: result.session_id.clone(),
        },
    );
    if let Err(err) = ranking::recompute_ranks(state, &result.exam_id).await {
        tracing::error!(exam_id = %result.exam_id, error = %err, "Rank recomputation failed");
    }

    Ok(PublishOutcome { result, newly_published: true })
}
