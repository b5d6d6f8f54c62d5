use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::core::shutdown::shutdown_channel;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::ExamConfig;
use crate::db::types::SessionStatus;
use crate::repositories::store::{FinalizeOutcome, SessionFinalize};
use crate::services::deadline;
use crate::services::notifier::{CandidateEvent, MonitorEvent};
use crate::services::IntegrityError;

const SWEEP_BATCH: i64 = 200;

pub(crate) async fn run(state: AppState) -> Result<()> {
    sweep_loop(state, shutdown_channel()).await;
    tracing::info!("Abandonment sweeper stopped");
    Ok(())
}

async fn sweep_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(state.settings().integrity().sweep_interval_seconds);
    let mut tick = interval(period);
    tracing::info!(interval_seconds = period.as_secs(), "Abandonment sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                match sweep_once(&state, primitive_now_utc()).await {
                    Ok(0) => {}
                    Ok(abandoned) => tracing::info!(abandoned, "Stale sessions abandoned"),
                    Err(err) => tracing::error!(error = %err, "Abandonment sweep failed"),
                }
            }
        }
    }
}

/// Closes in-progress sessions that nobody will ever submit. No result is produced for an
/// abandoned session.
pub(crate) async fn sweep_once(
    state: &AppState,
    now: time::PrimitiveDateTime,
) -> Result<usize, IntegrityError> {
    let store = state.store();
    let cutoff = deadline::abandon_cutoff(now, state.settings().integrity().abandon_after_minutes);
    let stale = store.list_stale_sessions(cutoff, SWEEP_BATCH).await?;

    let mut exams: HashMap<String, Option<ExamConfig>> = HashMap::new();
    let mut abandoned = 0;

    for session in stale {
        if !exams.contains_key(&session.exam_id) {
            let exam = store.find_exam(&session.exam_id).await?;
            exams.insert(session.exam_id.clone(), exam);
        }
        match exams.get(&session.exam_id).and_then(Option::as_ref) {
            Some(exam) => {
                let check = deadline::check(session.end_time, now, &exam.policies.late_submission);
                if !check.is_expired() {
                    continue;
                }
            }
            None => {
                tracing::warn!(
                    session_id = %session.id,
                    exam_id = %session.exam_id,
                    "Abandoning session of an exam without configuration"
                );
            }
        }

        let finalize = SessionFinalize {
            status: SessionStatus::Abandoned,
            submitted_at: None,
            answers: None,
            now,
        };
        match store.finalize_session(&session.id, finalize).await? {
            FinalizeOutcome::Transitioned(updated) => {
                abandoned += 1;
                metrics::counter!("sessions_abandoned_total").increment(1);
                metrics::counter!("sessions_finalized_total", "status" => SessionStatus::Abandoned.as_str())
                    .increment(1);
                tracing::info!(
                    session_id = %updated.id,
                    exam_id = %updated.exam_id,
                    end_time = %updated.end_time,
                    "Session abandoned"
                );
                state.notifier().publish_monitor(
                    &updated.exam_id,
                    MonitorEvent::SessionFinalized {
                        session_id: updated.id.clone(),
                        status: SessionStatus::Abandoned,
                        reason: "abandoned".to_string(),
                    },
                );
                state.notifier().notify_candidate(
                    &updated.id,
                    CandidateEvent::SessionClosed { status: SessionStatus::Abandoned },
                );
            }
            FinalizeOutcome::AlreadyTerminal(current) => {
                tracing::debug!(
                    session_id = %current.id,
                    status = current.status.as_str(),
                    "Session closed before the sweep reached it"
                );
            }
            FinalizeOutcome::NotFound => {
                tracing::debug!(session_id = %session.id, "Stale session disappeared");
            }
        }
    }

    Ok(abandoned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::submission_coordinator::{submit, SubmitReason};
    use crate::test_support::TestContext;
    use time::Duration as TimeDuration;

    #[tokio::test]
    async fn abandons_only_long_expired_sessions() {
        let ctx = TestContext::new().await;
        let stale = ctx.start_session("u-1").await;
        let abandon_after = ctx.state.settings().integrity().abandon_after_minutes as i64;

        let too_early = stale.end_time + TimeDuration::minutes(abandon_after - 1);
        assert_eq!(sweep_once(&ctx.state, too_early).await.expect("sweep"), 0);

        let later = stale.end_time + TimeDuration::minutes(abandon_after + 1);
        assert_eq!(sweep_once(&ctx.state, later).await.expect("sweep"), 1);

        let stored = ctx.state.store().find_session(&stale.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Abandoned);
        assert_eq!(stored.submitted_at, None);
        assert_eq!(ctx.store.result_count(), 0);

        assert_eq!(sweep_once(&ctx.state, later).await.expect("second sweep"), 0);
    }

    #[tokio::test]
    async fn submitted_sessions_are_left_alone() {
        let ctx = TestContext::new().await;
        let session = ctx.start_session("u-1").await;
        submit(&ctx.state, &session.id, None, SubmitReason::Candidate, session.start_time)
            .await
            .expect("submit");

        let much_later = session.end_time + TimeDuration::days(30);
        assert_eq!(sweep_once(&ctx.state, much_later).await.expect("sweep"), 0);

        let stored = ctx.state.store().find_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(ctx.store.result_count(), 1);
    }
}
