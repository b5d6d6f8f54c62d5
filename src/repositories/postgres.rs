use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{
    AnswerMap, ExamConfig, ExamResult, ExamSession, Question, ResultKey, Violation,
};
use crate::repositories::store::{
    AppendedViolation, FinalizeOutcome, IntegrityStore, NewSession, NewViolation,
    RankAssignment, Ranker, SessionFinalize, SessionStart, StoreError, StoreResult,
};
use crate::repositories::{exams, health, results, sessions, violations};

#[derive(Clone)]
pub(crate) struct PgIntegrityStore {
    pool: PgPool,
}

impl PgIntegrityStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntegrityStore for PgIntegrityStore {
    async fn ping(&self) -> StoreResult<()> {
        health::ping(&self.pool).await?;
        Ok(())
    }

    async fn find_exam(&self, exam_id: &str) -> StoreResult<Option<ExamConfig>> {
        exams::find_config(&self.pool, exam_id).await
    }

    async fn list_questions(&self, exam_id: &str) -> StoreResult<Vec<Question>> {
        Ok(exams::list_questions(&self.pool, exam_id).await?)
    }

    async fn create_session(
        &self,
        session: NewSession,
        now: PrimitiveDateTime,
    ) -> StoreResult<SessionStart> {
        let candidate_key = session.candidate.key();
        let mut tx = self.pool.begin().await?;

        sessions::acquire_candidate_lock(&mut *tx, &session.exam_id, &candidate_key).await?;

        if let Some(active) = sessions::find_active(&mut *tx, &session.exam_id, &candidate_key).await?
        {
            tx.commit().await?;
            return Ok(SessionStart::Resumed(active.try_into()?));
        }

        let attempts =
            sessions::count_attempts(&mut *tx, &session.exam_id, &candidate_key).await? as i32;
        if attempts >= session.max_attempts {
            tx.commit().await?;
            return Ok(SessionStart::AttemptsExhausted { attempts });
        }

        let inserted = sessions::create(
            &mut *tx,
            sessions::CreateSession {
                id: &session.id,
                exam_id: &session.exam_id,
                candidate: &session.candidate,
                start_time: session.start_time,
                end_time: session.end_time,
                question_order: &session.question_order,
                attempt_number: attempts + 1,
                now,
            },
        )
        .await?;
        if !inserted {
            return Err(StoreError::Contention(format!(
                "attempt {} for {candidate_key} on exam {}",
                attempts + 1,
                session.exam_id
            )));
        }

        let created = sessions::find_by_id(&mut *tx, &session.id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("session {} vanished", session.id)))?;
        tx.commit().await?;

        Ok(SessionStart::Created(created.try_into()?))
    }

    async fn find_session(&self, session_id: &str) -> StoreResult<Option<ExamSession>> {
        sessions::find_by_id(&self.pool, session_id).await?.map(ExamSession::try_from).transpose()
    }

    async fn list_violations(&self, session_id: &str) -> StoreResult<Vec<Violation>> {
        Ok(violations::list_by_session(&self.pool, session_id).await?)
    }

    async fn append_violation(
        &self,
        session_id: &str,
        violation: NewViolation,
    ) -> StoreResult<Option<AppendedViolation>> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken here orders this append against concurrent appends and
        // against the terminal transition.
        let Some(warning_count) =
            sessions::increment_warning_count(&mut *tx, session_id, violation.detected_at).await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let violation = violations::insert(&mut *tx, session_id, &violation).await?;
        tx.commit().await?;

        Ok(Some(AppendedViolation { violation, warning_count }))
    }

    async fn mark_violation_trigger(&self, violation_id: &str) -> StoreResult<()> {
        Ok(violations::mark_trigger(&self.pool, violation_id).await?)
    }

    async fn save_answers(
        &self,
        session_id: &str,
        answers: &AnswerMap,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        Ok(sessions::merge_answers(&self.pool, session_id, answers, now).await?)
    }

    async fn finalize_session(
        &self,
        session_id: &str,
        finalize: SessionFinalize,
    ) -> StoreResult<FinalizeOutcome> {
        let updated = sessions::finalize(
            &self.pool,
            session_id,
            finalize.status,
            finalize.submitted_at,
            finalize.answers.as_ref(),
            finalize.now,
        )
        .await?;

        if let Some(row) = updated {
            return Ok(FinalizeOutcome::Transitioned(row.try_into()?));
        }

        match sessions::find_by_id(&self.pool, session_id).await? {
            Some(row) => {
                let current = ExamSession::try_from(row)?;
                if current.status.is_terminal() {
                    Ok(FinalizeOutcome::AlreadyTerminal(current))
                } else {
                    Err(StoreError::Contention(format!("session {session_id} transition")))
                }
            }
            None => Ok(FinalizeOutcome::NotFound),
        }
    }

    async fn list_stale_sessions(
        &self,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> StoreResult<Vec<ExamSession>> {
        sessions::list_stale(&self.pool, cutoff, limit)
            .await?
            .into_iter()
            .map(ExamSession::try_from)
            .collect()
    }

    async fn find_result(&self, key: &ResultKey) -> StoreResult<Option<ExamResult>> {
        Ok(results::find_by_key(&self.pool, key).await?)
    }

    async fn find_result_by_id(&self, result_id: &str) -> StoreResult<Option<ExamResult>> {
        Ok(results::find_by_id(&self.pool, result_id).await?)
    }

    async fn insert_result(&self, result: &ExamResult) -> StoreResult<bool> {
        Ok(results::insert(&self.pool, result).await?)
    }

    async fn replace_result(
        &self,
        result: &ExamResult,
        expected_digest: &str,
    ) -> StoreResult<bool> {
        Ok(results::replace_graded_content(&self.pool, result, expected_digest).await?)
    }

    async fn publish_result(
        &self,
        result_id: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<Option<ExamResult>> {
        Ok(results::publish(&self.pool, result_id, now).await?)
    }

    async fn list_results(&self, exam_id: &str) -> StoreResult<Vec<ExamResult>> {
        Ok(results::list_by_exam(&self.pool, exam_id, false).await?)
    }

    async fn rerank(&self, exam_id: &str, ranker: Ranker) -> StoreResult<Vec<RankAssignment>> {
        let mut tx = self.pool.begin().await?;
        results::acquire_rank_lock(&mut *tx, exam_id).await?;

        let cohort = results::list_by_exam(&mut *tx, exam_id, true).await?;
        let ranks = ranker(&cohort);
        results::apply_ranks(&mut *tx, exam_id, &ranks).await?;

        tx.commit().await?;
        Ok(ranks)
    }
}
