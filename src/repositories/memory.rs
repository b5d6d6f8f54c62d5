//! In-memory store with the same atomicity contract as the Postgres store. Every
//! operation holds the lock for its whole duration, which makes each one linearizable.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::PrimitiveDateTime;

use crate::db::models::{
    AnswerMap, ExamConfig, ExamResult, ExamSession, Question, ResultKey, Violation,
};
use crate::db::types::{ResultStatus, SessionStatus};
use crate::repositories::store::{
    AppendedViolation, FinalizeOutcome, IntegrityStore, NewSession, NewViolation,
    RankAssignment, Ranker, SessionFinalize, SessionStart, StoreError, StoreResult,
};

#[derive(Default)]
struct Tables {
    exams: HashMap<String, ExamConfig>,
    questions: HashMap<String, Vec<Question>>,
    sessions: HashMap<String, ExamSession>,
    violations: Vec<Violation>,
    results: HashMap<String, ExamResult>,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Corrupt("memory store poisoned".to_string()))
    }

    pub(crate) fn put_exam(&self, exam: ExamConfig, questions: Vec<Question>) {
        let mut tables = self.tables.lock().expect("memory store lock");
        tables.questions.insert(exam.id.clone(), questions);
        tables.exams.insert(exam.id.clone(), exam);
    }

    pub(crate) fn put_session(&self, session: ExamSession) {
        let mut tables = self.tables.lock().expect("memory store lock");
        tables.sessions.insert(session.id.clone(), session);
    }

    pub(crate) fn result_count(&self) -> usize {
        self.tables.lock().expect("memory store lock").results.len()
    }
}

#[async_trait]
impl IntegrityStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    async fn find_exam(&self, exam_id: &str) -> StoreResult<Option<ExamConfig>> {
        Ok(self.lock()?.exams.get(exam_id).cloned())
    }

    async fn list_questions(&self, exam_id: &str) -> StoreResult<Vec<Question>> {
        Ok(self.lock()?.questions.get(exam_id).cloned().unwrap_or_default())
    }

    async fn create_session(
        &self,
        session: NewSession,
        now: PrimitiveDateTime,
    ) -> StoreResult<SessionStart> {
        let mut tables = self.lock()?;
        let candidate_key = session.candidate.key();
        let mine = |existing: &&ExamSession| {
            existing.exam_id == session.exam_id && existing.candidate.key() == candidate_key
        };

        if let Some(active) = tables
            .sessions
            .values()
            .filter(mine)
            .find(|existing| existing.status == SessionStatus::InProgress)
        {
            return Ok(SessionStart::Resumed(active.clone()));
        }

        let attempts = tables.sessions.values().filter(mine).count() as i32;
        if attempts >= session.max_attempts {
            return Ok(SessionStart::AttemptsExhausted { attempts });
        }

        let created = ExamSession {
            id: session.id.clone(),
            exam_id: session.exam_id,
            candidate: session.candidate,
            status: SessionStatus::InProgress,
            warning_count: 0,
            start_time: session.start_time,
            end_time: session.end_time,
            submitted_at: None,
            question_order: session.question_order,
            answers: AnswerMap::new(),
            attempt_number: attempts + 1,
            created_at: now,
            updated_at: now,
        };
        tables.sessions.insert(session.id, created.clone());
        Ok(SessionStart::Created(created))
    }

    async fn find_session(&self, session_id: &str) -> StoreResult<Option<ExamSession>> {
        Ok(self.lock()?.sessions.get(session_id).cloned())
    }

    async fn list_violations(&self, session_id: &str) -> StoreResult<Vec<Violation>> {
        Ok(self
            .lock()?
            .violations
            .iter()
            .filter(|violation| violation.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn append_violation(
        &self,
        session_id: &str,
        violation: NewViolation,
    ) -> StoreResult<Option<AppendedViolation>> {
        let mut tables = self.lock()?;
        let Some(session) = tables.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::InProgress {
            return Ok(None);
        }
        session.warning_count += 1;
        session.updated_at = violation.detected_at;
        let warning_count = session.warning_count;

        let stored = Violation {
            id: violation.id,
            session_id: session_id.to_string(),
            kind: violation.kind,
            detail: sqlx::types::Json(violation.detail),
            severity: violation.severity,
            description: violation.description,
            triggered_auto_submit: false,
            detected_at: violation.detected_at,
        };
        tables.violations.push(stored.clone());
        Ok(Some(AppendedViolation { violation: stored, warning_count }))
    }

    async fn mark_violation_trigger(&self, violation_id: &str) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if let Some(violation) =
            tables.violations.iter_mut().find(|violation| violation.id == violation_id)
        {
            violation.triggered_auto_submit = true;
        }
        Ok(())
    }

    async fn save_answers(
        &self,
        session_id: &str,
        answers: &AnswerMap,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        match tables.sessions.get_mut(session_id) {
            Some(session) if session.status == SessionStatus::InProgress => {
                session.answers.extend(answers.clone());
                session.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize_session(
        &self,
        session_id: &str,
        finalize: SessionFinalize,
    ) -> StoreResult<FinalizeOutcome> {
        let mut tables = self.lock()?;
        let Some(session) = tables.sessions.get_mut(session_id) else {
            return Ok(FinalizeOutcome::NotFound);
        };
        if session.status != SessionStatus::InProgress {
            return Ok(FinalizeOutcome::AlreadyTerminal(session.clone()));
        }
        session.status = finalize.status;
        session.submitted_at = finalize.submitted_at;
        if let Some(answers) = finalize.answers {
            session.answers.extend(answers);
        }
        session.updated_at = finalize.now;
        Ok(FinalizeOutcome::Transitioned(session.clone()))
    }

    async fn list_stale_sessions(
        &self,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> StoreResult<Vec<ExamSession>> {
        let tables = self.lock()?;
        let mut stale: Vec<ExamSession> = tables
            .sessions
            .values()
            .filter(|session| session.status == SessionStatus::InProgress && session.end_time < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|session| session.end_time);
        stale.truncate(limit.clamp(1, 1000) as usize);
        Ok(stale)
    }

    async fn find_result(&self, key: &ResultKey) -> StoreResult<Option<ExamResult>> {
        Ok(self.lock()?.results.values().find(|result| result.key() == *key).cloned())
    }

    async fn find_result_by_id(&self, result_id: &str) -> StoreResult<Option<ExamResult>> {
        Ok(self.lock()?.results.get(result_id).cloned())
    }

    async fn insert_result(&self, result: &ExamResult) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let key = result.key();
        let conflict = tables.results.values().any(|existing| {
            existing.id == result.id
                || existing.session_id == result.session_id
                || existing.key() == key
        });
        if conflict {
            return Ok(false);
        }
        tables.results.insert(result.id.clone(), result.clone());
        Ok(true)
    }

    async fn replace_result(
        &self,
        result: &ExamResult,
        expected_digest: &str,
    ) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        match tables.results.get_mut(&result.id) {
            Some(existing)
                if existing.content_digest == expected_digest
                    && existing.status != ResultStatus::Published =>
            {
                existing.status = result.status;
                existing.report = result.report.clone();
                existing.content_digest = result.content_digest.clone();
                existing.updated_at = result.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn publish_result(
        &self,
        result_id: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<Option<ExamResult>> {
        let mut tables = self.lock()?;
        match tables.results.get_mut(result_id) {
            Some(result) if result.status == ResultStatus::Graded => {
                result.status = ResultStatus::Published;
                result.published_at = Some(now);
                result.updated_at = now;
                Ok(Some(result.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_results(&self, exam_id: &str) -> StoreResult<Vec<ExamResult>> {
        let tables = self.lock()?;
        let mut listed: Vec<ExamResult> =
            tables.results.values().filter(|result| result.exam_id == exam_id).cloned().collect();
        listed.sort_by(|a, b| {
            (a.rank.is_none(), a.rank, a.created_at, &a.id)
                .cmp(&(b.rank.is_none(), b.rank, b.created_at, &b.id))
        });
        Ok(listed)
    }

    async fn rerank(&self, exam_id: &str, ranker: Ranker) -> StoreResult<Vec<RankAssignment>> {
        let mut tables = self.lock()?;
        let cohort: Vec<ExamResult> = tables
            .results
            .values()
            .filter(|result| result.exam_id == exam_id && result.status.is_rankable())
            .cloned()
            .collect();
        let ranks = ranker(&cohort);
        for assignment in &ranks {
            if let Some(result) = tables.results.get_mut(&assignment.result_id) {
                result.rank = Some(assignment.rank);
                result.percentile = Some(assignment.percentile);
            }
        }
        Ok(ranks)
    }
}
