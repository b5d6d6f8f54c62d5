//! Deterministic, type-aware scoring of a finished session.
//!
//! Everything here is pure: the same session, exam and question set always produce the
//! same [`GradeReport`], which is what makes replaying a lost grading pass safe.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::time::elapsed_seconds;
use crate::db::models::{AnswerPayload, ExamConfig, ExamSession, Question, RecordedAnswer};
use crate::db::types::{QuestionType, ResultStatus, SessionStatus};
use crate::services::deadline::{apply_late_penalty, late_minutes};
use crate::services::exam_policy::GradingPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct GradeReport {
    pub(crate) session_id: String,
    pub(crate) session_status: SessionStatus,
    pub(crate) questions: Vec<QuestionGrade>,
    pub(crate) score: ScoreBlock,
    pub(crate) time: TimeAnalysis,
    pub(crate) late_penalty: Option<LatePenalty>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum QuestionOutcome {
    Correct,
    Incorrect,
    Unanswered,
    PendingReview,
    Reviewed,
    /// Referenced by the session but not gradable as defined.
    Inconsistent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct QuestionGrade {
    pub(crate) question_id: String,
    pub(crate) question_type: Option<QuestionType>,
    pub(crate) answer: Option<AnswerPayload>,
    pub(crate) outcome: QuestionOutcome,
    pub(crate) marks_awarded: f64,
    pub(crate) max_marks: f64,
    pub(crate) requires_manual_grading: bool,
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ScoreBlock {
    pub(crate) raw_total: f64,
    pub(crate) clamped_total: f64,
    pub(crate) total_possible: f64,
    pub(crate) percentage: f64,
    pub(crate) passing_marks: f64,
    pub(crate) passed: bool,
    pub(crate) correct: u32,
    pub(crate) incorrect: u32,
    pub(crate) unanswered: u32,
    pub(crate) pending_review: u32,
    pub(crate) inconsistent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TimeAnalysis {
    pub(crate) time_spent_seconds: i64,
    pub(crate) allotted_seconds: i64,
    pub(crate) utilization_percent: f64,
    pub(crate) answered_questions: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LatePenalty {
    pub(crate) late_minutes: i64,
    pub(crate) penalty_marks: f64,
    /// What was actually taken off after clamping at zero.
    pub(crate) deducted_marks: f64,
    pub(crate) score_before_penalty: f64,
}

impl GradeReport {
    pub(crate) fn status(&self) -> ResultStatus {
        if self.questions.iter().any(|question| question.requires_manual_grading) {
            ResultStatus::Pending
        } else {
            ResultStatus::Graded
        }
    }

    /// SHA-256 over the canonical JSON form; equal reports have equal digests.
    pub(crate) fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GradingRule {
    SingleSelection,
    MultiSelection,
    NormalizedText,
    FreeForm,
}

fn rule_for(question_type: QuestionType) -> GradingRule {
    match question_type {
        QuestionType::MultipleChoice | QuestionType::TrueFalse => GradingRule::SingleSelection,
        QuestionType::MultipleResponse => GradingRule::MultiSelection,
        QuestionType::FillInBlank | QuestionType::ShortAnswer => GradingRule::NormalizedText,
        QuestionType::Essay | QuestionType::Subjective | QuestionType::Coding => {
            GradingRule::FreeForm
        }
    }
}

pub(crate) fn grade(session: &ExamSession, exam: &ExamConfig, questions: &[Question]) -> GradeReport {
    let grading = &exam.policies.grading;
    let by_id: HashMap<&str, &Question> =
        questions.iter().map(|question| (question.id.as_str(), question)).collect();

    let order: Vec<&str> = if session.question_order.is_empty() {
        let mut sorted: Vec<&Question> = questions.iter().collect();
        sorted.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));
        sorted.into_iter().map(|question| question.id.as_str()).collect()
    } else {
        session.question_order.iter().map(String::as_str).collect()
    };

    let stray = session.answers.keys().filter(|id| !order.contains(&id.as_str())).count();
    if stray > 0 {
        tracing::warn!(
            session_id = %session.id,
            stray_answers = stray,
            "Ignoring answers for questions that were not presented"
        );
    }

    let graded: Vec<QuestionGrade> = order
        .iter()
        .map(|id| {
            grade_question(id, by_id.get(id).copied(), session.answers.get(*id), grading, &session.id)
        })
        .collect();

    let total_possible = if grading.total_marks > 0.0 {
        grading.total_marks
    } else {
        order.iter().filter_map(|id| by_id.get(id)).map(|question| question.marks).sum()
    };

    let submitted_at = session.submitted_at.unwrap_or(session.end_time);
    let lateness = late_minutes(session.end_time, submitted_at);
    let late = (lateness > 0
        && exam.policies.late_submission.allowed
        && exam.policies.late_submission.penalty_marks > 0.0)
        .then_some((lateness, exam.policies.late_submission.penalty_marks));

    let (score, late_penalty) = score_block(&graded, total_possible, grading.passing_marks, late);

    let allotted_seconds = elapsed_seconds(session.start_time, session.end_time);
    let time_spent_seconds = elapsed_seconds(session.start_time, submitted_at);
    let time = TimeAnalysis {
        time_spent_seconds,
        allotted_seconds,
        utilization_percent: if allotted_seconds > 0 {
            round2(time_spent_seconds as f64 / allotted_seconds as f64 * 100.0)
        } else {
            0.0
        },
        answered_questions: graded.iter().filter(|question| question.answer.is_some()).count()
            as u32,
    };

    GradeReport {
        session_id: session.id.clone(),
        session_status: session.status,
        questions: graded,
        score,
        time,
        late_penalty,
    }
}

fn grade_question(
    question_id: &str,
    question: Option<&Question>,
    answer: Option<&RecordedAnswer>,
    grading: &GradingPolicy,
    session_id: &str,
) -> QuestionGrade {
    let payload = answer.map(|recorded| recorded.payload.clone());

    let Some(question) = question else {
        tracing::warn!(session_id, question_id, "Session references an undefined question");
        return QuestionGrade {
            question_id: question_id.to_string(),
            question_type: None,
            answer: payload,
            outcome: QuestionOutcome::Inconsistent,
            marks_awarded: 0.0,
            max_marks: 0.0,
            requires_manual_grading: false,
            feedback: Some("question definition missing; graded as 0".to_string()),
        };
    };

    let mut result = QuestionGrade {
        question_id: question_id.to_string(),
        question_type: Some(question.question_type),
        answer: payload,
        outcome: QuestionOutcome::Unanswered,
        marks_awarded: 0.0,
        max_marks: question.marks,
        requires_manual_grading: false,
        feedback: None,
    };

    let rule = rule_for(question.question_type);
    let manual = rule == GradingRule::FreeForm
        || (rule == GradingRule::NormalizedText && question.expected_answers.is_empty());
    if manual {
        result.requires_manual_grading = true;
        if result.answer.is_some() {
            result.outcome = QuestionOutcome::PendingReview;
        }
        return result;
    }

    let Some(answer) = result.answer.as_ref() else {
        return result;
    };

    let verdict = match rule {
        GradingRule::SingleSelection => check_single_selection(question, answer),
        GradingRule::MultiSelection => check_multi_selection(question, answer),
        GradingRule::NormalizedText | GradingRule::FreeForm => check_text(question, answer),
    };

    match verdict {
        Verdict::Correct => {
            result.outcome = QuestionOutcome::Correct;
            result.marks_awarded = question.marks;
        }
        Verdict::Incorrect => {
            result.outcome = QuestionOutcome::Incorrect;
            result.marks_awarded = -deduction(question, grading);
        }
        Verdict::ShapeMismatch => {
            result.outcome = QuestionOutcome::Incorrect;
            result.feedback = Some("answer shape does not match question type".to_string());
        }
        Verdict::BadDefinition(note) => {
            tracing::warn!(session_id, question_id, note, "Question definition cannot be graded");
            result.outcome = QuestionOutcome::Inconsistent;
            result.feedback = Some(format!("{note}; graded as 0"));
        }
    }

    result
}

enum Verdict {
    Correct,
    Incorrect,
    ShapeMismatch,
    BadDefinition(&'static str),
}

impl From<bool> for Verdict {
    fn from(correct: bool) -> Self {
        if correct {
            Self::Correct
        } else {
            Self::Incorrect
        }
    }
}

fn check_single_selection(question: &Question, answer: &AnswerPayload) -> Verdict {
    let AnswerPayload::SingleChoice { option_id } = answer else {
        return Verdict::ShapeMismatch;
    };
    let mut correct = question.options.iter().filter(|option| option.is_correct);
    match (correct.next(), correct.next()) {
        (Some(expected), None) => Verdict::from(expected.id == *option_id),
        (None, _) => Verdict::BadDefinition("no option is flagged correct"),
        (Some(_), Some(_)) => Verdict::BadDefinition("single-answer question has several correct options"),
    }
}

fn check_multi_selection(question: &Question, answer: &AnswerPayload) -> Verdict {
    let AnswerPayload::MultiChoice { option_ids } = answer else {
        return Verdict::ShapeMismatch;
    };
    let expected: BTreeSet<&str> = question
        .options
        .iter()
        .filter(|option| option.is_correct)
        .map(|option| option.id.as_str())
        .collect();
    if expected.is_empty() {
        return Verdict::BadDefinition("no option is flagged correct");
    }
    // Same size and same members: a repeated id never stands in for a missing one.
    let selected: BTreeSet<&str> = option_ids.iter().map(String::as_str).collect();
    Verdict::from(option_ids.len() == expected.len() && selected == expected)
}

fn check_text(question: &Question, answer: &AnswerPayload) -> Verdict {
    let AnswerPayload::FreeText { text } = answer else {
        return Verdict::ShapeMismatch;
    };
    let given = normalize(text);
    Verdict::from(question.expected_answers.iter().any(|expected| normalize(expected) == given))
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn deduction(question: &Question, grading: &GradingPolicy) -> f64 {
    if !grading.negative_marking {
        return 0.0;
    }
    if question.negative_marks > 0.0 {
        question.negative_marks
    } else {
        grading.negative_marks
    }
}

/// Aggregates per-question marks: clamp at zero first, then apply any late penalty,
/// clamping again.
fn score_block(
    questions: &[QuestionGrade],
    total_possible: f64,
    passing_marks: f64,
    late: Option<(i64, f64)>,
) -> (ScoreBlock, Option<LatePenalty>) {
    let raw_total: f64 = questions.iter().map(|question| question.marks_awarded).sum();
    let clamped = raw_total.max(0.0);

    let (clamped_total, late_penalty) = match late {
        Some((late_minutes, penalty_marks)) => {
            let after = apply_late_penalty(clamped, penalty_marks);
            let penalty = LatePenalty {
                late_minutes,
                penalty_marks,
                deducted_marks: clamped - after,
                score_before_penalty: clamped,
            };
            (after, Some(penalty))
        }
        None => (clamped, None),
    };

    let percentage = if total_possible > 0.0 {
        round2((clamped_total / total_possible * 100.0).clamp(0.0, 100.0))
    } else {
        0.0
    };

    let count = |outcome: QuestionOutcome| {
        questions.iter().filter(|question| question.outcome == outcome).count() as u32
    };

    let block = ScoreBlock {
        raw_total,
        clamped_total,
        total_possible,
        percentage,
        passing_marks,
        passed: clamped_total >= passing_marks,
        correct: count(QuestionOutcome::Correct),
        incorrect: count(QuestionOutcome::Incorrect),
        unanswered: count(QuestionOutcome::Unanswered),
        pending_review: count(QuestionOutcome::PendingReview),
        inconsistent: count(QuestionOutcome::Inconsistent),
    };
    (block, late_penalty)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Error, PartialEq)]
pub(crate) enum ManualGradeError {
    #[error("question {0} is not part of this result")]
    UnknownQuestion(String),
    #[error("question {0} is auto-graded")]
    NotManual(String),
    #[error("marks must be a finite number")]
    InvalidMarks,
}

/// Records a reviewer's marks for a free-form question and recomputes the aggregate
/// with the same clamp-then-penalty ordering as the initial pass.
pub(crate) fn apply_manual_grade(
    report: &mut GradeReport,
    question_id: &str,
    marks: f64,
    feedback: Option<String>,
) -> Result<(), ManualGradeError> {
    let question = report
        .questions
        .iter_mut()
        .find(|question| question.question_id == question_id)
        .ok_or_else(|| ManualGradeError::UnknownQuestion(question_id.to_string()))?;

    let reviewable = question.requires_manual_grading
        || question.outcome == QuestionOutcome::Reviewed;
    if !reviewable {
        return Err(ManualGradeError::NotManual(question_id.to_string()));
    }
    if !marks.is_finite() {
        return Err(ManualGradeError::InvalidMarks);
    }

    question.marks_awarded = marks.clamp(0.0, question.max_marks);
    question.requires_manual_grading = false;
    question.outcome = if question.answer.is_some() {
        QuestionOutcome::Reviewed
    } else {
        QuestionOutcome::Unanswered
    };
    if feedback.is_some() {
        question.feedback = feedback;
    }

    let late = report
        .late_penalty
        .as_ref()
        .map(|penalty| (penalty.late_minutes, penalty.penalty_marks));
    let (score, late_penalty) = score_block(
        &report.questions,
        report.score.total_possible,
        report.score.passing_marks,
        late,
    );
    report.score = score;
    report.late_penalty = late_penalty;
    Ok(())
}
