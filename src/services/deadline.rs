use time::{Duration, PrimitiveDateTime};

use crate::services::exam_policy::LateSubmissionPolicy;

/// How a request time relates to a session's hard deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeadlineCheck {
    OnTime,
    /// Past the end time but inside the late-submission window.
    Late { late_minutes: i64 },
    /// Past the end time with no late window left; the session must time out.
    Expired,
}

impl DeadlineCheck {
    pub(crate) fn is_expired(self) -> bool {
        matches!(self, Self::Expired)
    }
}

pub(crate) fn hard_deadline(start: PrimitiveDateTime, duration_minutes: i32) -> PrimitiveDateTime {
    start + Duration::minutes(i64::from(duration_minutes.max(0)))
}

pub(crate) fn check(
    end_time: PrimitiveDateTime,
    now: PrimitiveDateTime,
    policy: &LateSubmissionPolicy,
) -> DeadlineCheck {
    if now <= end_time {
        return DeadlineCheck::OnTime;
    }
    if !policy.allowed {
        return DeadlineCheck::Expired;
    }
    if let Some(window) = policy.deadline_minutes {
        if now > end_time + Duration::minutes(window) {
            return DeadlineCheck::Expired;
        }
    }

    DeadlineCheck::Late { late_minutes: late_minutes(end_time, now) }
}

/// Lateness rounded up to whole minutes; a submission one second late is one minute late.
pub(crate) fn late_minutes(end_time: PrimitiveDateTime, at: PrimitiveDateTime) -> i64 {
    let late_seconds = (at - end_time).whole_seconds();
    if late_seconds <= 0 {
        return 0;
    }
    (late_seconds + 59) / 60
}

/// Score left after deducting a late penalty from an already clamped score; never negative.
pub(crate) fn apply_late_penalty(clamped_score: f64, penalty_marks: f64) -> f64 {
    (clamped_score - penalty_marks.max(0.0)).max(0.0)
}

/// Sessions still in progress whose end time is older than this are abandoned.
pub(crate) fn abandon_cutoff(now: PrimitiveDateTime, abandon_after_minutes: u64) -> PrimitiveDateTime {
    let minutes = i64::try_from(abandon_after_minutes).unwrap_or(i64::MAX / 120).min(i64::MAX / 120);
    now.checked_sub(Duration::minutes(minutes)).unwrap_or(PrimitiveDateTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn late_policy(window: Option<i64>) -> LateSubmissionPolicy {
        LateSubmissionPolicy { allowed: true, deadline_minutes: window, penalty_marks: 2.0 }
    }

    #[test]
    fn late_penalty_stops_at_zero() {
        assert_eq!(apply_late_penalty(5.0, 2.0), 3.0);
        assert_eq!(apply_late_penalty(1.5, 2.0), 0.0);
        assert_eq!(apply_late_penalty(4.0, -1.0), 4.0);
    }

    #[test]
    fn hard_deadline_adds_duration() {
        let start = datetime!(2025-03-01 09:00:00);
        assert_eq!(hard_deadline(start, 90), datetime!(2025-03-01 10:30:00));
    }

    #[test]
    fn on_time_includes_the_exact_end() {
        let end = datetime!(2025-03-01 10:00:00);
        let policy = LateSubmissionPolicy::default();
        assert_eq!(check(end, end, &policy), DeadlineCheck::OnTime);
    }

    #[test]
    fn late_without_policy_expires() {
        let end = datetime!(2025-03-01 10:00:00);
        let policy = LateSubmissionPolicy::default();
        assert!(check(end, datetime!(2025-03-01 10:00:01), &policy).is_expired());
    }

    #[test]
    fn late_window_reports_rounded_minutes() {
        let end = datetime!(2025-03-01 10:00:00);
        let policy = late_policy(Some(30));

        assert_eq!(
            check(end, datetime!(2025-03-01 10:00:01), &policy),
            DeadlineCheck::Late { late_minutes: 1 }
        );
        assert_eq!(
            check(end, datetime!(2025-03-01 10:30:00), &policy),
            DeadlineCheck::Late { late_minutes: 30 }
        );
        assert!(check(end, datetime!(2025-03-01 10:30:01), &policy).is_expired());
    }

    #[test]
    fn open_late_window_never_expires() {
        let end = datetime!(2025-03-01 10:00:00);
        assert_eq!(
            check(end, datetime!(2025-03-02 10:00:00), &late_policy(None)),
            DeadlineCheck::Late { late_minutes: 1440 }
        );
    }

    #[test]
    fn abandon_cutoff_subtracts_minutes() {
        let now = datetime!(2025-03-02 10:00:00);
        assert_eq!(abandon_cutoff(now, 60), datetime!(2025-03-02 09:00:00));
    }
}
