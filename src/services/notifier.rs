//! Best-effort fan-out to live observers. Nothing here participates in the correctness
//! path: a dropped event is logged at debug level and forgotten.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::core::redis::RedisHandle;
use crate::db::types::{SessionStatus, ViolationSeverity};

/// Events for proctors watching an exam.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum MonitorEvent {
    SessionStarted {
        session_id: String,
        candidate_key: String,
        attempt_number: i32,
    },
    ViolationRecorded {
        session_id: String,
        kind: String,
        severity: ViolationSeverity,
        description: String,
        warning_count: i32,
        max_warnings: i32,
        forced_submit: bool,
    },
    SessionFinalized {
        session_id: String,
        status: SessionStatus,
        reason: String,
    },
    ResultPublished {
        result_id: String,
        session_id: String,
    },
    /// Opaque proctoring frame relayed from the candidate channel.
    Frame {
        session_id: String,
        payload: Value,
    },
}

/// Events for the candidate's own channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum CandidateEvent {
    Warning {
        warning_count: i32,
        max_warnings: i32,
        kind: String,
        message: String,
    },
    ForcedSubmit {
        reason: String,
        warning_count: i32,
        message: String,
    },
    SessionClosed {
        status: SessionStatus,
    },
}

#[derive(Clone)]
pub(crate) struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    capacity: usize,
    redis: RedisHandle,
    exams: Mutex<HashMap<String, broadcast::Sender<MonitorEvent>>>,
    sessions: Mutex<HashMap<String, broadcast::Sender<CandidateEvent>>>,
}

pub(crate) fn monitor_channel(exam_id: &str) -> String {
    format!("examguard:exam:{exam_id}:monitor")
}

impl Notifier {
    pub(crate) fn new(capacity: usize, redis: RedisHandle) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                capacity: capacity.max(1),
                redis,
                exams: Mutex::new(HashMap::new()),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn subscribe_exam(&self, exam_id: &str) -> broadcast::Receiver<MonitorEvent> {
        subscribe(&self.inner.exams, exam_id, self.inner.capacity)
    }

    pub(crate) fn subscribe_session(&self, session_id: &str) -> broadcast::Receiver<CandidateEvent> {
        subscribe(&self.inner.sessions, session_id, self.inner.capacity)
    }

    /// Local broadcast plus a spawned Redis `PUBLISH` for observers in other processes.
    pub(crate) fn publish_monitor(&self, exam_id: &str, event: MonitorEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => Some(payload),
            Err(err) => {
                tracing::debug!(exam_id, error = %err, "Monitor event is not serializable");
                None
            }
        };

        send(&self.inner.exams, exam_id, event);

        if let Some(payload) = payload {
            let redis = self.inner.redis.clone();
            let channel = monitor_channel(exam_id);
            tokio::spawn(async move {
                if let Err(err) = redis.publish(&channel, &payload).await {
                    tracing::debug!(channel, error = %err, "Redis monitor publish failed");
                }
            });
        }
    }

    /// A closed session gets no further events, so its channel is released once the
    /// closing event is queued; subscribers still drain it before seeing `Closed`.
    pub(crate) fn notify_candidate(&self, session_id: &str, event: CandidateEvent) {
        let closing = matches!(event, CandidateEvent::SessionClosed { .. });
        send(&self.inner.sessions, session_id, event);
        if closing {
            lock(&self.inner.sessions).remove(session_id);
        }
    }

    #[cfg(test)]
    fn open_channels(&self) -> (usize, usize) {
        (lock(&self.inner.exams).len(), lock(&self.inner.sessions).len())
    }
}

fn lock<T>(channels: &Mutex<HashMap<String, T>>) -> std::sync::MutexGuard<'_, HashMap<String, T>> {
    match channels.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Drops channels whose subscribers have all gone away.
fn prune<T>(channels: &mut HashMap<String, broadcast::Sender<T>>) {
    channels.retain(|_, sender| sender.receiver_count() > 0);
}

fn subscribe<T: Clone>(
    channels: &Mutex<HashMap<String, broadcast::Sender<T>>>,
    key: &str,
    capacity: usize,
) -> broadcast::Receiver<T> {
    let mut channels = lock(channels);
    prune(&mut channels);
    channels
        .entry(key.to_string())
        .or_insert_with(|| broadcast::channel(capacity).0)
        .subscribe()
}

fn send<T: Clone>(channels: &Mutex<HashMap<String, broadcast::Sender<T>>>, key: &str, event: T) {
    let mut channels = lock(channels);
    let delivered = channels.get(key).map(|sender| sender.send(event).is_ok());
    prune(&mut channels);
    if delivered == Some(false) {
        tracing::debug!(key, "Dropped event without live subscribers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> Notifier {
        Notifier::new(8, RedisHandle::new("redis://127.0.0.1:1/0".to_string()))
    }

    #[tokio::test]
    async fn candidate_events_reach_session_subscribers_only() {
        let notifier = notifier();
        let mut mine = notifier.subscribe_session("s-1");
        let mut other = notifier.subscribe_session("s-2");

        notifier.notify_candidate(
            "s-1",
            CandidateEvent::SessionClosed { status: SessionStatus::Completed },
        );

        assert_eq!(
            mine.recv().await.expect("event"),
            CandidateEvent::SessionClosed { status: SessionStatus::Completed }
        );
        assert!(matches!(other.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_a_no_op() {
        let notifier = notifier();
        notifier.publish_monitor(
            "exam-1",
            MonitorEvent::ResultPublished {
                result_id: "r-1".to_string(),
                session_id: "s-1".to_string(),
            },
        );

        let mut late = notifier.subscribe_exam("exam-1");
        assert!(matches!(late.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn channels_without_subscribers_are_released() {
        let notifier = notifier();
        let watcher = notifier.subscribe_exam("exam-1");
        let candidate = notifier.subscribe_session("s-1");
        assert_eq!(notifier.open_channels(), (1, 1));

        drop(watcher);
        drop(candidate);
        let _other = notifier.subscribe_session("s-2");
        assert_eq!(notifier.open_channels(), (0, 1));
    }

    #[tokio::test]
    async fn session_channel_is_released_after_close() {
        let notifier = notifier();
        let mut events = notifier.subscribe_session("s-1");

        notifier.notify_candidate(
            "s-1",
            CandidateEvent::SessionClosed { status: SessionStatus::AutoSubmitted },
        );
        assert_eq!(notifier.open_channels(), (0, 0));

        assert_eq!(
            events.recv().await.expect("closing event"),
            CandidateEvent::SessionClosed { status: SessionStatus::AutoSubmitted }
        );
        assert!(matches!(events.recv().await, Err(broadcast::error::RecvError::Closed)));
    }

    #[test]
    fn monitor_events_are_tagged() {
        let event = MonitorEvent::SessionFinalized {
            session_id: "s-1".to_string(),
            status: SessionStatus::AutoSubmitted,
            reason: "violation limit exceeded (3/3)".to_string(),
        };
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["event"], "session_finalized");
        assert_eq!(json["status"], "auto_submitted");
    }
}
