//! Live WebSocket channels. The candidate channel carries violations in and warnings out;
//! the monitor channel streams an exam's events to proctors. Both are views over the
//! notifier and never hold state of their own.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast::error::RecvError, mpsc};

use crate::api::errors::ApiError;
use crate::api::guards::{require_owner, CurrentCandidate, CurrentStaff};
use crate::api::sessions::load_session;
use crate::api::validation::validate_violation_kind;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::ExamSession;
use crate::services::integrity_monitor::{self, ViolationOutcome};
use crate::services::notifier::{CandidateEvent, MonitorEvent};
use crate::services::IntegrityError;

const REPLY_BUFFER: usize = 16;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    Violation {
        kind: String,
        #[serde(default)]
        detail: Value,
    },
    /// Opaque proctoring payload (snapshots, telemetry) relayed to the monitor.
    Frame {
        #[serde(default)]
        payload: Value,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ChannelReply {
    ViolationAck {
        #[serde(flatten)]
        outcome: ViolationOutcome,
    },
    Error {
        detail: String,
    },
}

pub(crate) async fn candidate_channel(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    candidate: CurrentCandidate,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let session = load_session(&state, &session_id).await?;
    require_owner(&session, &candidate.identity)?;
    if session.status.is_terminal() {
        return Err(ApiError::Conflict("Session is already closed".to_string()));
    }

    Ok(ws.on_upgrade(move |socket| run_candidate_channel(socket, state, session)))
}

async fn run_candidate_channel(socket: WebSocket, state: AppState, session: ExamSession) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.notifier().subscribe_session(&session.id);
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(REPLY_BUFFER);
    tracing::debug!(session_id = %session.id, "Candidate channel opened");

    let mut send_task = tokio::spawn(async move {
        loop {
            let (encoded, closing) = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        let closing = matches!(event, CandidateEvent::SessionClosed { .. });
                        (serde_json::to_string(&event), closing)
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Candidate channel lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(text) => (Ok(text), false),
                    None => break,
                },
            };

            match encoded {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => tracing::debug!(error = %err, "Candidate event is not serializable"),
            }

            if closing {
                if let Err(err) = sender.close().await {
                    tracing::debug!(error = %err, "Candidate channel close failed");
                }
                break;
            }
        }
    });

    let session_id = session.id.clone();
    let exam_id = session.exam_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    handle_inbound(&state, &session_id, &exam_id, &text, &reply_tx).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::debug!(session_id = %session.id, "Candidate channel closed");
}

async fn handle_inbound(
    state: &AppState,
    session_id: &str,
    exam_id: &str,
    text: &str,
    replies: &mpsc::Sender<String>,
) {
    let reply = match serde_json::from_str::<InboundMessage>(text) {
        Ok(InboundMessage::Violation { kind, detail }) => {
            if validate_violation_kind(&kind).is_err() {
                ChannelReply::Error { detail: "Invalid violation kind".to_string() }
            } else {
                match integrity_monitor::record_violation(
                    state,
                    session_id,
                    &kind,
                    detail,
                    primitive_now_utc(),
                )
                .await
                {
                    Ok(outcome) => ChannelReply::ViolationAck { outcome },
                    Err(err) => {
                        tracing::warn!(session_id, error = %err, "Channel violation failed");
                        ChannelReply::Error { detail: channel_error_detail(&err) }
                    }
                }
            }
        }
        Ok(InboundMessage::Frame { payload }) => {
            state.notifier().publish_monitor(
                exam_id,
                MonitorEvent::Frame { session_id: session_id.to_string(), payload },
            );
            return;
        }
        Err(err) => ChannelReply::Error { detail: format!("Malformed message: {err}") },
    };

    match serde_json::to_string(&reply) {
        Ok(text) => {
            if replies.send(text).await.is_err() {
                tracing::debug!(session_id, "Candidate channel went away before reply");
            }
        }
        Err(err) => tracing::debug!(session_id, error = %err, "Channel reply is not serializable"),
    }
}

fn channel_error_detail(err: &IntegrityError) -> String {
    match err {
        IntegrityError::Store(_) | IntegrityError::ExamConfigMissing(_) => {
            "Internal error".to_string()
        }
        other => other.to_string(),
    }
}

pub(crate) async fn monitor_channel(
    ws: WebSocketUpgrade,
    Path(exam_id): Path<String>,
    CurrentStaff(staff): CurrentStaff,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let exam = state.store().find_exam(&exam_id).await.map_err(IntegrityError::from)?;
    if exam.is_none() {
        return Err(ApiError::NotFound("Exam not found".to_string()));
    }

    tracing::info!(exam_id, staff_id = %staff, "Monitor channel opened");
    Ok(ws.on_upgrade(move |socket| run_monitor_channel(socket, state, exam_id)))
}

async fn run_monitor_channel(socket: WebSocket, state: AppState, exam_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.notifier().subscribe_exam(&exam_id);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::debug!(error = %err, "Monitor event is not serializable"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(exam_id, skipped, "Monitor channel lagged");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(exam_id, "Monitor channel closed");
}
