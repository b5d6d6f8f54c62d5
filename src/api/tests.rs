use axum::http::{Method, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::services::exam_policy::ResultVisibility;
use crate::test_support::{self, TestContext, EXAM_ID};

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(test_support::json_request(method, uri, token, body))
        .await
        .expect("response");
    let status = response.status();
    (status, test_support::read_json(response).await)
}

async fn start(ctx: &TestContext, token: &str) -> String {
    let (status, session) = call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/exams/{EXAM_ID}/sessions"),
        Some(token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "response: {session}");
    session["id"].as_str().expect("session id").to_string()
}

#[tokio::test]
async fn candidate_flow_autosave_violations_and_forced_submit() {
    let ctx = TestContext::new().await;
    let token = ctx.candidate_token("u-1");
    let session_id = start(&ctx, &token).await;

    let (status, saved) = call(
        &ctx.app,
        Method::PUT,
        &format!("/api/v1/sessions/{session_id}/answers"),
        Some(&token),
        Some(json!({"answers": {"q1": {"type": "single_choice", "option_id": "a"}}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "response: {saved}");
    assert_eq!(saved["saved"], true);
    assert_eq!(saved["status"], "in_progress");

    let uri = format!("/api/v1/sessions/{session_id}/violations");
    let mut last = Value::Null;
    for _ in 0..3 {
        let (status, outcome) =
            call(&ctx.app, Method::POST, &uri, Some(&token), Some(json!({"kind": "tab_switch"})))
                .await;
        assert_eq!(status, StatusCode::OK, "response: {outcome}");
        last = outcome;
    }
    assert_eq!(last["accepted"], true);
    assert_eq!(last["warning_count"], 3);
    assert_eq!(last["forced_submit"], true);

    let (status, late) =
        call(&ctx.app, Method::POST, &uri, Some(&token), Some(json!({"kind": "tab_switch"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(late["accepted"], false);
    assert_eq!(late["rejection"], "session_terminal");

    let (status, submitted) = call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/sessions/{session_id}/submit"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "response: {submitted}");
    assert_eq!(submitted["status"], "auto_submitted");
    assert_eq!(submitted["replayed"], true);
    assert_eq!(submitted["submitted"], true);
    assert_eq!(submitted["session_id"], session_id.as_str());
    assert_eq!(submitted["score"], 1.0);
    assert_eq!(submitted["total_marks"], 1.0);
    assert_eq!(submitted["passing_marks"], 1.0);
    assert_eq!(submitted["passed"], true);
    assert_eq!(ctx.store.result_count(), 1);

    let (status, session) = call(
        &ctx.app,
        Method::GET,
        &format!("/api/v1/sessions/{session_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["warning_count"], 3);
    assert_eq!(session["answers"]["q1"]["payload"]["option_id"], "a");
}

#[tokio::test]
async fn sessions_are_private_to_their_candidate() {
    let ctx = TestContext::new().await;
    let owner = ctx.candidate_token("u-1");
    let intruder = ctx.candidate_token("u-2");
    let session_id = start(&ctx, &owner).await;

    let (status, _) = call(
        &ctx.app,
        Method::GET,
        &format!("/api/v1/sessions/{session_id}"),
        Some(&intruder),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/sessions/{session_id}/submit"),
        Some(&intruder),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) =
        call(&ctx.app, Method::GET, &format!("/api/v1/sessions/{session_id}"), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, session) = call(
        &ctx.app,
        Method::GET,
        &format!("/api/v1/sessions/{session_id}"),
        Some(&ctx.staff_token()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["candidate_key"], "user:u-1");
}

#[tokio::test]
async fn staff_endpoints_reject_candidates() {
    let ctx = TestContext::new().await;
    let token = ctx.candidate_token("u-1");
    let session_id = start(&ctx, &token).await;

    let (status, _) = call(
        &ctx.app,
        Method::GET,
        &format!("/api/v1/sessions/{session_id}/violations"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &ctx.app,
        Method::GET,
        &format!("/api/v1/exams/{EXAM_ID}/results"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/sessions/{session_id}/violations"),
        Some(&token),
        Some(json!({"kind": "copy_paste", "detail": {"chars": 120}})),
    )
    .await;
    let (status, trail) = call(
        &ctx.app,
        Method::GET,
        &format!("/api/v1/sessions/{session_id}/violations"),
        Some(&ctx.staff_token()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trail[0]["severity"], "high");
    assert_eq!(trail[0]["detail"]["chars"], 120);
}

#[tokio::test]
async fn malformed_violation_kind_is_rejected() {
    let ctx = TestContext::new().await;
    let token = ctx.candidate_token("u-1");
    let session_id = start(&ctx, &token).await;

    let (status, error) = call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/sessions/{session_id}/violations"),
        Some(&token),
        Some(json!({"kind": "<script>"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["detail"], "Invalid violation kind");
}

#[tokio::test]
async fn confirmation_only_exams_withhold_score_fields() {
    let ctx = TestContext::with_visibility(ResultVisibility::ConfirmationOnly).await;
    let token = ctx.candidate_token("u-1");
    let session_id = start(&ctx, &token).await;

    let (status, submitted) = call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/sessions/{session_id}/submit"),
        Some(&token),
        Some(json!({"answers": {"q1": {"type": "single_choice", "option_id": "a"}}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "response: {submitted}");
    assert_eq!(submitted["submitted"], true);
    assert_eq!(submitted["session_id"], session_id.as_str());
    for field in ["score", "total_marks", "passing_marks", "passed", "percentage"] {
        assert!(submitted.get(field).is_none(), "{field} leaked: {submitted}");
    }
}

#[tokio::test]
async fn manual_grading_and_publication_flow() {
    let ctx = TestContext::with_essay().await;
    let token = ctx.candidate_token("u-1");
    let staff = ctx.staff_token();
    let session_id = start(&ctx, &token).await;

    let (status, submitted) = call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/sessions/{session_id}/submit"),
        Some(&token),
        Some(json!({"answers": {
            "q1": {"type": "single_choice", "option_id": "a"},
            "q-essay": {"type": "free_text", "text": "Integrity matters"}
        }})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "response: {submitted}");
    assert_eq!(submitted["result_status"], "pending");
    let result_id = submitted["result_id"].as_str().expect("result id").to_string();

    let (status, _) = call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/results/{result_id}/publish"),
        Some(&staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, graded) = call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/results/{result_id}/manual-grades"),
        Some(&staff),
        Some(json!({"question_id": "q-essay", "marks": 4.0, "feedback": "Solid"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "response: {graded}");
    assert_eq!(graded["status"], "graded");
    assert_eq!(graded["report"]["score"]["clamped_total"], 5.0);
    assert_eq!(graded["rank"], 1);

    let (status, _) = call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/results/{result_id}/manual-grades"),
        Some(&staff),
        Some(json!({"question_id": "q1", "marks": 1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, published) = call(
        &ctx.app,
        Method::POST,
        &format!("/api/v1/results/{result_id}/publish"),
        Some(&staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(published["newly_published"], true);
    assert_eq!(published["status"], "published");

    let (status, ranked) = call(
        &ctx.app,
        Method::GET,
        &format!("/api/v1/exams/{EXAM_ID}/results"),
        Some(&staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ranked.as_array().map(Vec::len), Some(1));
    assert_eq!(ranked[0]["percentile"], 100.0);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let ctx = TestContext::new().await;
    let token = ctx.candidate_token("u-1");

    let (status, error) = call(
        &ctx.app,
        Method::POST,
        "/api/v1/sessions/ghost/submit",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["status"], 404);
}
