//! Integration tests for confirming finished upload sessions.

mod common;

use axum::http::StatusCode;
use common::{TestApp, BUCKET, CAMPAIGN, KEY_ID, OTHER_KEY_ID};
use serde_json::json;

/// Start a session and return (token, prefix, continuation_handler).
async fn start_session(app: &TestApp, name: &str) -> (String, String, String) {
    let token = app.campaign_token(KEY_ID, 600).await;
    let (status, body) = app
        .post_json(
            &TestApp::sessions_path(),
            &json!({ "name": name, "token": token }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    (
        token,
        body["prefix"].as_str().unwrap().to_string(),
        body["continuation_handler"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn completion_notifies_with_session_prefix() {
    let app = TestApp::spawn();
    let (token, prefix, handler) = start_session(&app, "alice_b").await;

    let (status, body) = app
        .post_json(
            &TestApp::complete_path(),
            &json!({ "name": "alice_b", "token": token, "continuation_handler": handler }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let sent = app.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].name, "alice_b");
    assert_eq!(sent[0].campaign, CAMPAIGN);
    assert_eq!(
        sent[0].console_url,
        format!("https://s3.console.aws.amazon.com/s3/buckets/{}/{}", BUCKET, prefix)
    );
    assert!(sent[0].text().starts_with(":mailbox: alice_b uploaded files to spring-fair"));

    // Completion never mints credentials.
    assert_eq!(app.broker.issue_count(), 1);
}

#[tokio::test]
async fn completion_without_continuation_handler_is_a_bad_request() {
    let app = TestApp::spawn();
    let token = app.campaign_token(KEY_ID, 600).await;

    for body in [
        json!({ "name": "alice", "token": token }),
        json!({ "name": "alice", "token": token, "continuation_handler": null }),
    ] {
        let (status, response) = app.post_json(&TestApp::complete_path(), &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["message"], "invalid continuation_handler");
    }
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn completion_requires_the_session_campaign_key() {
    let app = TestApp::spawn();
    let (_, _, handler) = start_session(&app, "alice").await;

    // A valid token under a different key cannot resume the session.
    let other_token = app.campaign_token(OTHER_KEY_ID, 600).await;
    let (status, body) = app
        .post_json(
            &TestApp::complete_path(),
            &json!({ "name": "alice", "token": other_token, "continuation_handler": handler }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid continuation_handler");
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn completion_checks_name_then_token() {
    let app = TestApp::spawn();
    let (token, _, handler) = start_session(&app, "alice").await;

    let (status, body) = app
        .post_json(
            &TestApp::complete_path(),
            &json!({ "name": "alice/../bob", "token": token, "continuation_handler": handler }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "name has an invalid format");

    let (status, _) = app
        .post_json(
            &TestApp::complete_path(),
            &json!({ "name": "alice", "token": "1:k1:00:1:x", "continuation_handler": handler }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.notifier.sent().is_empty());
}
