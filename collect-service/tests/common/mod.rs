#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use collect_service::config::SessionConfig;
use collect_service::services::{
    LogNotifier, MockTrustBroker, PskStore, SessionService, SessionSettings, StaticSecretSource,
    TokenEngine,
};
use collect_service::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const BASE_PATH: &str = "/api-prd";
pub const KEY_ID: &str = "k1";
pub const OTHER_KEY_ID: &str = "k2";
pub const CAMPAIGN: &str = "spring-fair";
pub const BUCKET: &str = "collect-files-test";
pub const REGION: &str = "ap-northeast-1";

pub struct TestApp {
    pub router: Router,
    pub tokens: Arc<TokenEngine>,
    pub source: Arc<StaticSecretSource>,
    pub broker: Arc<MockTrustBroker>,
    pub notifier: Arc<LogNotifier>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_broker(MockTrustBroker::new(true))
    }

    pub fn with_broker(broker: MockTrustBroker) -> Self {
        let source = Arc::new(StaticSecretSource::from_keys([
            (KEY_ID, b"first-campaign-key".as_slice()),
            (OTHER_KEY_ID, b"second-campaign-key".as_slice()),
        ]));
        let tokens = Arc::new(TokenEngine::new(Arc::new(PskStore::new(source.clone()))));
        let broker = Arc::new(broker);
        let notifier = Arc::new(LogNotifier::new());

        let settings = SessionSettings {
            region: REGION.to_string(),
            bucket: BUCKET.to_string(),
            client_role_arn: "arn:aws:iam::123456789012:role/collect-client".to_string(),
            use_accelerated_endpoint: true,
            timing: SessionConfig::default(),
        };
        let sessions = SessionService::new(
            tokens.clone(),
            broker.clone(),
            notifier.clone(),
            settings,
        );
        let router = build_router(AppState::new(Arc::new(sessions)), BASE_PATH);

        TestApp {
            router,
            tokens,
            source,
            broker,
            notifier,
        }
    }

    /// A campaign token for `CAMPAIGN` expiring `expires_in` seconds from now.
    pub async fn campaign_token(&self, key_id: &str, expires_in: i64) -> String {
        self.tokens
            .issue_campaign(key_id, CAMPAIGN, Utc::now().timestamp() + expires_in)
            .await
            .expect("Failed to issue campaign token")
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> (StatusCode, Value) {
        self.send("POST", path, body.to_string()).await
    }

    pub async fn send(&self, method: &str, path: &str, body: String) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub fn sessions_path() -> String {
        format!("{}/sessions", BASE_PATH)
    }

    pub fn complete_path() -> String {
        format!("{}/complete", BASE_PATH)
    }
}
