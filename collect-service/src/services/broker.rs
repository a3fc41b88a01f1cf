//! Trust broker: turns a verified session into a short-lived AWS credential
//! that can only write under the session's storage prefix.

use async_trait::async_trait;
use aws_sdk_sts::Client as StsClient;
use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde_json::json;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("AssumeRole failed: {0}")]
    AssumeRole(String),

    #[error("Broker returned no credentials")]
    MissingCredentials,

    #[error("Invalid session policy: {0}")]
    Policy(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ScopedRoleRequest {
    pub role_arn: String,
    pub session_name: String,
    pub duration_secs: i32,
    pub policy: serde_json::Value,
}

pub struct DelegatedCredentials {
    pub access_key_id: String,
    pub secret_access_key: Secret<String>,
    pub session_token: Secret<String>,
    pub expiration: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TrustBroker: Send + Sync {
    async fn assume_scoped_role(
        &self,
        request: &ScopedRoleRequest,
    ) -> Result<DelegatedCredentials, BrokerError>;
}

/// Write-only access to objects under `prefix` in `bucket`.
pub fn session_policy(bucket: &str, prefix: &str) -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["s3:PutObject", "s3:AbortMultipartUpload"],
                "Resource": format!("arn:aws:s3:::{}/{}*", bucket, prefix),
            }
        ]
    })
}

/// Role session label: `name` with underscores and spaces replaced, tagged
/// with the request id for audit trails.
pub fn session_name(name: &str, request_id: &str) -> String {
    let label: String = name
        .chars()
        .map(|c| if c == '_' || c == ' ' { '-' } else { c })
        .collect();
    format!("{}@{}", label, request_id)
}

pub struct StsTrustBroker {
    client: StsClient,
}

impl StsTrustBroker {
    pub fn new(client: StsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TrustBroker for StsTrustBroker {
    async fn assume_scoped_role(
        &self,
        request: &ScopedRoleRequest,
    ) -> Result<DelegatedCredentials, BrokerError> {
        let policy = serde_json::to_string(&request.policy)?;

        let output = self
            .client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .duration_seconds(request.duration_secs)
            .policy(policy)
            .send()
            .await
            .map_err(|e| {
                BrokerError::AssumeRole(aws_sdk_sts::error::DisplayErrorContext(&e).to_string())
            })?;

        let credentials = output.credentials.ok_or(BrokerError::MissingCredentials)?;
        let expiration = DateTime::<Utc>::from_timestamp(credentials.expiration.secs(), 0);

        Ok(DelegatedCredentials {
            access_key_id: credentials.access_key_id,
            secret_access_key: Secret::new(credentials.secret_access_key),
            session_token: Secret::new(credentials.session_token),
            expiration,
        })
    }
}

/// Mock broker for testing: hands out fake credentials and remembers what it
/// was asked for.
pub struct MockTrustBroker {
    enabled: bool,
    issue_count: AtomicU64,
    requests: Mutex<Vec<ScopedRoleRequest>>,
}

impl MockTrustBroker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            issue_count: AtomicU64::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn issue_count(&self) -> u64 {
        self.issue_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ScopedRoleRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TrustBroker for MockTrustBroker {
    async fn assume_scoped_role(
        &self,
        request: &ScopedRoleRequest,
    ) -> Result<DelegatedCredentials, BrokerError> {
        if let Ok(mut guard) = self.requests.lock() {
            guard.push(request.clone());
        }

        if !self.enabled {
            return Err(BrokerError::AssumeRole(
                "Mock trust broker is not enabled".to_string(),
            ));
        }

        let n = self.issue_count.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            session_name = %request.session_name,
            duration_secs = request.duration_secs,
            "[MOCK] Scoped credentials would be issued"
        );

        Ok(DelegatedCredentials {
            access_key_id: format!("ASIAMOCK{:012}", n),
            secret_access_key: Secret::new(format!("mock-secret-{}", n)),
            session_token: Secret::new(format!("mock-session-token-{}", n)),
            expiration: Some(Utc::now() + chrono::Duration::seconds(request.duration_secs as i64)),
        })
    }
}
