//! Upload session minting and completion.
//!
//! A session is never stored. It is rebuilt on every request from a verified
//! campaign token plus, after the first request, the continuation handler
//! minted for it.

use crate::config::SessionConfig;
use crate::dtos::SessionRequest;
use crate::services::broker::{
    DelegatedCredentials, ScopedRoleRequest, TrustBroker, session_name, session_policy,
};
use crate::services::notifier::{CompletionNotice, CompletionNotifier};
use crate::services::tokens::{TokenEngine, VerifiedCampaign, Verdict};
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use service_core::middleware::tracing::RequestId;
use std::sync::Arc;
use tracing::instrument;

pub const INVALID_TOKEN: &str = "token is invalid; likely mistyped or expired";
pub const INVALID_CONTINUATION: &str = "invalid continuation_handler";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub region: String,
    pub bucket: String,
    pub client_role_arn: String,
    pub use_accelerated_endpoint: bool,
    pub timing: SessionConfig,
}

/// Everything the client needs to upload into its prefix and renew later.
pub struct SessionGrant {
    pub region: String,
    pub bucket: String,
    pub prefix: String,
    pub use_accelerated_endpoint: bool,
    pub refresh_after: i64,
    pub continuation_handler: String,
    pub credentials: DelegatedCredentials,
}

/// Fresh session id: compact UTC timestamp plus the request id.
pub fn fresh_session_prefix(requested_at: DateTime<Utc>, request_id: &RequestId) -> String {
    format!("{}--{}", requested_at.format("%Y%m%dT%H%M%SZ"), request_id)
}

pub fn storage_prefix(campaign: &str, name: &str, session_prefix: &str) -> String {
    format!("{}/{}/{}/", campaign, name, session_prefix)
}

pub struct SessionService {
    tokens: Arc<TokenEngine>,
    broker: Arc<dyn TrustBroker>,
    notifier: Arc<dyn CompletionNotifier>,
    settings: SessionSettings,
}

impl SessionService {
    pub fn new(
        tokens: Arc<TokenEngine>,
        broker: Arc<dyn TrustBroker>,
        notifier: Arc<dyn CompletionNotifier>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            tokens,
            broker,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a session, or refresh one when a continuation handler is given.
    #[instrument(skip_all, fields(request_id = %request_id, name = %request.name))]
    pub async fn start(
        &self,
        request: &SessionRequest,
        request_id: &RequestId,
        requested_at: DateTime<Utc>,
    ) -> Result<SessionGrant, AppError> {
        let campaign = self.authorize(request.token.as_deref()).await?;

        let session_prefix = match request.continuation_handler.as_deref() {
            Some(handler) => self.resume(&campaign, handler).await?,
            None => fresh_session_prefix(requested_at, request_id),
        };
        let prefix = storage_prefix(&campaign.campaign, &request.name, &session_prefix);

        let role_request = ScopedRoleRequest {
            role_arn: self.settings.client_role_arn.clone(),
            session_name: session_name(&request.name, request_id.as_str()),
            duration_secs: i32::try_from(self.settings.timing.credential_duration_secs)
                .map_err(|e| anyhow::anyhow!("credential duration out of range: {}", e))?,
            policy: session_policy(&self.settings.bucket, &prefix),
        };
        let credentials = self
            .broker
            .assume_scoped_role(&role_request)
            .await
            .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;

        let continuation_handler = self
            .tokens
            .mint_continuation(
                &campaign.key_id,
                &session_prefix,
                self.settings.timing.continuation_ttl_secs,
            )
            .await?;

        tracing::info!(
            campaign = %campaign.campaign,
            prefix = %prefix,
            refreshed = request.continuation_handler.is_some(),
            "Issued upload session credentials"
        );

        Ok(SessionGrant {
            region: self.settings.region.clone(),
            bucket: self.settings.bucket.clone(),
            prefix,
            use_accelerated_endpoint: self.settings.use_accelerated_endpoint,
            refresh_after: self.settings.timing.refresh_after(),
            continuation_handler,
            credentials,
        })
    }

    /// Confirm an existing session and announce it; no credentials are minted.
    #[instrument(skip_all, fields(request_id = %request_id, name = %request.name))]
    pub async fn complete(
        &self,
        request: &SessionRequest,
        request_id: &RequestId,
    ) -> Result<CompletionNotice, AppError> {
        let campaign = self.authorize(request.token.as_deref()).await?;

        let handler = request
            .continuation_handler
            .as_deref()
            .ok_or_else(|| AppError::bad_request(INVALID_CONTINUATION))?;
        let session_prefix = self.resume(&campaign, handler).await?;
        let prefix = storage_prefix(&campaign.campaign, &request.name, &session_prefix);

        let notice = CompletionNotice::new(
            &request.name,
            &campaign.campaign,
            &self.settings.bucket,
            &prefix,
        );
        self.notifier
            .notify(&notice)
            .await
            .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;

        tracing::info!(campaign = %campaign.campaign, prefix = %prefix, "Upload session completed");
        Ok(notice)
    }

    async fn authorize(&self, token: Option<&str>) -> Result<VerifiedCampaign, AppError> {
        let token = token.ok_or_else(|| AppError::forbidden(INVALID_TOKEN))?;
        match self.tokens.verify_campaign(token).await? {
            Verdict::Valid(campaign) => Ok(campaign),
            Verdict::Invalid(_) => Err(AppError::forbidden(INVALID_TOKEN)),
        }
    }

    async fn resume(&self, campaign: &VerifiedCampaign, handler: &str) -> Result<String, AppError> {
        self.tokens
            .verify_continuation(&campaign.key_id, handler)
            .await?
            .valid()
            .ok_or_else(|| AppError::bad_request(INVALID_CONTINUATION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fresh_prefix_uses_compact_utc_timestamp() {
        let at = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        let id = RequestId("3f2c".to_string());
        assert_eq!(fresh_session_prefix(at, &id), "20231114T221320Z--3f2c");
    }

    #[test]
    fn storage_prefix_layout() {
        assert_eq!(
            storage_prefix("spring-fair", "alice", "20231114T221320Z--3f2c"),
            "spring-fair/alice/20231114T221320Z--3f2c/"
        );
    }
}
