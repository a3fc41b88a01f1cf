//! Campaign tokens and continuation handlers.
//!
//! Both are colon-delimited, HMAC-SHA384 signed capability strings:
//!
//! - campaign token: `version:key_id:signature:expiry:campaign`, signed over
//!   `expiry:campaign`
//! - continuation handler: `version:signature:expiry:session_prefix`, signed
//!   over `expiry:session_prefix` with the PSK of the campaign token that
//!   opened the session
//!
//! Raw strings are parsed into typed records at the boundary. Verification
//! walks parse, key lookup, expiry and signature in that order and ends in a
//! [`Verdict`]. The reason for a rejection is logged and counted but never
//! reaches the client.

use crate::services::psk::{Psk, PskError, PskStore};
use chrono::Utc;
use metrics::counter;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::utils::signature;
use std::fmt;
use std::sync::Arc;

pub const TOKEN_VERSION: &str = "1";

/// Outcome of splitting a raw token string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Complete(T),
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Incomplete,
    UnknownKey,
    Expired,
    BadSignature,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Incomplete => "incomplete",
            Rejection::UnknownKey => "unknown_key",
            Rejection::Expired => "expired",
            Rejection::BadSignature => "bad_signature",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    Valid(T),
    Invalid(Rejection),
}

impl<T> Verdict<T> {
    pub fn valid(self) -> Option<T> {
        match self {
            Verdict::Valid(value) => Some(value),
            Verdict::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignToken {
    pub version: String,
    pub key_id: String,
    pub signature: String,
    pub expiry: String,
    pub campaign: String,
}

impl CampaignToken {
    pub fn parse(raw: &str) -> Parsed<Self> {
        match split_fields::<5>(raw) {
            Some([version, key_id, signature, expiry, campaign]) => Parsed::Complete(Self {
                version,
                key_id,
                signature,
                expiry,
                campaign,
            }),
            None => Parsed::Incomplete,
        }
    }

    pub fn signature_payload(&self) -> String {
        signature_payload(&self.expiry, &self.campaign)
    }
}

impl fmt::Display for CampaignToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.version, self.key_id, self.signature, self.expiry, self.campaign
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationHandler {
    pub version: String,
    pub signature: String,
    pub expiry: String,
    pub session_prefix: String,
}

impl ContinuationHandler {
    pub fn parse(raw: &str) -> Parsed<Self> {
        match split_fields::<4>(raw) {
            Some([version, signature, expiry, session_prefix]) => Parsed::Complete(Self {
                version,
                signature,
                expiry,
                session_prefix,
            }),
            None => Parsed::Incomplete,
        }
    }

    pub fn signature_payload(&self) -> String {
        signature_payload(&self.expiry, &self.session_prefix)
    }
}

impl fmt::Display for ContinuationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.version, self.signature, self.expiry, self.session_prefix
        )
    }
}

/// What a valid campaign token grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCampaign {
    pub key_id: String,
    pub campaign: String,
}

fn signature_payload(expiry: &str, subject: &str) -> String {
    format!("{}:{}", expiry, subject)
}

/// Split into exactly `N` fields, the last one keeping any further colons.
/// Any missing or empty field makes the token incomplete.
fn split_fields<const N: usize>(raw: &str) -> Option<[String; N]> {
    let mut parts = raw.splitn(N, ':');
    let mut fields: [String; N] = std::array::from_fn(|_| String::new());
    for field in fields.iter_mut() {
        let part = parts.next().filter(|p| !p.is_empty())?;
        *field = part.to_string();
    }
    Some(fields)
}

/// An unparseable expiry is treated as already expired.
fn is_expired(expiry: &str, now: i64) -> bool {
    match expiry.parse::<i64>() {
        Ok(expiry) => now > expiry,
        Err(_) => true,
    }
}

pub struct TokenEngine {
    psks: Arc<PskStore>,
}

impl TokenEngine {
    pub fn new(psks: Arc<PskStore>) -> Self {
        Self { psks }
    }

    pub async fn verify_campaign(&self, raw: &str) -> Result<Verdict<VerifiedCampaign>, AppError> {
        self.verify_campaign_at(raw, Utc::now().timestamp()).await
    }

    pub async fn verify_campaign_at(
        &self,
        raw: &str,
        now: i64,
    ) -> Result<Verdict<VerifiedCampaign>, AppError> {
        let token = match CampaignToken::parse(raw) {
            Parsed::Complete(token) => token,
            Parsed::Incomplete => return Ok(reject("campaign", Rejection::Incomplete)),
        };

        let psk = match self.lookup(&token.key_id).await? {
            Some(psk) => psk,
            None => return Ok(reject("campaign", Rejection::UnknownKey)),
        };

        if let Some(rejection) = check(
            &psk,
            &token.expiry,
            &token.signature_payload(),
            &token.signature,
            now,
        )? {
            return Ok(reject("campaign", rejection));
        }

        Ok(Verdict::Valid(VerifiedCampaign {
            key_id: token.key_id,
            campaign: token.campaign,
        }))
    }

    /// Verify a continuation handler under the key of the campaign token that
    /// opened the session; yields the session prefix.
    pub async fn verify_continuation(
        &self,
        key_id: &str,
        raw: &str,
    ) -> Result<Verdict<String>, AppError> {
        self.verify_continuation_at(key_id, raw, Utc::now().timestamp())
            .await
    }

    pub async fn verify_continuation_at(
        &self,
        key_id: &str,
        raw: &str,
        now: i64,
    ) -> Result<Verdict<String>, AppError> {
        let handler = match ContinuationHandler::parse(raw) {
            Parsed::Complete(handler) => handler,
            Parsed::Incomplete => return Ok(reject("continuation", Rejection::Incomplete)),
        };

        let psk = match self.lookup(key_id).await? {
            Some(psk) => psk,
            None => return Ok(reject("continuation", Rejection::UnknownKey)),
        };

        if let Some(rejection) = check(
            &psk,
            &handler.expiry,
            &handler.signature_payload(),
            &handler.signature,
            now,
        )? {
            return Ok(reject("continuation", rejection));
        }

        Ok(Verdict::Valid(handler.session_prefix))
    }

    pub async fn mint_continuation(
        &self,
        key_id: &str,
        session_prefix: &str,
        ttl_secs: i64,
    ) -> Result<String, AppError> {
        self.mint_continuation_at(key_id, session_prefix, ttl_secs, Utc::now().timestamp())
            .await
    }

    pub async fn mint_continuation_at(
        &self,
        key_id: &str,
        session_prefix: &str,
        ttl_secs: i64,
        now: i64,
    ) -> Result<String, AppError> {
        // The key id comes from an already verified token, so a miss here is
        // a server-side fault.
        let psk = self.require(key_id).await?;

        let mut handler = ContinuationHandler {
            version: TOKEN_VERSION.to_string(),
            signature: String::new(),
            expiry: (now + ttl_secs).to_string(),
            session_prefix: session_prefix.to_string(),
        };
        handler.signature =
            signature::sign(psk.expose_secret(), &handler.signature_payload())?;

        Ok(handler.to_string())
    }

    /// Issue a campaign token expiring at `expiry` (unix seconds).
    pub async fn issue_campaign(
        &self,
        key_id: &str,
        campaign: &str,
        expiry: i64,
    ) -> Result<String, AppError> {
        let psk = self.require(key_id).await?;

        let mut token = CampaignToken {
            version: TOKEN_VERSION.to_string(),
            key_id: key_id.to_string(),
            signature: String::new(),
            expiry: expiry.to_string(),
            campaign: campaign.to_string(),
        };
        token.signature = signature::sign(psk.expose_secret(), &token.signature_payload())?;

        Ok(token.to_string())
    }

    async fn lookup(&self, key_id: &str) -> Result<Option<Psk>, AppError> {
        match self.psks.resolve(key_id).await {
            Ok(psk) => Ok(Some(psk)),
            Err(PskError::NotFound(_)) => Ok(None),
            Err(PskError::Unavailable(e)) => Err(AppError::InternalError(e)),
        }
    }

    async fn require(&self, key_id: &str) -> Result<Psk, AppError> {
        self.lookup(key_id).await?.ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("PSK {} is not available", key_id))
        })
    }
}

/// Expiry then signature, against a single `now` sample.
fn check(
    psk: &Psk,
    expiry: &str,
    payload: &str,
    provided: &str,
    now: i64,
) -> Result<Option<Rejection>, AppError> {
    if is_expired(expiry, now) {
        return Ok(Some(Rejection::Expired));
    }
    if !signature::verify(psk.expose_secret(), payload, provided)? {
        return Ok(Some(Rejection::BadSignature));
    }
    Ok(None)
}

fn reject<T>(kind: &'static str, rejection: Rejection) -> Verdict<T> {
    tracing::info!(kind = kind, reason = rejection.as_str(), "Token rejected");
    counter!(
        "collect_token_rejections_total",
        "kind" => kind,
        "reason" => rejection.as_str()
    )
    .increment(1);
    Verdict::Invalid(rejection)
}
