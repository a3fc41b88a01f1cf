use crate::services::sessions::SessionGrant;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::{Validate, ValidationError};

pub const INVALID_JSON: &str = "Payload has an invalid JSON";
pub const NAME_MISSING: &str = "name is missing";
pub const NAME_INVALID: &str = "name has an invalid format";

/// Body of both session operations as sent on the wire.
#[derive(Debug, Deserialize)]
struct RawSessionRequest {
    name: Option<String>,
    token: Option<String>,
    continuation_handler: Option<String>,
}

/// A request whose `name` passed validation; tokens are still unverified.
#[derive(Debug, Clone, Validate)]
pub struct SessionRequest {
    #[validate(
        length(min = 1, max = 20, message = "name must be 1 to 20 characters"),
        custom(function = "validate_name_charset")
    )]
    pub name: String,
    pub token: Option<String>,
    pub continuation_handler: Option<String>,
}

impl SessionRequest {
    /// Decode and validate a request body. Nothing token-related is checked
    /// here.
    pub fn from_body(body: &[u8]) -> Result<Self, AppError> {
        let raw: RawSessionRequest =
            serde_json::from_slice(body).map_err(|_| AppError::bad_request(INVALID_JSON))?;

        let request = SessionRequest {
            name: raw.name.ok_or_else(|| AppError::bad_request(NAME_MISSING))?,
            token: raw.token,
            continuation_handler: raw.continuation_handler,
        };
        request
            .validate()
            .map_err(|_| AppError::bad_request(NAME_INVALID))?;

        Ok(request)
    }
}

fn validate_name_charset(name: &str) -> Result<(), ValidationError> {
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        Ok(())
    } else {
        Err(ValidationError::new("name_charset"))
    }
}

#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub region: String,
    pub bucket: String,
    pub prefix: String,
    pub use_accelerated_endpoint: bool,
    pub refresh_after: i64,
    pub continuation_handler: String,
    pub credentials: CredentialsResponse,
}

impl From<SessionGrant> for SessionResponse {
    fn from(grant: SessionGrant) -> Self {
        Self {
            region: grant.region,
            bucket: grant.bucket,
            prefix: grant.prefix,
            use_accelerated_endpoint: grant.use_accelerated_endpoint,
            refresh_after: grant.refresh_after,
            continuation_handler: grant.continuation_handler,
            credentials: CredentialsResponse {
                access_key_id: grant.credentials.access_key_id,
                secret_access_key: grant.credentials.secret_access_key.expose_secret().clone(),
                session_token: grant.credentials.session_token.expose_secret().clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub ok: bool,
}
