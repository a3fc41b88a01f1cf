use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct CollectConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub storage: StorageConfig,
    pub broker: BrokerConfig,
    pub psk: PskSourceConfig,
    pub session: SessionConfig,
    pub notify: NotifyConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub files_bucket: String,
    /// Explicit region; falls back to the AWS SDK region chain.
    pub region: Option<String>,
    pub use_accelerated_endpoint: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub client_role_arn: String,
}

/// Where the packed `key_id:base64` PSK blob comes from.
#[derive(Debug, Clone, Deserialize)]
pub enum PskSourceConfig {
    SsmParameter(String),
    Inline(Secret<String>),
}

impl PskSourceConfig {
    /// An SSM parameter name wins over an inline blob.
    pub fn from_env() -> Result<Self, AppError> {
        match (
            env::var("S3COLLECT_PSK_SECRET").ok(),
            env::var("S3COLLECT_PSK_INLINE").ok(),
        ) {
            (Some(name), _) => Ok(PskSourceConfig::SsmParameter(name)),
            (None, Some(blob)) => Ok(PskSourceConfig::Inline(Secret::new(blob))),
            (None, None) => Err(config_error(
                "either S3COLLECT_PSK_SECRET or S3COLLECT_PSK_INLINE must be set",
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub credential_duration_secs: i64,
    pub continuation_ttl_secs: i64,
    pub refresh_margin_secs: i64,
}

impl SessionConfig {
    /// Seconds after which clients should renew, always short of the
    /// credential's real expiry.
    pub fn refresh_after(&self) -> i64 {
        self.credential_duration_secs - self.refresh_margin_secs
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.credential_duration_secs <= 0 {
            return Err(config_error("credential duration must be positive"));
        }
        if self.refresh_margin_secs <= 0 || self.refresh_margin_secs >= self.credential_duration_secs
        {
            return Err(config_error(
                "refresh margin must be positive and shorter than the credential duration",
            ));
        }
        if self.continuation_ttl_secs < self.credential_duration_secs {
            return Err(config_error(
                "continuation handler TTL must not be shorter than the credential duration",
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credential_duration_secs: 3600,
            continuation_ttl_secs: 3600,
            refresh_margin_secs: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub slack_webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_path: String,
}

impl CollectConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;

        let psk = PskSourceConfig::from_env()?;

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            credential_duration_secs: get_parsed(
                "S3COLLECT_CREDENTIAL_DURATION_SECS",
                defaults.credential_duration_secs,
            )?,
            continuation_ttl_secs: get_parsed(
                "S3COLLECT_CONTINUATION_TTL_SECS",
                defaults.continuation_ttl_secs,
            )?,
            refresh_margin_secs: get_parsed(
                "S3COLLECT_REFRESH_MARGIN_SECS",
                defaults.refresh_margin_secs,
            )?,
        };
        session.validate()?;

        Ok(CollectConfig {
            common: common_config,
            storage: StorageConfig {
                files_bucket: get_env("S3COLLECT_FILES_BUCKET", None)?,
                region: env::var("S3COLLECT_REGION").ok(),
                use_accelerated_endpoint: get_parsed("S3COLLECT_USE_ACCELERATED_ENDPOINT", true)?,
            },
            broker: BrokerConfig {
                client_role_arn: get_env("S3COLLECT_CLIENT_ROLE_ARN", None)?,
            },
            psk,
            session,
            notify: NotifyConfig {
                slack_webhook_url: env::var("S3COLLECT_SLACK_WEBHOOK_URL")
                    .ok()
                    .filter(|url| !url.is_empty()),
            },
            api: ApiConfig {
                base_path: normalize_base_path(&get_env(
                    "S3COLLECT_API_BASE_PATH",
                    Some("/api-prd"),
                )?),
            },
        })
    }
}

/// Leading slash, no trailing slash; the root maps to an empty prefix.
pub fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => Ok(def.to_string()),
            None => Err(AppError::ConfigError(anyhow::anyhow!(format!(
                "{} is required but not set",
                key
            )))),
        },
    }
}

fn get_parsed<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!(format!("{} is invalid: {}", key, e)))
        }),
        Err(_) => Ok(default),
    }
}
