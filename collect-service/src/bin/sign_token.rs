//! Issue a campaign token: `sign-token KEY_ID CAMPAIGN EXPIRES_IN_SECS`.
//!
//! The PSK is resolved through the same secret source the service uses
//! (`S3COLLECT_PSK_SECRET` or `S3COLLECT_PSK_INLINE`).

use chrono::Utc;
use collect_service::config::PskSourceConfig;
use collect_service::services::{
    PskStore, SecretSource, SsmParameterSource, StaticSecretSource, TokenEngine,
};
use std::process::ExitCode;
use std::sync::Arc;

fn usage(program: &str) -> ExitCode {
    eprintln!("usage: {} key_name campaign_name expires_in", program);
    ExitCode::from(2)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("sign-token");
    let [_, key_id, campaign, expires_in] = args.as_slice() else {
        return Ok(usage(program));
    };
    let Ok(expires_in) = expires_in.parse::<i64>() else {
        return Ok(usage(program));
    };
    if key_id.is_empty() || campaign.is_empty() || key_id.contains(':') {
        return Ok(usage(program));
    }

    let psk = PskSourceConfig::from_env().map_err(|e| anyhow::anyhow!("{}", e))?;

    let source: Arc<dyn SecretSource> = match psk {
        PskSourceConfig::SsmParameter(name) => {
            let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            Arc::new(SsmParameterSource::new(
                aws_sdk_ssm::Client::new(&sdk_config),
                name,
            ))
        }
        PskSourceConfig::Inline(blob) => Arc::new(StaticSecretSource::new(blob)),
    };
    let engine = TokenEngine::new(Arc::new(PskStore::new(source)));

    let expiry = Utc::now().timestamp() + expires_in;
    let token = engine
        .issue_campaign(key_id, campaign, expiry)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to issue token: {}", e))?;

    println!("{}", token);
    Ok(ExitCode::SUCCESS)
}
