//! Pre-shared key resolution.
//!
//! All PSKs live in one packed blob, one `key_id:base64(secret)` record per
//! line. The blob is fetched from a [`SecretSource`] on a cache miss and the
//! decoded secret is kept for the lifetime of the process.

use async_trait::async_trait;
use aws_sdk_ssm::Client as SsmClient;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use dashmap::DashMap;
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PskError {
    #[error("PSK not found: {0}")]
    NotFound(String),

    #[error("Secret store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

pub type Psk = Arc<Secret<Vec<u8>>>;

#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch the packed PSK blob.
    async fn fetch(&self) -> Result<Secret<String>, anyhow::Error>;
}

/// Reads the blob from an encrypted SSM parameter.
pub struct SsmParameterSource {
    client: SsmClient,
    parameter_name: String,
}

impl SsmParameterSource {
    pub fn new(client: SsmClient, parameter_name: impl Into<String>) -> Self {
        Self {
            client,
            parameter_name: parameter_name.into(),
        }
    }
}

#[async_trait]
impl SecretSource for SsmParameterSource {
    async fn fetch(&self) -> Result<Secret<String>, anyhow::Error> {
        let output = self
            .client
            .get_parameter()
            .name(&self.parameter_name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "SSM GetParameter {} failed: {}",
                    self.parameter_name,
                    aws_sdk_ssm::error::DisplayErrorContext(&e)
                )
            })?;

        output
            .parameter
            .and_then(|p| p.value)
            .map(Secret::new)
            .ok_or_else(|| anyhow::anyhow!("SSM parameter {} has no value", self.parameter_name))
    }
}

/// Blob supplied directly, for local development and tests.
pub struct StaticSecretSource {
    blob: Secret<String>,
    fetch_count: AtomicU64,
}

impl StaticSecretSource {
    pub fn new(blob: Secret<String>) -> Self {
        Self {
            blob,
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Build a blob from `(key_id, secret)` pairs.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Self {
        let blob = keys
            .into_iter()
            .map(|(key_id, secret)| format!("{}:{}", key_id, STANDARD.encode(secret)))
            .collect::<Vec<_>>()
            .join("\n");
        Self::new(Secret::new(blob))
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretSource for StaticSecretSource {
    async fn fetch(&self) -> Result<Secret<String>, anyhow::Error> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.blob.clone())
    }
}

/// Resolves key ids to secrets, caching every successful lookup.
pub struct PskStore {
    source: Arc<dyn SecretSource>,
    cache: DashMap<String, Psk>,
}

impl PskStore {
    pub fn new(source: Arc<dyn SecretSource>) -> Self {
        Self {
            source,
            cache: DashMap::new(),
        }
    }

    pub async fn resolve(&self, key_id: &str) -> Result<Psk, PskError> {
        if let Some(psk) = self.cache.get(key_id) {
            return Ok(psk.clone());
        }

        // Concurrent misses may both fetch; they insert the same value.
        let blob = self.source.fetch().await?;
        let psk = find_record(blob.expose_secret(), key_id)
            .map(|secret| Arc::new(Secret::new(secret)))
            .ok_or_else(|| PskError::NotFound(key_id.to_string()))?;

        tracing::info!(key_id = %key_id, "Resolved PSK");
        self.cache.insert(key_id.to_string(), psk.clone());
        Ok(psk)
    }
}

/// First record whose key id matches, decoded. Empty or undecodable secrets
/// count as missing.
fn find_record(blob: &str, key_id: &str) -> Option<Vec<u8>> {
    if key_id.is_empty() {
        return None;
    }

    let encoded = blob.lines().find_map(|line| {
        line.strip_prefix(key_id)
            .and_then(|rest| rest.strip_prefix(':'))
    })?;

    match STANDARD.decode(encoded.trim()) {
        Ok(secret) if !secret.is_empty() => Some(secret),
        Ok(_) => {
            tracing::warn!(key_id = %key_id, "PSK record has an empty secret");
            None
        }
        Err(e) => {
            tracing::warn!(key_id = %key_id, error = %e, "PSK record is not valid base64");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSource;

    #[async_trait]
    impl SecretSource for FailingSource {
        async fn fetch(&self) -> Result<Secret<String>, anyhow::Error> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    fn blob(text: &str) -> Arc<StaticSecretSource> {
        Arc::new(StaticSecretSource::new(Secret::new(text.to_string())))
    }

    #[tokio::test]
    async fn resolves_matching_record() {
        // "c2VjcmV0LWE=" is base64("secret-a")
        let source = blob("k2:c2VjcmV0LWI=\nk1:c2VjcmV0LWE=\n");
        let store = PskStore::new(source);

        let psk = store.resolve("k1").await.unwrap();
        assert_eq!(psk.expose_secret().as_slice(), b"secret-a");
    }

    #[tokio::test]
    async fn key_id_must_match_whole_field() {
        let source = blob("k10:c2VjcmV0LWE=");
        let store = PskStore::new(source);

        assert!(matches!(store.resolve("k1").await, Err(PskError::NotFound(_))));
        assert!(store.resolve("k10").await.is_ok());
    }

    #[tokio::test]
    async fn first_matching_record_wins() {
        let source = blob("k1:Zmlyc3Q=\nk1:c2Vjb25k");
        let store = PskStore::new(source);

        let psk = store.resolve("k1").await.unwrap();
        assert_eq!(psk.expose_secret().as_slice(), b"first");
    }

    #[tokio::test]
    async fn missing_empty_or_malformed_records_are_not_found() {
        let source = blob("empty:\nbroken:!!notbase64!!");
        let store = PskStore::new(source);

        assert!(matches!(store.resolve("nope").await, Err(PskError::NotFound(_))));
        assert!(matches!(store.resolve("empty").await, Err(PskError::NotFound(_))));
        assert!(matches!(store.resolve("broken").await, Err(PskError::NotFound(_))));
        assert!(matches!(store.resolve("").await, Err(PskError::NotFound(_))));
    }

    #[tokio::test]
    async fn successful_lookups_are_cached() {
        let source = Arc::new(StaticSecretSource::from_keys([("k1", b"secret-a".as_slice())]));
        let store = PskStore::new(source.clone());

        store.resolve("k1").await.unwrap();
        store.resolve("k1").await.unwrap();
        assert_eq!(source.fetch_count(), 1);

        // Misses are retried against the source every time.
        let _ = store.resolve("k2").await;
        let _ = store.resolve("k2").await;
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn source_failure_is_unavailable() {
        let store = PskStore::new(Arc::new(FailingSource));
        assert!(matches!(store.resolve("k1").await, Err(PskError::Unavailable(_))));
    }
}
