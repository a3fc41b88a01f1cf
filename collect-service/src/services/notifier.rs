use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("Webhook rejected notification: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// An upload session that the client reported as finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionNotice {
    pub name: String,
    pub campaign: String,
    pub console_url: String,
}

impl CompletionNotice {
    pub fn new(name: &str, campaign: &str, bucket: &str, prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            campaign: campaign.to_string(),
            console_url: console_url(bucket, prefix),
        }
    }

    pub fn text(&self) -> String {
        format!(
            ":mailbox: {} uploaded files to {} (<{}|S3 console>)",
            self.name, self.campaign, self.console_url
        )
    }
}

pub fn console_url(bucket: &str, prefix: &str) -> String {
    format!(
        "https://s3.console.aws.amazon.com/s3/buckets/{}/{}",
        urlencoding::encode(bucket),
        prefix
    )
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

/// Posts notices to a Slack incoming webhook.
pub struct SlackWebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl SlackWebhookNotifier {
    pub fn new(client: Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl CompletionNotifier for SlackWebhookNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        let text = notice.text();
        let payload = serde_json::to_string(&SlackPayload { text: &text })?;

        let response = self
            .client
            .post(&self.webhook_url)
            .form(&[("payload", payload)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(campaign = %notice.campaign, name = %notice.name, "Completion notice posted");
        Ok(())
    }
}

/// Logs notices instead of sending them; used when no webhook is configured.
#[derive(Default)]
pub struct LogNotifier {
    sent: Mutex<Vec<CompletionNotice>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<CompletionNotice> {
        self.sent
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionNotifier for LogNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        tracing::info!(
            campaign = %notice.campaign,
            name = %notice.name,
            console_url = %notice.console_url,
            "[LOG] Completion notice"
        );
        if let Ok(mut guard) = self.sent.lock() {
            guard.push(notice.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_text_links_to_prefix() {
        let notice = CompletionNotice::new("alice", "spring-fair", "files bucket", "spring-fair/alice/p/");

        assert_eq!(
            notice.console_url,
            "https://s3.console.aws.amazon.com/s3/buckets/files%20bucket/spring-fair/alice/p/"
        );
        assert_eq!(
            notice.text(),
            ":mailbox: alice uploaded files to spring-fair \
             (<https://s3.console.aws.amazon.com/s3/buckets/files%20bucket/spring-fair/alice/p/|S3 console>)"
        );
    }

    #[tokio::test]
    async fn log_notifier_records_notices() {
        let notifier = LogNotifier::new();
        let notice = CompletionNotice::new("alice", "spring-fair", "files", "spring-fair/alice/p/");

        notifier.notify(&notice).await.unwrap();
        assert_eq!(notifier.sent(), vec![notice]);
    }
}
