//! Notification collaborators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use driftwatch_core::config::{NotifyConfig, NotifyKind};
use driftwatch_core::{AlertDecision, Notifier, NotifyError};
use reqwest::StatusCode;
use tracing::warn;

pub fn build_notifier(config: &NotifyConfig) -> Result<Arc<dyn Notifier>> {
    match (config.kind, &config.webhook_url) {
        (NotifyKind::Log, _) => Ok(Arc::new(LogNotifier)),
        (NotifyKind::Webhook, Some(url)) => Ok(Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        (NotifyKind::Webhook, None) => {
            anyhow::bail!("notify.webhook_url is required for webhook notifications")
        }
    }
}

/// Emits each alert as a `warn!` event.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, decision: &AlertDecision) -> Result<(), NotifyError> {
        warn!(
            event = "drift.alert",
            target = %decision.target,
            run_id = %decision.run_id,
            severity = %decision.severity,
            reason = %decision.reason,
            new = ?decision.new_addresses,
            "{}",
            decision.summary
        );
        Ok(())
    }
}

/// POSTs the decision as JSON to a webhook.
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("driftwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build webhook HTTP client")?;
        Ok(Self { url, http_client })
    }
}

/// Status handling: 429 is rate limiting, 5xx is transient, other
/// non-success statuses are permanent.
fn status_error(status: StatusCode, body: &str) -> Option<NotifyError> {
    if status.is_success() {
        return None;
    }
    let detail = format!("webhook returned {status}: {}", body.trim());
    Some(if status == StatusCode::TOO_MANY_REQUESTS {
        NotifyError::RateLimited(detail)
    } else if status.is_server_error() {
        NotifyError::Unavailable(detail)
    } else {
        NotifyError::Rejected(detail)
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, decision: &AlertDecision) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(decision)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout(e.to_string())
                } else {
                    NotifyError::Unavailable(e.to_string())
                }
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        match status_error(status, &body) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
