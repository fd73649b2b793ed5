//! Escalation channel
//!
//! Invoked when an approval request expires. Delivery is fire-and-forget:
//! the coordinator spawns the call and only logs a failure.

use crate::error::ApprovalError;
use crate::request::ApprovalRecord;
use std::time::Duration;

/// Escalation channel
#[async_trait::async_trait]
pub trait EscalationNotifier: Send + Sync {
    /// Notify the channel about an expired request
    async fn notify(&self, record: &ApprovalRecord) -> Result<(), ApprovalError>;
}

/// Notifier that writes a warning to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl EscalationNotifier for LogNotifier {
    async fn notify(&self, record: &ApprovalRecord) -> Result<(), ApprovalError> {
        tracing::warn!(
            request_id = %record.request.id,
            run_id = %record.request.run_id,
            status = %record.status,
            approvals = record.request.approvers.len(),
            required = record.request.required_approvals,
            action = %record.request.action.summary(),
            "approval request escalated"
        );
        Ok(())
    }
}

/// Notifier posting the record as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create notifier for a webhook URL
    ///
    /// # Errors
    /// Returns [`ApprovalError::Notification`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ApprovalError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApprovalError::Notification(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl EscalationNotifier for WebhookNotifier {
    async fn notify(&self, record: &ApprovalRecord) -> Result<(), ApprovalError> {
        let response = self
            .http
            .post(&self.url)
            .json(record)
            .send()
            .await
            .map_err(|e| ApprovalError::Notification(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApprovalError::Notification(format!(
                "webhook returned HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}
