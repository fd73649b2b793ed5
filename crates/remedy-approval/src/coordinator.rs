//! Approval coordinator
//!
//! Owns the table of pending requests. A run parks in
//! [`ApprovalCoordinator::request_approval`] on a watch channel for its
//! record; [`approve`](ApprovalCoordinator::approve) and
//! [`deny`](ApprovalCoordinator::deny) are the only mutators and wake it.
//! Resolution happens exactly once per request.

use crate::error::ApprovalError;
use crate::notifier::{EscalationNotifier, LogNotifier, WebhookNotifier};
use crate::request::{ApprovalOutcome, ApprovalRecord, ApprovalRequest};
use dashmap::DashMap;
use moka::future::Cache;
use remedy_core::{ApprovalConfig, ApprovalStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const ANNOUNCEMENT_CAPACITY: usize = 64;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

struct PendingEntry {
    record: ApprovalRecord,
    wake: watch::Sender<ApprovalStatus>,
}

/// Removes the pending entry when the waiting run finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingEntry>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Approval coordinator
#[derive(Clone)]
pub struct ApprovalCoordinator {
    pending: Arc<DashMap<String, PendingEntry>>,
    resolved: Cache<String, ApprovalRecord>,
    announcements: broadcast::Sender<ApprovalRequest>,
    notifier: Arc<dyn EscalationNotifier>,
    default_timeout: Duration,
}

impl ApprovalCoordinator {
    /// Create coordinator
    ///
    /// `resolved_history` bounds how many resolved records are kept to
    /// answer late `approve`/`deny` calls.
    #[must_use]
    pub fn new(
        default_timeout: Duration,
        resolved_history: u64,
        notifier: Arc<dyn EscalationNotifier>,
    ) -> Self {
        let (announcements, _) = broadcast::channel(ANNOUNCEMENT_CAPACITY);
        Self {
            pending: Arc::new(DashMap::new()),
            resolved: Cache::builder().max_capacity(resolved_history.max(1)).build(),
            announcements,
            notifier,
            default_timeout,
        }
    }

    /// Create coordinator from configuration
    ///
    /// Escalations go to the configured webhook, or to the log when none is set.
    ///
    /// # Errors
    /// Returns [`ApprovalError::Notification`] if the webhook client cannot be built.
    pub fn from_config(config: &ApprovalConfig) -> Result<Self, ApprovalError> {
        let notifier: Arc<dyn EscalationNotifier> = match &config.escalation_webhook {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone(), WEBHOOK_TIMEOUT)?),
            None => Arc::new(LogNotifier),
        };
        Ok(Self::new(config.timeout(), config.resolved_history, notifier))
    }

    /// Timeout applied to requests built by the engine
    #[inline]
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Receive every newly registered request
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.announcements.subscribe()
    }

    /// Register a request and wait for its resolution
    ///
    /// Returns once enough distinct approvers approved, any approver denied,
    /// or the request timed out. A request needing no approvers resolves
    /// `Approved` immediately without being registered.
    pub async fn request_approval(&self, request: ApprovalRequest) -> ApprovalRecord {
        if request.required_approvals == 0 {
            let mut record = ApprovalRecord::pending(request);
            record.resolve(ApprovalStatus::Approved, None);
            return record;
        }

        let id = request.id.clone();
        let timeout = request.timeout();
        let fallback = request.clone();
        let (wake, mut waiter) = watch::channel(ApprovalStatus::Pending);
        self.pending.insert(
            id.clone(),
            PendingEntry {
                record: ApprovalRecord::pending(request.clone()),
                wake,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        tracing::info!(
            request_id = %id,
            run_id = %request.run_id,
            risk = %request.risk,
            required = request.required_approvals,
            timeout_ms = request.timeout_ms,
            "approval requested"
        );
        let _ = self.announcements.send(request);

        // Elapsed is not an error here: settle() turns it into Timeout or Escalated
        let _ = tokio::time::timeout(timeout, waiter.wait_for(ApprovalStatus::is_terminal)).await;

        let record = self.settle(&id).unwrap_or_else(|| {
            let mut record = ApprovalRecord::pending(fallback);
            record.resolve(ApprovalStatus::Timeout, None);
            record
        });
        self.resolved.insert(id.clone(), record.clone()).await;

        metrics::counter!("remedy_approvals_total", "status" => record.status.as_str()).increment(1);
        match record.status {
            ApprovalStatus::Escalated | ApprovalStatus::Timeout => self.escalate(&record),
            status => tracing::info!(
                request_id = %id,
                %status,
                resolved_by = record.resolved_by.as_deref().unwrap_or(""),
                "approval resolved"
            ),
        }
        record
    }

    /// Resolve an expired request and return the final record
    fn settle(&self, id: &str) -> Option<ApprovalRecord> {
        let mut entry = self.pending.get_mut(id)?;
        let entry = &mut *entry;
        if !entry.record.status.is_terminal() {
            let status = if entry.record.request.approvers.is_empty() {
                ApprovalStatus::Timeout
            } else {
                ApprovalStatus::Escalated
            };
            entry.record.resolve(status, None);
            entry.wake.send_replace(status);
        }
        Some(entry.record.clone())
    }

    fn escalate(&self, record: &ApprovalRecord) {
        tracing::warn!(
            request_id = %record.request.id,
            status = %record.status,
            approvals = record.request.approvers.len(),
            required = record.request.required_approvals,
            "approval timed out, escalating"
        );
        let notifier = Arc::clone(&self.notifier);
        let record = record.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&record).await {
                tracing::warn!(request_id = %record.request.id, error = %e, "escalation delivery failed");
            }
        });
    }

    /// Record an approval
    ///
    /// A repeat approval by the same identity is reported as
    /// [`ApprovalOutcome::Duplicate`] and does not count.
    ///
    /// # Errors
    /// - `ApprovalError::InvalidApprover` for an empty identity
    /// - `ApprovalError::NotFound` for an unknown or forgotten id
    pub async fn approve(
        &self,
        request_id: &str,
        approver: &str,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(ApprovalError::InvalidApprover);
        }

        let outcome = self.pending.get_mut(request_id).map(|mut entry| {
            let entry = &mut *entry;
            let record = &mut entry.record;
            if record.status.is_terminal() {
                ApprovalOutcome::AlreadyResolved(record.status)
            } else if !record.request.approvers.insert(approver.to_string()) {
                ApprovalOutcome::Duplicate
            } else if record.request.is_satisfied() {
                record.resolve(ApprovalStatus::Approved, Some(approver));
                entry.wake.send_replace(ApprovalStatus::Approved);
                ApprovalOutcome::Approved
            } else {
                ApprovalOutcome::Recorded {
                    approvals: record.request.approvers.len(),
                    required: record.request.required_approvals,
                }
            }
        });
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => ApprovalOutcome::AlreadyResolved(self.resolved_status(request_id).await?),
        };

        tracing::info!(%request_id, %approver, ?outcome, "approval received");
        Ok(outcome)
    }

    /// Deny a request; takes effect immediately whatever approvals exist
    ///
    /// # Errors
    /// Same as [`approve`](Self::approve).
    pub async fn deny(
        &self,
        request_id: &str,
        approver: &str,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(ApprovalError::InvalidApprover);
        }

        let outcome = self.pending.get_mut(request_id).map(|mut entry| {
            let entry = &mut *entry;
            if entry.record.resolve(ApprovalStatus::Denied, Some(approver)) {
                entry.wake.send_replace(ApprovalStatus::Denied);
                ApprovalOutcome::Denied
            } else {
                ApprovalOutcome::AlreadyResolved(entry.record.status)
            }
        });
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => ApprovalOutcome::AlreadyResolved(self.resolved_status(request_id).await?),
        };

        tracing::info!(%request_id, %approver, ?outcome, "denial received");
        Ok(outcome)
    }

    async fn resolved_status(&self, request_id: &str) -> Result<ApprovalStatus, ApprovalError> {
        self.resolved
            .get(request_id)
            .await
            .map(|record| record.status)
            .ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))
    }

    /// Current record of a pending or recently resolved request
    pub async fn status(&self, request_id: &str) -> Option<ApprovalRecord> {
        let pending = self
            .pending
            .get(request_id)
            .map(|entry| entry.record.clone());
        match pending {
            Some(record) => Some(record),
            None => self.resolved.get(request_id).await,
        }
    }

    /// Requests still waiting for approvers, oldest first
    #[must_use]
    pub fn pending(&self) -> Vec<ApprovalRecord> {
        let mut records: Vec<ApprovalRecord> = self
            .pending
            .iter()
            .filter(|entry| !entry.record.status.is_terminal())
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by_key(|r| r.request.created_at);
        records
    }
}

impl std::fmt::Debug for ApprovalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalCoordinator")
            .field("pending", &self.pending.len())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}
