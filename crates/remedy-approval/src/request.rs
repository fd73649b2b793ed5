//! Approval request model

use chrono::{DateTime, Utc};
use remedy_core::{ApprovalStatus, RemediationAction, RiskLevel, RunId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// True for HIGH and CRITICAL
#[inline]
#[must_use]
pub fn requires_approval(risk: RiskLevel) -> bool {
    risk.requires_approval()
}

/// Distinct approvers needed: 0 (LOW/MEDIUM), 1 (HIGH), 2 (CRITICAL)
#[inline]
#[must_use]
pub fn required_approvals(risk: RiskLevel) -> usize {
    risk.required_approvals()
}

/// Request for human sign-off on one run's action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Request identifier (ULID)
    pub id: String,
    /// Run awaiting the decision
    pub run_id: RunId,
    /// Action to be approved
    pub action: RemediationAction,
    /// Assessed risk
    pub risk: RiskLevel,
    /// Distinct approvers needed
    pub required_approvals: usize,
    pub created_at: DateTime<Utc>,
    /// Milliseconds before the request escalates
    pub timeout_ms: u64,
    /// Distinct approvers so far
    pub approvers: BTreeSet<String>,
}

impl ApprovalRequest {
    /// Create new request; the required count follows from `risk`
    #[must_use]
    pub fn new(run_id: RunId, action: RemediationAction, risk: RiskLevel, timeout: Duration) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            run_id,
            action,
            risk,
            required_approvals: required_approvals(risk),
            created_at: Utc::now(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            approvers: BTreeSet::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Enough distinct approvers recorded
    #[inline]
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.approvers.len() >= self.required_approvals
    }
}

/// Request together with its lifecycle status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub request: ApprovalRequest,
    pub status: ApprovalStatus,
    /// Approver whose call resolved the request, if any
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRecord {
    #[inline]
    #[must_use]
    pub fn pending(request: ApprovalRequest) -> Self {
        Self {
            request,
            status: ApprovalStatus::Pending,
            resolved_by: None,
            resolved_at: None,
        }
    }

    /// Approver identities, sorted
    #[must_use]
    pub fn approvers(&self) -> Vec<String> {
        self.request.approvers.iter().cloned().collect()
    }

    /// Move to a terminal status; no-op if already terminal
    pub(crate) fn resolve(&mut self, status: ApprovalStatus, by: Option<&str>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.resolved_by = by.map(str::to_string);
        self.resolved_at = Some(Utc::now());
        true
    }
}

/// Effect of one `approve` or `deny` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Approval counted; more are needed
    Recorded { approvals: usize, required: usize },
    /// This approval satisfied the request
    Approved,
    /// This call denied the request
    Denied,
    /// Approver had already approved; not counted again
    Duplicate,
    /// Request was already resolved; nothing changed
    AlreadyResolved(ApprovalStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::Environment;

    fn request(risk: RiskLevel) -> ApprovalRequest {
        ApprovalRequest::new(
            RunId::new(),
            RemediationAction::new("drain_node", "node-7", Environment::Production),
            risk,
            Duration::from_secs(60),
        )
    }

    #[test]
    fn required_counts_follow_risk() {
        assert!(!requires_approval(RiskLevel::Medium));
        assert!(requires_approval(RiskLevel::High));
        assert_eq!(request(RiskLevel::High).required_approvals, 1);
        assert_eq!(request(RiskLevel::Critical).required_approvals, 2);
        assert_eq!(required_approvals(RiskLevel::Low), 0);
    }

    #[test]
    fn keeps_sub_second_timeouts() {
        let req = ApprovalRequest::new(
            RunId::new(),
            RemediationAction::new("rollback_deployment", "api", Environment::Production),
            RiskLevel::High,
            Duration::from_millis(500),
        );
        assert_eq!(req.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn resolve_happens_once() {
        let mut record = ApprovalRecord::pending(request(RiskLevel::High));
        assert!(record.resolve(ApprovalStatus::Denied, Some("alice")));
        assert!(!record.resolve(ApprovalStatus::Approved, Some("bob")));
        assert_eq!(record.status, ApprovalStatus::Denied);
        assert_eq!(record.resolved_by.as_deref(), Some("alice"));
    }

    #[test]
    fn serializes_approvers_as_list() {
        let mut req = request(RiskLevel::Critical);
        req.approvers.insert("bob".into());
        req.approvers.insert("alice".into());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["approvers"], serde_json::json!(["alice", "bob"]));
        assert_eq!(json["risk"], "CRITICAL");
    }
}
