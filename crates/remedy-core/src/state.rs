//! Remediation run state
//!
//! [`RemediationState`] is the record threaded through the state machine.
//! Nodes never write to it directly: each returns a [`StateUpdate`] that the
//! driver merges with [`RemediationState::apply`].

use crate::types::{
    ActionResult, ApprovalStatus, HealthStatus, PolicyDecision, RemediationAction, RiskLevel,
    RunId, Snapshot, ValidationOutcome,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current step recorded when the run boundary catches an unexpected error
pub const FAILED_STEP: &str = "failed";

/// One entry of the reasoning chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Monotonic step number, starting at 1
    pub step: u32,
    /// Node name
    pub node: String,
    /// What the node looked at
    pub input_summary: String,
    /// What the node concluded
    pub output_summary: String,
    /// Elapsed milliseconds
    pub duration_ms: u64,
    /// Downstream tool used, if any
    pub tool: Option<String>,
}

/// Resolved playbook recorded on the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookRef {
    /// Action type the playbook handles
    pub action_type: String,
    /// Connector provider name
    pub provider: String,
    /// Health probe timeout in milliseconds
    pub health_timeout_ms: u64,
}

impl PlaybookRef {
    #[inline]
    #[must_use]
    pub fn health_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.health_timeout_ms)
    }
}

/// Terminal classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Executed and validated (or validation indeterminate under lenient policy)
    Succeeded,
    /// Denied by policy, fail-closed default, or command guard
    PolicyDenied,
    /// Approval denied, escalated, or timed out
    ApprovalNotGranted,
    /// Ended before execution (e.g. snapshot failure), no side effects
    Aborted,
    /// Execution or validation failed and rollback succeeded
    RolledBack,
    /// Execution or validation failed and rollback failed too
    RollbackFailed,
    /// Unexpected error caught at the run boundary
    Failed,
}

impl RunOutcome {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::PolicyDenied => "policy_denied",
            RunOutcome::ApprovalNotGranted => "approval_not_granted",
            RunOutcome::Aborted => "aborted",
            RunOutcome::RolledBack => "rolled_back",
            RunOutcome::RollbackFailed => "rollback_failed",
            RunOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate record of one remediation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationState {
    pub run_id: RunId,
    pub action: RemediationAction,
    /// Alert/trigger context supplied by the caller
    pub alert_context: Option<serde_json::Value>,
    pub investigation_id: Option<String>,
    pub policy_result: Option<PolicyDecision>,
    pub playbook: Option<PlaybookRef>,
    pub assessed_risk: Option<RiskLevel>,
    pub approval_request_id: Option<String>,
    pub approval_status: Option<ApprovalStatus>,
    /// Distinct approvers recorded when the approval resolved
    pub approvers: Vec<String>,
    pub snapshot: Option<Snapshot>,
    pub execution_result: Option<ActionResult>,
    pub health: Option<HealthStatus>,
    pub validation: Option<ValidationOutcome>,
    pub rollback_result: Option<ActionResult>,
    pub reasoning_chain: Vec<ReasoningStep>,
    pub current_step: String,
    pub error: Option<String>,
    pub outcome: Option<RunOutcome>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
}

impl RemediationState {
    /// Initial state for a new run
    #[must_use]
    pub fn new(action: RemediationAction) -> Self {
        Self {
            run_id: RunId::new(),
            action,
            alert_context: None,
            investigation_id: None,
            policy_result: None,
            playbook: None,
            assessed_risk: None,
            approval_request_id: None,
            approval_status: None,
            approvers: Vec::new(),
            snapshot: None,
            execution_result: None,
            health: None,
            validation: None,
            rollback_result: None,
            reasoning_chain: Vec::new(),
            current_step: "start".to_string(),
            error: None,
            outcome: None,
            started_at: Utc::now(),
            duration_ms: None,
        }
    }

    /// With alert context
    #[inline]
    #[must_use]
    pub fn with_alert_context(mut self, context: Option<serde_json::Value>) -> Self {
        self.alert_context = context;
        self
    }

    /// With investigation id
    #[inline]
    #[must_use]
    pub fn with_investigation(mut self, investigation_id: Option<String>) -> Self {
        self.investigation_id = investigation_id;
        self
    }

    /// Next reasoning step number
    #[inline]
    #[must_use]
    pub fn next_step_number(&self) -> u32 {
        self.reasoning_chain.last().map_or(1, |s| s.step + 1)
    }

    /// Merge a node's partial update
    ///
    /// Fields left `None` in the update keep their current value.
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            step,
            policy_result,
            playbook,
            assessed_risk,
            approval_request_id,
            approval_status,
            approvers,
            snapshot,
            execution_result,
            health,
            validation,
            rollback_result,
            error,
        } = update;

        if let Some(v) = policy_result {
            self.policy_result = Some(v);
        }
        if let Some(v) = playbook {
            self.playbook = Some(v);
        }
        if let Some(v) = assessed_risk {
            self.assessed_risk = Some(v);
        }
        if let Some(v) = approval_request_id {
            self.approval_request_id = Some(v);
        }
        if let Some(v) = approval_status {
            self.approval_status = Some(v);
        }
        if let Some(v) = approvers {
            self.approvers = v;
        }
        if let Some(v) = snapshot {
            self.snapshot = Some(v);
        }
        if let Some(v) = execution_result {
            self.execution_result = Some(v);
        }
        if let Some(v) = health {
            self.health = Some(v);
        }
        if let Some(v) = validation {
            self.validation = Some(v);
        }
        if let Some(v) = rollback_result {
            self.rollback_result = Some(v);
        }
        if let Some(v) = error {
            self.error = Some(v);
        }

        self.current_step.clone_from(&step.node);
        self.reasoning_chain.push(step);
    }

    /// Whether a node with the given name has run
    #[inline]
    #[must_use]
    pub fn visited(&self, node: &str) -> bool {
        self.reasoning_chain.iter().any(|s| s.node == node)
    }

    /// Derive the terminal outcome from the recorded fields
    #[must_use]
    pub fn derive_outcome(&self) -> RunOutcome {
        if self.current_step == FAILED_STEP {
            return RunOutcome::Failed;
        }
        if self.policy_result.as_ref().is_some_and(|p| !p.allowed) {
            return RunOutcome::PolicyDenied;
        }
        if self
            .approval_status
            .is_some_and(|s| s != ApprovalStatus::Approved)
        {
            return RunOutcome::ApprovalNotGranted;
        }
        if let Some(rollback) = &self.rollback_result {
            return if rollback.is_success() {
                RunOutcome::RolledBack
            } else {
                RunOutcome::RollbackFailed
            };
        }
        match (&self.execution_result, self.validation) {
            (Some(exec), Some(ValidationOutcome::Passed | ValidationOutcome::Unknown))
                if exec.is_success() =>
            {
                RunOutcome::Succeeded
            }
            (Some(exec), _) if exec.is_success() => RunOutcome::Failed,
            _ => RunOutcome::Aborted,
        }
    }
}

/// Partial update produced by one node
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub step: ReasoningStep,
    pub policy_result: Option<PolicyDecision>,
    pub playbook: Option<PlaybookRef>,
    pub assessed_risk: Option<RiskLevel>,
    pub approval_request_id: Option<String>,
    pub approval_status: Option<ApprovalStatus>,
    pub approvers: Option<Vec<String>>,
    pub snapshot: Option<Snapshot>,
    pub execution_result: Option<ActionResult>,
    pub health: Option<HealthStatus>,
    pub validation: Option<ValidationOutcome>,
    pub rollback_result: Option<ActionResult>,
    pub error: Option<String>,
}

impl StateUpdate {
    /// Update carrying only a reasoning step
    #[inline]
    #[must_use]
    pub fn new(step: ReasoningStep) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Environment;
    use pretty_assertions::assert_eq;

    fn step(n: u32, node: &str) -> ReasoningStep {
        ReasoningStep {
            step: n,
            node: node.to_string(),
            ..ReasoningStep::default()
        }
    }

    fn state() -> RemediationState {
        RemediationState::new(RemediationAction::new(
            "restart_pod",
            "checkout",
            Environment::Production,
        ))
    }

    #[test]
    fn apply_merges_only_present_fields() {
        let mut s = state();
        s.apply(StateUpdate {
            assessed_risk: Some(RiskLevel::High),
            ..StateUpdate::new(step(1, "assess_risk"))
        });
        s.apply(StateUpdate::new(step(2, "noop")));

        assert_eq!(s.assessed_risk, Some(RiskLevel::High));
        assert_eq!(s.current_step, "noop");
        assert_eq!(s.reasoning_chain.len(), 2);
        assert_eq!(s.next_step_number(), 3);
    }

    #[test]
    fn outcome_policy_denied() {
        let mut s = state();
        s.apply(StateUpdate {
            policy_result: Some(PolicyDecision::fail_closed("unreachable")),
            ..StateUpdate::new(step(1, "evaluate_policy"))
        });
        assert_eq!(s.derive_outcome(), RunOutcome::PolicyDenied);
    }

    #[test]
    fn outcome_rolled_back() {
        let mut s = state();
        let now = Utc::now();
        s.apply(StateUpdate {
            execution_result: Some(ActionResult::failed("a", "boom", "boom", now)),
            ..StateUpdate::new(step(1, "execute_action"))
        });
        s.apply(StateUpdate {
            rollback_result: Some(ActionResult::success("a", "restored", now)),
            ..StateUpdate::new(step(2, "perform_rollback"))
        });
        assert_eq!(s.derive_outcome(), RunOutcome::RolledBack);
    }

    #[test]
    fn outcome_succeeded_on_unknown_validation() {
        let mut s = state();
        let now = Utc::now();
        s.apply(StateUpdate {
            execution_result: Some(ActionResult::success("a", "ok", now)),
            validation: Some(ValidationOutcome::Unknown),
            ..StateUpdate::new(step(1, "validate_health"))
        });
        assert_eq!(s.derive_outcome(), RunOutcome::Succeeded);
    }

    #[test]
    fn state_serializes_for_audit() {
        let s = state();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["action"]["action_type"], "restart_pod");
        assert!(json["reasoning_chain"].as_array().unwrap().is_empty());
    }
}
