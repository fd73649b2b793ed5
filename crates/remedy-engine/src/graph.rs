//! Remediation state machine
//!
//! An explicit routing table interpreted by a driver loop. Nodes run strictly
//! one after another; after each, [`Node::next`] reads the merged state and
//! picks the successor.
//!
//! ```text
//! evaluate_policy   allowed -> resolve_playbook, else END
//! resolve_playbook  -> assess_risk
//! assess_risk       HIGH/CRITICAL -> request_approval, else create_snapshot
//! request_approval  approved -> create_snapshot, else END
//! create_snapshot   captured -> execute_action, else END
//! execute_action    success -> validate_health, else perform_rollback
//! validate_health   passed -> END, failed -> perform_rollback,
//!                   unknown -> END or perform_rollback (on_indeterminate_health)
//! perform_rollback  -> END
//! ```

use crate::error::EngineError;
use crate::nodes;
use crate::playbook::PlaybookCatalog;
use crate::toolkit::Toolkit;
use remedy_approval::{requires_approval, ApprovalCoordinator};
use remedy_core::{
    ApprovalStatus, EngineConfig, IndeterminateHealthPolicy, RemediationState, ValidationOutcome,
};
use remedy_policy::PolicyEngine;
use std::time::Instant;

/// State machine node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    EvaluatePolicy,
    ResolvePlaybook,
    AssessRisk,
    RequestApproval,
    CreateSnapshot,
    ExecuteAction,
    ValidateHealth,
    PerformRollback,
    End,
}

impl Node {
    /// Initial node of every run
    pub const START: Node = Node::EvaluatePolicy;

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::EvaluatePolicy => "evaluate_policy",
            Node::ResolvePlaybook => "resolve_playbook",
            Node::AssessRisk => "assess_risk",
            Node::RequestApproval => "request_approval",
            Node::CreateSnapshot => "create_snapshot",
            Node::ExecuteAction => "execute_action",
            Node::ValidateHealth => "validate_health",
            Node::PerformRollback => "perform_rollback",
            Node::End => "END",
        }
    }

    /// Successor of this node given the state it produced
    ///
    /// # Errors
    /// Returns [`EngineError::MissingField`] when the node did not record the
    /// field its routing depends on.
    pub fn next(
        self,
        state: &RemediationState,
        on_indeterminate: IndeterminateHealthPolicy,
    ) -> Result<Node, EngineError> {
        let node = self.as_str();
        Ok(match self {
            Node::EvaluatePolicy => {
                let decision = state
                    .policy_result
                    .as_ref()
                    .ok_or_else(|| EngineError::missing(node, "policy_result"))?;
                if decision.allowed {
                    Node::ResolvePlaybook
                } else {
                    Node::End
                }
            }
            Node::ResolvePlaybook => Node::AssessRisk,
            Node::AssessRisk => {
                let risk = state
                    .assessed_risk
                    .ok_or_else(|| EngineError::missing(node, "assessed_risk"))?;
                if requires_approval(risk) {
                    Node::RequestApproval
                } else {
                    Node::CreateSnapshot
                }
            }
            Node::RequestApproval => match state.approval_status {
                Some(ApprovalStatus::Approved) => Node::CreateSnapshot,
                Some(_) => Node::End,
                None => return Err(EngineError::missing(node, "approval_status")),
            },
            Node::CreateSnapshot => {
                if state.snapshot.is_some() {
                    Node::ExecuteAction
                } else {
                    Node::End
                }
            }
            Node::ExecuteAction => {
                let result = state
                    .execution_result
                    .as_ref()
                    .ok_or_else(|| EngineError::missing(node, "execution_result"))?;
                if result.is_success() {
                    Node::ValidateHealth
                } else {
                    Node::PerformRollback
                }
            }
            Node::ValidateHealth => match state.validation {
                Some(ValidationOutcome::Passed) => Node::End,
                Some(ValidationOutcome::Failed) => Node::PerformRollback,
                Some(ValidationOutcome::Unknown) => match on_indeterminate {
                    IndeterminateHealthPolicy::Succeed => Node::End,
                    IndeterminateHealthPolicy::Rollback => Node::PerformRollback,
                },
                None => return Err(EngineError::missing(node, "validation")),
            },
            Node::PerformRollback | Node::End => Node::End,
        })
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state machine and the services its nodes use
pub struct RemediationGraph {
    pub(crate) policy: PolicyEngine,
    pub(crate) approvals: ApprovalCoordinator,
    pub(crate) toolkit: Toolkit,
    pub(crate) playbooks: PlaybookCatalog,
    pub(crate) config: EngineConfig,
}

impl RemediationGraph {
    /// Create graph
    #[must_use]
    pub fn new(
        policy: PolicyEngine,
        approvals: ApprovalCoordinator,
        toolkit: Toolkit,
        playbooks: PlaybookCatalog,
        config: EngineConfig,
    ) -> Self {
        Self {
            policy,
            approvals,
            toolkit,
            playbooks,
            config,
        }
    }

    #[inline]
    #[must_use]
    pub fn approvals(&self) -> &ApprovalCoordinator {
        &self.approvals
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drive a run from [`Node::START`] to [`Node::End`]
    ///
    /// The state is updated in place so a failing run keeps every step it
    /// completed.
    ///
    /// # Errors
    /// - `EngineError::MissingField` if a node broke its routing contract
    /// - `EngineError::StepLimit` if the run exceeds `max_steps`
    pub async fn run(&self, state: &mut RemediationState) -> Result<(), EngineError> {
        let mut node = Node::START;
        let mut steps = 0u32;

        while node != Node::End {
            if steps >= self.config.max_steps {
                return Err(EngineError::StepLimit(self.config.max_steps));
            }
            steps += 1;

            let started = Instant::now();
            let mut update = nodes::dispatch(node, self, state).await?;
            update.step.step = state.next_step_number();
            update.step.node = node.as_str().to_string();
            update.step.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            tracing::debug!(
                step = update.step.step,
                node = %node,
                output = %update.step.output_summary,
                duration_ms = update.step.duration_ms,
                "node completed"
            );
            state.apply(update);
            node = node.next(state, self.config.on_indeterminate_health)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RemediationGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationGraph")
            .field("policy", &self.policy)
            .field("approvals", &self.approvals)
            .field("toolkit", &self.toolkit)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
