//! Policy engine
//!
//! Combines risk classification, the rate tracker and the external decision
//! service. Evaluation fails closed: any client error becomes a denial.

use crate::client::{PolicyClient, PolicyInput};
use crate::rate::RateTracker;
use crate::risk;
use remedy_core::{Environment, PolicyDecision, RemediationAction, RiskLevel};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Reason recorded when the decision service cannot be consulted
pub const FAIL_CLOSED_REASON: &str = "policy service unreachable; defaulting to deny";

/// Policy engine
#[derive(Clone)]
pub struct PolicyEngine {
    client: Arc<dyn PolicyClient>,
    rate: RateTracker,
    agent_id: String,
}

impl PolicyEngine {
    /// Create engine
    #[must_use]
    pub fn new(client: Arc<dyn PolicyClient>, rate: RateTracker, agent_id: impl Into<String>) -> Self {
        Self {
            client,
            rate,
            agent_id: agent_id.into(),
        }
    }

    /// Identity sent with each request
    #[inline]
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    #[inline]
    #[must_use]
    pub fn rate_tracker(&self) -> &RateTracker {
        &self.rate
    }

    /// See [`risk::classify_risk`]
    #[inline]
    #[must_use]
    pub fn classify_risk(&self, action_type: &str, environment: Environment) -> RiskLevel {
        risk::classify_risk(action_type, environment)
    }

    /// Evaluate an action against the decision service
    ///
    /// `context` is caller context; `actions_this_hour`, `environment` and
    /// `classified_risk` are added to it. Every answered evaluation counts
    /// toward the environment's rate window, whatever the verdict.
    pub async fn evaluate(
        &self,
        action: &RemediationAction,
        agent_id: &str,
        mut context: Map<String, Value>,
    ) -> PolicyDecision {
        let environment = action.environment;
        let actions_this_hour = self.rate.count_recent_actions(environment).await;
        let classified = self.classify_risk(&action.action_type, environment);

        context.insert("actions_this_hour".into(), Value::from(actions_this_hour));
        context.insert("environment".into(), Value::from(environment.as_str()));
        context.insert("classified_risk".into(), Value::from(classified.as_str()));

        let input = PolicyInput {
            action: action.clone(),
            agent_id: agent_id.to_string(),
            context,
        };

        match self.client.decide(&input).await {
            Ok(verdict) => {
                if let Err(e) = self.rate.increment(environment).await {
                    tracing::warn!(%environment, error = %e, "failed to count evaluated action");
                }

                let result = if verdict.allow { "allowed" } else { "denied" };
                metrics::counter!("remedy_policy_decisions_total", "result" => result).increment(1);
                tracing::info!(
                    action_type = %action.action_type,
                    %environment,
                    allowed = verdict.allow,
                    fail_closed = false,
                    actions_this_hour,
                    "policy decision"
                );

                let mut reasons = verdict.reasons;
                if reasons.is_empty() {
                    reasons.push(format!("{result} by policy"));
                }
                PolicyDecision::from_service(verdict.allow, reasons)
            }
            Err(e) => {
                metrics::counter!("remedy_policy_decisions_total", "result" => "fail_closed")
                    .increment(1);
                tracing::warn!(
                    action_type = %action.action_type,
                    %environment,
                    allowed = false,
                    fail_closed = true,
                    error = %e,
                    "policy service unavailable, denying"
                );
                PolicyDecision::fail_closed(format!("{FAIL_CLOSED_REASON} ({e})"))
            }
        }
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("agent_id", &self.agent_id)
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}
