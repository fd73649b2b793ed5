//! Remediation runner
//!
//! Owns one state machine and the history of every run it drove. A run never
//! fails past [`RemediationRunner::remediate`]: engine errors and panics are
//! recorded on the returned state.

use crate::error::EngineError;
use crate::graph::RemediationGraph;
use crate::playbook::PlaybookCatalog;
use crate::toolkit::Toolkit;
use dashmap::DashMap;
use futures::FutureExt;
use remedy_approval::{ApprovalCoordinator, EscalationNotifier};
use remedy_connector::ConnectorRouter;
use remedy_core::{RemediationAction, RemediationState, RemedyConfig, RunId, FAILED_STEP};
use remedy_policy::{HttpPolicyClient, PolicyClient, PolicyEngine, RateTracker};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Drives remediation runs and keeps their final states
#[derive(Debug, Clone)]
pub struct RemediationRunner {
    graph: Arc<RemediationGraph>,
    history: Arc<DashMap<RunId, RemediationState>>,
}

impl RemediationRunner {
    /// Create runner around an assembled graph
    #[must_use]
    pub fn new(graph: RemediationGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            history: Arc::new(DashMap::new()),
        }
    }

    /// Build the production wiring: HTTP policy client, in-memory rate
    /// counters and the configured escalation channel
    ///
    /// # Errors
    /// - `EngineError::Config` if the configuration is invalid
    /// - `EngineError::Policy` if the HTTP client cannot be built
    /// - `EngineError::Approval` if the escalation webhook client cannot be built
    pub fn from_config(config: &RemedyConfig, router: ConnectorRouter) -> Result<Self, EngineError> {
        config.validate()?;
        let client = Arc::new(HttpPolicyClient::from_config(&config.policy)?);
        let approvals = ApprovalCoordinator::from_config(&config.approval)?;
        Ok(Self::assemble(config, client, approvals, router))
    }

    /// Wire a runner around caller-supplied policy client and escalation channel
    #[must_use]
    pub fn with_services(
        config: &RemedyConfig,
        policy: Arc<dyn PolicyClient>,
        notifier: Arc<dyn EscalationNotifier>,
        router: ConnectorRouter,
    ) -> Self {
        let approvals = ApprovalCoordinator::new(
            config.approval.timeout(),
            config.approval.resolved_history,
            notifier,
        );
        Self::assemble(config, policy, approvals, router)
    }

    fn assemble(
        config: &RemedyConfig,
        policy: Arc<dyn PolicyClient>,
        approvals: ApprovalCoordinator,
        router: ConnectorRouter,
    ) -> Self {
        let policy = PolicyEngine::new(
            policy,
            RateTracker::from_config(&config.rate),
            config.policy.agent_id.clone(),
        );
        let toolkit = Toolkit::new(router, config.engine.connector_timeout());
        let playbooks = PlaybookCatalog::from_config(&config.engine, &config.playbooks);
        Self::new(RemediationGraph::new(
            policy,
            approvals,
            toolkit,
            playbooks,
            config.engine.clone(),
        ))
    }

    /// Approval coordinator, the entry point for `approve`/`deny`
    #[inline]
    #[must_use]
    pub fn approvals(&self) -> &ApprovalCoordinator {
        self.graph.approvals()
    }

    #[inline]
    #[must_use]
    pub fn graph(&self) -> &RemediationGraph {
        &self.graph
    }

    /// Run an action through the state machine to a terminal node
    ///
    /// Always returns a complete state. The state is stored in the history
    /// before it is returned.
    pub async fn remediate(
        &self,
        action: RemediationAction,
        alert_context: Option<serde_json::Value>,
        investigation_id: Option<String>,
    ) -> RemediationState {
        let mut state = RemediationState::new(action)
            .with_alert_context(alert_context)
            .with_investigation(investigation_id);
        let clock = Instant::now();
        let span = tracing::info_span!(
            "remediation",
            run_id = %state.run_id,
            action_type = %state.action.action_type,
            environment = %state.action.environment,
        );

        let graph = Arc::clone(&self.graph);
        let result = AssertUnwindSafe(graph.run(&mut state))
            .catch_unwind()
            .instrument(span.clone())
            .await;

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("run panicked: {}", panic_message(&*panic))),
        };
        if let Some(message) = failure {
            span.in_scope(|| tracing::error!(error = %message, "remediation run failed"));
            state.current_step = FAILED_STEP.to_string();
            state.error = Some(message);
        }

        if let (Some(snapshot), Some(playbook)) = (&state.snapshot, &state.playbook) {
            self.graph
                .toolkit
                .release_snapshot(&playbook.provider, &snapshot.id)
                .instrument(span.clone())
                .await;
        }

        let outcome = state.derive_outcome();
        state.outcome = Some(outcome);
        state.duration_ms = Some(u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX));

        metrics::counter!("remedy_runs_total", "outcome" => outcome.as_str()).increment(1);
        span.in_scope(|| {
            tracing::info!(
                %outcome,
                steps = state.reasoning_chain.len(),
                duration_ms = state.duration_ms,
                "remediation finished"
            );
        });

        self.history.insert(state.run_id, state.clone());
        state
    }

    /// Final state of a finished run
    #[must_use]
    pub fn get_remediation(&self, run_id: &RunId) -> Option<RemediationState> {
        self.history.get(run_id).map(|entry| entry.value().clone())
    }

    /// Every finished run, oldest first
    #[must_use]
    pub fn list_remediations(&self) -> Vec<RemediationState> {
        let mut runs: Vec<_> = self.history.iter().map(|e| e.value().clone()).collect();
        runs.sort_by_key(|s| s.started_at);
        runs
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
