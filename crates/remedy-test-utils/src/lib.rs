//! Testing utilities for the remedy workspace
//!
//! Fakes for the external boundaries: policy service, connectors and the
//! escalation channel. Each fake records what it was asked.

#![allow(missing_docs)]

use chrono::Utc;
use parking_lot::Mutex;
use remedy_approval::{ApprovalError, ApprovalRecord, EscalationNotifier};
use remedy_connector::{Connector, ConnectorError};
use remedy_core::{
    ActionResult, Environment, HealthStatus, RemediationAction, RemedyConfig, Snapshot,
};
use remedy_policy::{PolicyClient, PolicyError, PolicyInput, PolicyVerdict};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Policy client with a fixed verdict
#[derive(Debug, Default)]
pub struct StaticPolicyClient {
    verdict: PolicyVerdict,
    inputs: Mutex<Vec<PolicyInput>>,
}

impl StaticPolicyClient {
    pub fn allow() -> Self {
        Self {
            verdict: PolicyVerdict::allow(),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn deny(reason: &str) -> Self {
        Self {
            verdict: PolicyVerdict::deny(reason),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().len()
    }

    pub fn inputs(&self) -> Vec<PolicyInput> {
        self.inputs.lock().clone()
    }
}

#[async_trait::async_trait]
impl PolicyClient for StaticPolicyClient {
    async fn decide(&self, input: &PolicyInput) -> Result<PolicyVerdict, PolicyError> {
        self.inputs.lock().push(input.clone());
        Ok(self.verdict.clone())
    }
}

/// Policy client whose service is down
#[derive(Debug, Default)]
pub struct UnreachablePolicyClient {
    calls: AtomicUsize,
}

impl UnreachablePolicyClient {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PolicyClient for UnreachablePolicyClient {
    async fn decide(&self, _input: &PolicyInput) -> Result<PolicyVerdict, PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PolicyError::Transport(
            "http://127.0.0.1:8181: connection refused".into(),
        ))
    }
}

/// Connector method invoked on a [`FakeConnector`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorCall {
    Snapshot(String),
    Execute(String),
    Health(String),
    Rollback(String),
}

impl ConnectorCall {
    pub fn method(&self) -> &'static str {
        match self {
            ConnectorCall::Snapshot(_) => "create_snapshot",
            ConnectorCall::Execute(_) => "execute_action",
            ConnectorCall::Health(_) => "get_health",
            ConnectorCall::Rollback(_) => "rollback",
        }
    }
}

/// How [`FakeConnector::execute_action`] behaves
#[derive(Debug, Clone)]
pub enum ExecuteBehavior {
    Succeed,
    /// Backend ran the action and reported failure
    Fail(String),
    /// The call itself failed
    Error(ConnectorError),
    /// Never returns
    Hang,
    Panic,
}

/// How [`FakeConnector::get_health`] behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthBehavior {
    Healthy,
    Unhealthy,
    Indeterminate,
    Error,
}

/// Scriptable in-memory connector
#[derive(Debug)]
pub struct FakeConnector {
    provider: String,
    execute: ExecuteBehavior,
    health: HealthBehavior,
    snapshot_fails: bool,
    rollback_fails: bool,
    calls: Mutex<Vec<ConnectorCall>>,
    released: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            execute: ExecuteBehavior::Succeed,
            health: HealthBehavior::Healthy,
            snapshot_fails: false,
            rollback_fails: false,
            calls: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_execute(mut self, behavior: ExecuteBehavior) -> Self {
        self.execute = behavior;
        self
    }

    #[must_use]
    pub fn with_health(mut self, behavior: HealthBehavior) -> Self {
        self.health = behavior;
        self
    }

    #[must_use]
    pub fn with_failing_snapshot(mut self) -> Self {
        self.snapshot_fails = true;
        self
    }

    #[must_use]
    pub fn with_failing_rollback(mut self) -> Self {
        self.rollback_fails = true;
        self
    }

    pub fn calls(&self) -> Vec<ConnectorCall> {
        self.calls.lock().clone()
    }

    /// Method names in call order
    pub fn methods(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(ConnectorCall::method).collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method() == method)
            .count()
    }

    /// Snapshot ids handed to `release_snapshot`, in order
    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn create_snapshot(&self, resource_id: &str) -> Result<Snapshot, ConnectorError> {
        self.calls
            .lock()
            .push(ConnectorCall::Snapshot(resource_id.to_string()));
        if self.snapshot_fails {
            return Err(ConnectorError::Backend("snapshot storage unavailable".into()));
        }
        Ok(Snapshot::new(
            resource_id,
            "fake",
            serde_json::json!({ "replicas": 3 }),
        ))
    }

    async fn execute_action(
        &self,
        action: &RemediationAction,
    ) -> Result<ActionResult, ConnectorError> {
        self.calls
            .lock()
            .push(ConnectorCall::Execute(action.action_type.clone()));
        let started = Utc::now();
        match &self.execute {
            ExecuteBehavior::Succeed => Ok(ActionResult::success(&action.id, "done", started)),
            ExecuteBehavior::Fail(error) => Ok(ActionResult::failed(
                &action.id,
                "action failed",
                error.clone(),
                started,
            )),
            ExecuteBehavior::Error(e) => Err(e.clone()),
            ExecuteBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                Ok(ActionResult::success(&action.id, "late", started))
            }
            ExecuteBehavior::Panic => panic!("connector bug"),
        }
    }

    async fn get_health(
        &self,
        resource_id: &str,
        _timeout: Duration,
    ) -> Result<Option<HealthStatus>, ConnectorError> {
        self.calls
            .lock()
            .push(ConnectorCall::Health(resource_id.to_string()));
        match self.health {
            HealthBehavior::Healthy => Ok(Some(HealthStatus::new(resource_id, true, "running"))),
            HealthBehavior::Unhealthy => {
                Ok(Some(HealthStatus::new(resource_id, false, "crashloop")))
            }
            HealthBehavior::Indeterminate => Ok(None),
            HealthBehavior::Error => Err(ConnectorError::Transport("probe unreachable".into())),
        }
    }

    async fn rollback(&self, snapshot_id: &str) -> Result<ActionResult, ConnectorError> {
        self.calls
            .lock()
            .push(ConnectorCall::Rollback(snapshot_id.to_string()));
        if self.rollback_fails {
            return Err(ConnectorError::Backend("restore rejected".into()));
        }
        Ok(ActionResult::success(snapshot_id, "restored", Utc::now()))
    }

    async fn release_snapshot(&self, snapshot_id: &str) -> Result<(), ConnectorError> {
        self.released.lock().push(snapshot_id.to_string());
        Ok(())
    }
}

/// Escalation notifier that records every record it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    records: Mutex<Vec<ApprovalRecord>>,
}

impl RecordingNotifier {
    pub fn records(&self) -> Vec<ApprovalRecord> {
        self.records.lock().clone()
    }
}

#[async_trait::async_trait]
impl EscalationNotifier for RecordingNotifier {
    async fn notify(&self, record: &ApprovalRecord) -> Result<(), ApprovalError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Production action targeting the fake provider
pub fn production_action(action_type: &str) -> RemediationAction {
    RemediationAction::new(action_type, "checkout-api", Environment::Production)
        .with_parameter(remedy_core::PROVIDER_PARAMETER, "fake")
}

/// Configuration routing every action type to the fake provider
pub fn test_config() -> RemedyConfig {
    let mut config = RemedyConfig::default();
    config.engine.default_provider = "fake".to_string();
    config
}
