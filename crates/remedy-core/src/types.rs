//! Core types for remediation
//!
//! Defines the values that flow through a remediation run:
//! - Proposed actions and their target environment
//! - Risk levels and policy decisions
//! - Connector outputs (snapshots, action results, health probes)
//! - Approval status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use ulid::Ulid;

/// Unique remediation run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Target environment of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Developer sandboxes
    Development,
    /// Pre-production
    Staging,
    /// Production
    Production,
}

impl Environment {
    /// Stable lowercase name, used in counter keys and policy payloads
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Risk levels, ordered from least to most dangerous
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// Routine, reversible, non-production
    Low,
    /// Production but low impact
    #[default]
    Medium,
    /// Production and high impact
    High,
    /// Destructive regardless of environment
    Critical,
}

impl RiskLevel {
    /// Check if this level requires human approval
    #[inline]
    #[must_use]
    pub fn requires_approval(&self) -> bool {
        self.required_approvals() > 0
    }

    /// Number of distinct approvers required before execution
    #[inline]
    #[must_use]
    pub fn required_approvals(&self) -> usize {
        match self {
            RiskLevel::Low | RiskLevel::Medium => 0,
            RiskLevel::High => 1,
            RiskLevel::Critical => 2,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

/// Free-form action parameters
pub type ActionParameters = BTreeMap<String, serde_json::Value>;

/// Parameter carrying a literal shell command
pub const COMMAND_PARAMETER: &str = "command";

/// Parameter overriding the playbook's provider
pub const PROVIDER_PARAMETER: &str = "provider";

/// Proposed corrective action
///
/// Created by the caller before a run starts and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    /// Caller-supplied identifier
    pub id: String,
    /// Action type, e.g. `restart_service`
    pub action_type: String,
    /// Target resource identifier
    pub target_resource: String,
    /// Target environment
    pub environment: Environment,
    /// Caller's initial risk estimate
    #[serde(default)]
    pub risk_estimate: RiskLevel,
    /// Free-form parameters
    #[serde(default)]
    pub parameters: ActionParameters,
    /// Human description
    #[serde(default)]
    pub description: String,
}

impl RemediationAction {
    /// Create new action with a generated id
    #[must_use]
    pub fn new(
        action_type: impl Into<String>,
        target_resource: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action_type: action_type.into(),
            target_resource: target_resource.into(),
            environment,
            risk_estimate: RiskLevel::default(),
            parameters: ActionParameters::new(),
            description: String::new(),
        }
    }

    /// With explicit id
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// With caller risk estimate
    #[inline]
    #[must_use]
    pub fn with_risk_estimate(mut self, risk: RiskLevel) -> Self {
        self.risk_estimate = risk;
        self
    }

    /// With parameter
    #[inline]
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Get a string parameter
    #[inline]
    #[must_use]
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(serde_json::Value::as_str)
    }

    /// Literal command carried by raw-command actions
    #[inline]
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.parameter_str(COMMAND_PARAMETER)
    }

    /// One-line summary for reasoning records
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} on {} ({})",
            self.action_type, self.target_resource, self.environment
        )
    }
}

/// Where a policy decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOrigin {
    /// The external policy decision service answered
    PolicyService,
    /// The policy service could not be reached; defaulted to deny
    FailClosed,
    /// The command safety guard rejected the action before policy evaluation
    CommandGuard,
}

/// Policy decision, produced once per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Whether the action may proceed
    pub allowed: bool,
    /// Ordered reasons
    pub reasons: Vec<String>,
    /// Decision origin
    pub origin: DecisionOrigin,
}

impl PolicyDecision {
    /// Decision returned by the policy service
    #[inline]
    #[must_use]
    pub fn from_service(allowed: bool, reasons: Vec<String>) -> Self {
        Self {
            allowed,
            reasons,
            origin: DecisionOrigin::PolicyService,
        }
    }

    /// Fail-closed denial
    #[inline]
    #[must_use]
    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reasons: vec![reason.into()],
            origin: DecisionOrigin::FailClosed,
        }
    }

    /// Denial by the command safety guard
    #[inline]
    #[must_use]
    pub fn forbidden_command(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reasons: vec![reason.into()],
            origin: DecisionOrigin::CommandGuard,
        }
    }
}

/// Outcome status of a connector call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failed,
}

/// Outcome of an execution or rollback attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Action identifier
    pub action_id: String,
    /// Status
    pub status: ActionStatus,
    /// Human message
    pub message: String,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Completion time
    pub completed_at: DateTime<Utc>,
    /// Error detail for failures
    pub error: Option<String>,
}

impl ActionResult {
    /// Successful result
    #[must_use]
    pub fn success(
        action_id: impl Into<String>,
        message: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionStatus::Success,
            message: message.into(),
            started_at,
            completed_at: Utc::now(),
            error: None,
        }
    }

    /// Failed result
    #[must_use]
    pub fn failed(
        action_id: impl Into<String>,
        message: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionStatus::Failed,
            message: message.into(),
            started_at,
            completed_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

/// Captured pre-execution state of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot identifier
    pub id: String,
    /// Resource the snapshot belongs to
    pub resource_id: String,
    /// Provider-specific kind tag
    pub kind: String,
    /// Opaque provider state
    pub state: serde_json::Value,
    /// Capture time
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create new snapshot with a generated id
    #[must_use]
    pub fn new(
        resource_id: impl Into<String>,
        kind: impl Into<String>,
        state: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource_id.into(),
            kind: kind.into(),
            state,
            created_at: Utc::now(),
        }
    }
}

/// Post-execution probe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Probed resource
    pub resource_id: String,
    /// Whether the resource is healthy
    pub healthy: bool,
    /// Provider status string
    pub status: String,
    /// Probe metrics
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Probe time
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    /// Create new health status
    #[must_use]
    pub fn new(resource_id: impl Into<String>, healthy: bool, status: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            healthy,
            status: status.into(),
            metrics: BTreeMap::new(),
            checked_at: Utc::now(),
        }
    }

    /// With metric
    #[inline]
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Result of post-execution validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationOutcome {
    /// Resource confirmed healthy
    Passed,
    /// Resource confirmed unhealthy
    Failed,
    /// Health could not be determined
    Unknown,
}

/// Approval lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for approvers
    Pending,
    /// Enough distinct approvers
    Approved,
    /// An approver denied
    Denied,
    /// Timed out with some but not enough approvals
    Escalated,
    /// Timed out with no approvals at all
    Timeout,
}

impl ApprovalStatus {
    /// No transition leaves a terminal status
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Escalated => "escalated",
            ApprovalStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
