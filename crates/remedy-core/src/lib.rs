//! Remedy Core - shared data model for policy-gated remediation
//!
//! Holds the values every other remedy crate exchanges:
//! - Proposed actions, risk levels and policy decisions
//! - Connector outputs (snapshots, action results, health probes)
//! - The per-run [`RemediationState`] and its partial [`StateUpdate`]s
//! - TOML configuration ([`RemedyConfig`])

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod state;
pub mod types;

pub use config::{
    ApprovalConfig, EngineConfig, IndeterminateHealthPolicy, PlaybookConfig, PolicyConfig,
    RateConfig, RemedyConfig, SshConfig,
};
pub use error::ConfigError;
pub use state::{
    PlaybookRef, ReasoningStep, RemediationState, RunOutcome, StateUpdate, FAILED_STEP,
};
pub use types::{
    ActionParameters, ActionResult, ActionStatus, ApprovalStatus, DecisionOrigin, Environment,
    HealthStatus, PolicyDecision, RemediationAction, RiskLevel, RunId, Snapshot,
    ValidationOutcome, COMMAND_PARAMETER, PROVIDER_PARAMETER,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
