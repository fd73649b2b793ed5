//! Engine errors
//!
//! Node-local failures become state fields; an [`EngineError`] means the run
//! itself is broken and is caught at the runner boundary.

use remedy_approval::ApprovalError;
use remedy_core::ConfigError;
use remedy_policy::PolicyError;

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A node's routing predicate needs a field the node did not set
    #[error("{node} finished without setting {field}")]
    MissingField {
        node: &'static str,
        field: &'static str,
    },

    /// Driver loop exceeded its step budget
    #[error("run exceeded {0} steps")]
    StepLimit(u32),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

impl EngineError {
    /// Missing field error
    #[inline]
    pub fn missing(node: &'static str, field: &'static str) -> Self {
        Self::MissingField { node, field }
    }

    /// Whether the error is a setup problem rather than a run failure
    #[inline]
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Policy(PolicyError::Config(_)))
    }
}
