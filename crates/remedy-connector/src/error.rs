//! Connector errors
//!
//! Every connector method returns a typed result; the engine toolkit turns
//! any `Err` into a FAILED action result, so none of these ever crash a run.

use crate::guard::{GuardRule, GuardViolation};
use std::time::Duration;

/// Connector error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    /// No connector registered for the provider name
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// Command rejected by the safety guard
    #[error("forbidden_command: {rule} in '{command}'")]
    ForbiddenCommand { rule: GuardRule, command: String },

    /// Resource identifier malformed for this provider
    #[error("invalid resource id '{resource}': {reason}")]
    InvalidResource { resource: String, reason: String },

    /// Provider does not implement the action type
    #[error("{provider} does not support action type '{action_type}'")]
    UnsupportedAction {
        provider: String,
        action_type: String,
    },

    /// Action is missing a required parameter
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// Rollback target unknown
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Backend unreachable
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend did not answer in time
    #[error("connector call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Backend answered with an error
    #[error("backend error: {0}")]
    Backend(String),
}

impl ConnectorError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Create invalid resource error
    #[inline]
    pub fn invalid_resource(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResource {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}

impl From<GuardViolation> for ConnectorError {
    fn from(v: GuardViolation) -> Self {
        Self::ForbiddenCommand {
            rule: v.rule,
            command: v.command,
        }
    }
}
