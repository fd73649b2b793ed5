//! Policy and rate store errors

use std::time::Duration;

/// Failure talking to the policy decision service
///
/// Never surfaces past [`crate::PolicyEngine::evaluate`]: every variant
/// becomes a fail-closed denial.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// Connection could not be established or was reset
    #[error("transport error: {0}")]
    Transport(String),

    /// No answer within the configured timeout
    #[error("policy service timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Service answered with a non-2xx status
    #[error("policy service returned HTTP {0}")]
    Status(u16),

    /// 2xx answer whose body is not a decision
    #[error("invalid policy response: {0}")]
    InvalidResponse(String),

    /// Client could not be constructed
    #[error("policy client configuration error: {0}")]
    Config(String),
}

impl PolicyError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status(code) => *code >= 500,
            Self::InvalidResponse(_) | Self::Config(_) => false,
        }
    }
}

/// Counter store backend failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateStoreError {
    /// Backend unavailable or rejected the operation
    #[error("counter store error: {0}")]
    Backend(String),
}
