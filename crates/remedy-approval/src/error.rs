//! Approval errors

/// Approval error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    /// No pending or recently resolved request with this id
    #[error("approval request not found: {0}")]
    NotFound(String),

    /// Approver identity is empty
    #[error("approver identity must not be empty")]
    InvalidApprover,

    /// Escalation channel failed
    #[error("escalation notification failed: {0}")]
    Notification(String),
}

impl ApprovalError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Notification(_))
    }
}
