//! Remedy Approval - human sign-off for risky remediation actions
//!
//! Provides:
//! - [`ApprovalCoordinator`]: four-eyes approval with timeout escalation
//! - [`ApprovalRequest`] / [`ApprovalRecord`] and the approve/deny [`ApprovalOutcome`]
//! - [`EscalationNotifier`] with log and webhook implementations

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod coordinator;
pub mod error;
pub mod notifier;
pub mod request;

pub use coordinator::ApprovalCoordinator;
pub use error::ApprovalError;
pub use notifier::{EscalationNotifier, LogNotifier, WebhookNotifier};
pub use request::{
    required_approvals, requires_approval, ApprovalOutcome, ApprovalRecord, ApprovalRequest,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
