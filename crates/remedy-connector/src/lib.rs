//! Remedy Connector - the boundary between the engine and real infrastructure
//!
//! Provides:
//! - The [`Connector`] capability trait (snapshot, execute, health, rollback)
//! - [`ConnectorRouter`] resolving provider names to connectors
//! - The command safety [`guard`] checked before any literal command runs
//! - [`SshConnector`], a reference connector for systemd units over SSH

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod connector;
pub mod error;
pub mod guard;
pub mod router;
pub mod ssh;

pub use connector::Connector;
pub use error::ConnectorError;
pub use guard::{check_command, is_forbidden, GuardRule, GuardViolation};
pub use router::ConnectorRouter;
pub use ssh::{CommandOutput, OpenSshShell, RemoteShell, SshConnector, SSH_PROVIDER};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
