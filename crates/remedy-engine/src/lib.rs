//! Remedy Engine - runs a proposed action through the remediation state machine
//!
//! Provides:
//! - [`PlaybookCatalog`]: action type to connector provider mapping
//! - [`Toolkit`]: timeout-bounded connector calls that never fail a run
//! - [`RemediationGraph`] and [`Node`]: the routing table and its driver loop
//! - [`RemediationRunner`]: run boundary, outcome stamping and run history

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod graph;
mod nodes;
pub mod playbook;
pub mod runner;
pub mod toolkit;

pub use error::EngineError;
pub use graph::{Node, RemediationGraph};
pub use playbook::{Playbook, PlaybookCatalog};
pub use runner::RemediationRunner;
pub use toolkit::Toolkit;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
