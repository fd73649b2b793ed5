//! Remedy Policy - decides whether a proposed action may run
//!
//! Provides:
//! - [`classify_risk`], the risk decision table
//! - [`RateTracker`] over a pluggable [`CounterStore`]
//! - [`PolicyClient`] and its HTTP implementation
//! - [`PolicyEngine`], which fails closed whenever the decision service is unavailable

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod rate;
pub mod risk;

pub use client::{parse_decision, HttpPolicyClient, PolicyClient, PolicyInput, PolicyVerdict};
pub use engine::{PolicyEngine, FAIL_CLOSED_REASON};
pub use error::{PolicyError, RateStoreError};
pub use rate::{CounterStore, InMemoryCounterStore, RateTracker};
pub use risk::{classify_risk, is_destructive, is_high_impact, DESTRUCTIVE_ACTIONS, HIGH_IMPACT_ACTIONS};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
