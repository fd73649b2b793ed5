//! Risk classification
//!
//! Decision table, first match wins:
//! 1. destructive action type: `CRITICAL` in every environment
//! 2. production and high-impact action type: `HIGH`
//! 3. production: `MEDIUM`
//! 4. otherwise: `LOW`

use remedy_core::{Environment, RiskLevel};

/// Action types whose effects cannot be undone by a restart
pub const DESTRUCTIVE_ACTIONS: &[&str] = &[
    "drain_node",
    "delete_namespace",
    "delete_deployment",
    "delete_volume",
    "terminate_instance",
    "drop_database",
    "failover_database",
];

/// Action types with a wide blast radius in production
pub const HIGH_IMPACT_ACTIONS: &[&str] = &[
    "rollback_deployment",
    "scale_deployment",
    "scale_down",
    "restart_database",
    "update_config",
    "cordon_node",
    "rotate_credentials",
    "run_command",
];

#[inline]
#[must_use]
pub fn is_destructive(action_type: &str) -> bool {
    DESTRUCTIVE_ACTIONS.contains(&action_type)
}

#[inline]
#[must_use]
pub fn is_high_impact(action_type: &str) -> bool {
    HIGH_IMPACT_ACTIONS.contains(&action_type)
}

/// Classify the risk of an action type in an environment
#[must_use]
pub fn classify_risk(action_type: &str, environment: Environment) -> RiskLevel {
    if is_destructive(action_type) {
        RiskLevel::Critical
    } else if environment.is_production() && is_high_impact(action_type) {
        RiskLevel::High
    } else if environment.is_production() {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
