//! Playbook catalog
//!
//! Maps an action type to the connector provider that carries it out and the
//! health probe timeout used to validate it.

use remedy_core::{EngineConfig, PlaybookConfig, PlaybookRef, RemediationAction, PROVIDER_PARAMETER};
use std::collections::HashMap;
use std::time::Duration;

/// Catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playbook {
    pub action_type: String,
    pub provider: String,
    pub health_timeout: Duration,
    pub description: String,
}

/// Action type to playbook lookup
#[derive(Debug, Clone)]
pub struct PlaybookCatalog {
    entries: HashMap<String, Playbook>,
    default_provider: String,
    default_health_timeout: Duration,
}

impl PlaybookCatalog {
    /// Create empty catalog with fallbacks
    #[must_use]
    pub fn new(default_provider: impl Into<String>, default_health_timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_provider: default_provider.into(),
            default_health_timeout,
        }
    }

    /// Catalog from the engine section and `[[playbooks]]` entries
    #[must_use]
    pub fn from_config(engine: &EngineConfig, playbooks: &[PlaybookConfig]) -> Self {
        let mut catalog = Self::new(engine.default_provider.clone(), engine.health_timeout());
        for entry in playbooks {
            catalog.insert(Playbook {
                action_type: entry.action_type.clone(),
                provider: entry.provider.clone(),
                health_timeout: entry
                    .health_timeout_secs
                    .map_or(catalog.default_health_timeout, Duration::from_secs),
                description: entry.description.clone(),
            });
        }
        catalog
    }

    pub fn insert(&mut self, playbook: Playbook) {
        self.entries.insert(playbook.action_type.clone(), playbook);
    }

    #[inline]
    #[must_use]
    pub fn with_playbook(mut self, playbook: Playbook) -> Self {
        self.insert(playbook);
        self
    }

    #[inline]
    #[must_use]
    pub fn get(&self, action_type: &str) -> Option<&Playbook> {
        self.entries.get(action_type)
    }

    /// Resolve the playbook for an action
    ///
    /// A `provider` parameter on the action wins over the catalog; unknown
    /// action types use the default provider.
    #[must_use]
    pub fn resolve(&self, action: &RemediationAction) -> PlaybookRef {
        let entry = self.get(&action.action_type);
        let provider = action
            .parameter_str(PROVIDER_PARAMETER)
            .map(str::to_string)
            .or_else(|| entry.map(|p| p.provider.clone()))
            .unwrap_or_else(|| self.default_provider.clone());
        let health_timeout = entry.map_or(self.default_health_timeout, |p| p.health_timeout);

        PlaybookRef {
            action_type: action.action_type.clone(),
            provider,
            health_timeout_ms: u64::try_from(health_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
