//! Connector router
//!
//! Resolves a provider name to a connector instance.

use crate::connector::Connector;
use crate::error::ConnectorError;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of connectors keyed by provider name
#[derive(Default, Clone)]
pub struct ConnectorRouter {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRouter {
    /// Create new empty router
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Register a connector under its provider name, replacing any previous one
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        let provider = connector.provider().to_string();
        tracing::debug!(%provider, "registered connector");
        self.connectors.insert(provider, connector);
    }

    /// With connector
    #[inline]
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.register(connector);
        self
    }

    /// Resolve a provider
    ///
    /// # Errors
    /// - `ConnectorError::ProviderNotFound` for unknown names
    pub fn get(&self, provider: &str) -> Result<Arc<dyn Connector>, ConnectorError> {
        self.connectors
            .get(provider)
            .cloned()
            .ok_or_else(|| ConnectorError::ProviderNotFound(provider.to_string()))
    }

    /// Check if provider is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, provider: &str) -> bool {
        self.connectors.contains_key(provider)
    }

    /// Registered provider names, sorted
    #[must_use]
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl std::fmt::Debug for ConnectorRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRouter")
            .field("providers", &self.providers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::{ActionResult, HealthStatus, RemediationAction, Snapshot};
    use std::time::Duration;

    struct NamedConnector(&'static str);

    #[async_trait::async_trait]
    impl Connector for NamedConnector {
        fn provider(&self) -> &str {
            self.0
        }

        async fn create_snapshot(&self, resource_id: &str) -> Result<Snapshot, ConnectorError> {
            Ok(Snapshot::new(resource_id, "test", serde_json::Value::Null))
        }

        async fn execute_action(
            &self,
            action: &RemediationAction,
        ) -> Result<ActionResult, ConnectorError> {
            Ok(ActionResult::success(&action.id, "ok", chrono::Utc::now()))
        }

        async fn get_health(
            &self,
            resource_id: &str,
            _timeout: Duration,
        ) -> Result<Option<HealthStatus>, ConnectorError> {
            Ok(Some(HealthStatus::new(resource_id, true, "ok")))
        }

        async fn rollback(&self, snapshot_id: &str) -> Result<ActionResult, ConnectorError> {
            Ok(ActionResult::success(snapshot_id, "restored", chrono::Utc::now()))
        }
    }

    #[test]
    fn router_resolves_registered_providers() {
        let router = ConnectorRouter::new()
            .with_connector(Arc::new(NamedConnector("ssh")))
            .with_connector(Arc::new(NamedConnector("kubernetes")));

        assert_eq!(router.len(), 2);
        assert_eq!(router.providers(), vec!["kubernetes", "ssh"]);
        assert_eq!(router.get("ssh").unwrap().provider(), "ssh");
    }

    #[test]
    fn unknown_provider_is_an_error_not_a_panic() {
        let router = ConnectorRouter::new();
        let err = router.get("nomad").err().unwrap();
        assert_eq!(err, ConnectorError::ProviderNotFound("nomad".into()));
        assert!(router.is_empty());
    }

    #[test]
    fn register_replaces_existing_provider() {
        let mut router = ConnectorRouter::new();
        router.register(Arc::new(NamedConnector("ssh")));
        router.register(Arc::new(NamedConnector("ssh")));
        assert_eq!(router.len(), 1);
        assert!(router.contains("ssh"));
    }
}
