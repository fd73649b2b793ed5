//! Connector toolkit
//!
//! The only path from a node to a connector. Every call is bounded by a
//! timeout and every failure, including an unknown provider, comes back as a
//! FAILED [`ActionResult`] instead of an error.

use chrono::Utc;
use remedy_connector::{ConnectorError, ConnectorRouter};
use remedy_core::{ActionResult, HealthStatus, RemediationAction, Snapshot};
use std::future::Future;
use std::time::Duration;

/// Connector calls used by the state machine
#[derive(Debug, Clone)]
pub struct Toolkit {
    router: ConnectorRouter,
    timeout: Duration,
}

impl Toolkit {
    #[must_use]
    pub fn new(router: ConnectorRouter, timeout: Duration) -> Self {
        Self { router, timeout }
    }

    #[inline]
    #[must_use]
    pub fn router(&self) -> &ConnectorRouter {
        &self.router
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ConnectorError>>,
    ) -> Result<T, ConnectorError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ConnectorError::Timeout(self.timeout))?
    }

    /// Capture a snapshot; the error side is a FAILED result for the audit trail
    pub async fn create_snapshot(
        &self,
        provider: &str,
        resource_id: &str,
    ) -> Result<Snapshot, ActionResult> {
        let started = Utc::now();
        let result = match self.router.get(provider) {
            Ok(connector) => self.bounded(connector.create_snapshot(resource_id)).await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            tracing::warn!(%provider, %resource_id, error = %e, "snapshot failed");
            ActionResult::failed(resource_id, "snapshot failed", e.to_string(), started)
        })
    }

    pub async fn execute_action(&self, provider: &str, action: &RemediationAction) -> ActionResult {
        let started = Utc::now();
        let result = match self.router.get(provider) {
            Ok(connector) => self.bounded(connector.execute_action(action)).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(%provider, action_id = %action.id, error = %e, "execution failed");
            ActionResult::failed(&action.id, "execution failed", e.to_string(), started)
        })
    }

    /// Probe health; `Err` carries the failure message and means indeterminate
    pub async fn get_health(
        &self,
        provider: &str,
        resource_id: &str,
        timeout: Duration,
    ) -> Result<Option<HealthStatus>, String> {
        let connector = self.router.get(provider).map_err(|e| e.to_string())?;
        // the probe's own timeout plus slack for the transport
        tokio::time::timeout(timeout + self.timeout, connector.get_health(resource_id, timeout))
            .await
            .map_err(|_| ConnectorError::Timeout(timeout).to_string())?
            .map_err(|e| e.to_string())
    }

    pub async fn rollback(&self, provider: &str, snapshot_id: &str) -> ActionResult {
        let started = Utc::now();
        let result = match self.router.get(provider) {
            Ok(connector) => self.bounded(connector.rollback(snapshot_id)).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(%provider, %snapshot_id, error = %e, "rollback failed");
            ActionResult::failed(snapshot_id, "rollback failed", e.to_string(), started)
        })
    }

    /// Tell the connector a snapshot is no longer needed; failures are only logged
    pub async fn release_snapshot(&self, provider: &str, snapshot_id: &str) {
        let result = match self.router.get(provider) {
            Ok(connector) => self.bounded(connector.release_snapshot(snapshot_id)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(%provider, %snapshot_id, error = %e, "snapshot release failed");
        }
    }
}
