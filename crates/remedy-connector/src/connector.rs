//! Connector capability set
//!
//! One implementation per infrastructure provider. The state machine only
//! depends on these four primitives.

use crate::error::ConnectorError;
use remedy_core::{ActionResult, HealthStatus, RemediationAction, Snapshot};
use std::time::Duration;

/// Infrastructure connector
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Provider name this connector is registered under
    fn provider(&self) -> &str;

    /// Capture pre-execution state of a resource
    async fn create_snapshot(&self, resource_id: &str) -> Result<Snapshot, ConnectorError>;

    /// Execute an action
    ///
    /// A backend that ran the action and reported failure returns
    /// `Ok` with a failed [`ActionResult`]; `Err` means the call itself failed.
    async fn execute_action(&self, action: &RemediationAction)
        -> Result<ActionResult, ConnectorError>;

    /// Probe resource health; `Ok(None)` means the state could not be determined
    async fn get_health(
        &self,
        resource_id: &str,
        timeout: Duration,
    ) -> Result<Option<HealthStatus>, ConnectorError>;

    /// Restore the state captured by a snapshot
    async fn rollback(&self, snapshot_id: &str) -> Result<ActionResult, ConnectorError>;

    /// Drop a snapshot once the run that took it is terminal
    ///
    /// Connectors that keep snapshot state in memory release it here. Unknown
    /// ids are not an error.
    async fn release_snapshot(&self, _snapshot_id: &str) -> Result<(), ConnectorError> {
        Ok(())
    }
}
