//! SSH reference connector
//!
//! Manages systemd units on remote hosts over a [`RemoteShell`].
//! Resource ids have the form `host/unit` (`host` alone for `run_command`).
//! Every literal command passes the safety guard before dispatch.

use crate::connector::Connector;
use crate::error::ConnectorError;
use crate::guard;
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use remedy_core::{ActionResult, HealthStatus, RemediationAction, Snapshot, SshConfig};
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

/// Provider name of the SSH connector
pub const SSH_PROVIDER: &str = "ssh";

/// Snapshot kind tag
pub const SYSTEMD_SNAPSHOT_KIND: &str = "systemd_unit";

/// OpenSSH exit code for connection-level failures
const SSH_CONNECTION_FAILURE: i32 = 255;

static HOST_NAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.-]{0,252}$").ok());
static UNIT_NAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9@._:-]{0,254}$").ok());

/// Output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Best single-line description of a failure
    #[must_use]
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            match self.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }
        } else {
            stderr.to_string()
        }
    }
}

/// Transport executing commands on a remote host
#[async_trait::async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run one command; the guard has already approved it
    async fn run(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ConnectorError>;
}

/// [`RemoteShell`] backed by the local `ssh` binary
#[derive(Debug, Clone)]
pub struct OpenSshShell {
    config: SshConfig,
}

impl OpenSshShell {
    #[inline]
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to `ssh` for one command
    #[must_use]
    pub fn args(&self, host: &str, command: &str) -> Vec<String> {
        let strict = if self.config.strict_host_key_checking {
            "yes"
        } else {
            "accept-new"
        };
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-o".to_string(),
            format!("StrictHostKeyChecking={strict}"),
            "-p".to_string(),
            self.config.port.to_string(),
        ];
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args.push(format!("{}@{host}", self.config.user));
        args.push(command.to_string());
        args
    }
}

#[async_trait::async_trait]
impl RemoteShell for OpenSshShell {
    async fn run(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ConnectorError> {
        let mut child = tokio::process::Command::new("ssh");
        child
            .args(self.args(host, command))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, child.output())
            .await
            .map_err(|_| ConnectorError::Timeout(timeout))?
            .map_err(|e| ConnectorError::Transport(format!("failed to spawn ssh: {e}")))?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if result.exit_code == Some(SSH_CONNECTION_FAILURE) {
            return Err(ConnectorError::Transport(format!(
                "ssh to {host} failed: {}",
                result.failure_detail()
            )));
        }
        Ok(result)
    }
}

/// Parsed `host/unit` resource id
#[derive(Debug, Clone, PartialEq, Eq)]
struct SshTarget {
    host: String,
    unit: Option<String>,
}

impl SshTarget {
    fn parse(resource_id: &str) -> Result<Self, ConnectorError> {
        let (host, unit) = match resource_id.split_once('/') {
            Some((host, unit)) => (host, Some(unit)),
            None => (resource_id, None),
        };
        if !matches_pattern(&HOST_NAME, host) {
            return Err(ConnectorError::invalid_resource(resource_id, "invalid host name"));
        }
        if let Some(unit) = unit {
            if !matches_pattern(&UNIT_NAME, unit) {
                return Err(ConnectorError::invalid_resource(resource_id, "invalid unit name"));
            }
        }
        Ok(Self {
            host: host.to_string(),
            unit: unit.map(str::to_string),
        })
    }

    fn unit(&self, resource_id: &str) -> Result<&str, ConnectorError> {
        self.unit
            .as_deref()
            .ok_or_else(|| ConnectorError::invalid_resource(resource_id, "expected host/unit"))
    }
}

fn matches_pattern(pattern: &Lazy<Option<Regex>>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(value))
}

/// Parse `systemctl show` output into a property map
fn parse_properties(stdout: &str) -> Map<String, Value> {
    stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), Value::String(v.trim().to_string())))
        .collect()
}

/// Connector for SSH-managed hosts
pub struct SshConnector {
    shell: Arc<dyn RemoteShell>,
    command_timeout: Duration,
    snapshots: DashMap<String, Snapshot>,
}

impl SshConnector {
    /// Create connector over a shell transport
    #[must_use]
    pub fn new(shell: Arc<dyn RemoteShell>, command_timeout: Duration) -> Self {
        Self {
            shell,
            command_timeout,
            snapshots: DashMap::new(),
        }
    }

    /// Create connector using the local OpenSSH client
    #[must_use]
    pub fn from_config(config: &SshConfig) -> Self {
        Self::new(
            Arc::new(OpenSshShell::new(config.clone())),
            config.command_timeout(),
        )
    }

    /// Snapshots held for later rollback
    #[inline]
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Guard-check then run a command
    async fn dispatch(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ConnectorError> {
        if let Err(violation) = guard::check_command(command) {
            tracing::warn!(%host, rule = %violation.rule, "command rejected by safety guard");
            metrics::counter!("remedy_guard_rejections_total", "rule" => violation.rule.as_str())
                .increment(1);
            return Err(violation.into());
        }
        tracing::debug!(%host, %command, "dispatching remote command");
        self.shell.run(host, command, timeout).await
    }

    fn command_for(
        action: &RemediationAction,
        target: &SshTarget,
    ) -> Result<String, ConnectorError> {
        let resource = action.target_resource.as_str();
        let verb = match action.action_type.as_str() {
            "run_command" => {
                return action
                    .command()
                    .map(str::to_string)
                    .ok_or_else(|| ConnectorError::MissingParameter("command".into()));
            }
            "restart_service" => "restart",
            "start_service" => "start",
            "stop_service" => "stop",
            "reload_service" => "reload",
            other => {
                return Err(ConnectorError::UnsupportedAction {
                    provider: SSH_PROVIDER.to_string(),
                    action_type: other.to_string(),
                })
            }
        };
        Ok(format!("systemctl {verb} {}", target.unit(resource)?))
    }
}

impl std::fmt::Debug for SshConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnector")
            .field("command_timeout", &self.command_timeout)
            .field("snapshots", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Connector for SshConnector {
    fn provider(&self) -> &str {
        SSH_PROVIDER
    }

    async fn create_snapshot(&self, resource_id: &str) -> Result<Snapshot, ConnectorError> {
        let target = SshTarget::parse(resource_id)?;
        let unit = target.unit(resource_id)?;
        let command = format!(
            "systemctl show {unit} --property=ActiveState,SubState,UnitFileState,MainPID --no-pager"
        );
        let output = self
            .dispatch(&target.host, &command, self.command_timeout)
            .await?;
        if !output.success() {
            return Err(ConnectorError::Backend(output.failure_detail()));
        }

        let snapshot = Snapshot::new(
            resource_id,
            SYSTEMD_SNAPSHOT_KIND,
            json!({
                "host": target.host,
                "unit": unit,
                "properties": parse_properties(&output.stdout),
            }),
        );
        self.snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn execute_action(
        &self,
        action: &RemediationAction,
    ) -> Result<ActionResult, ConnectorError> {
        let started_at = Utc::now();
        let target = SshTarget::parse(&action.target_resource)?;
        let command = Self::command_for(action, &target)?;
        let output = self
            .dispatch(&target.host, &command, self.command_timeout)
            .await?;

        if output.success() {
            Ok(ActionResult::success(
                &action.id,
                format!("`{command}` succeeded on {}", target.host),
                started_at,
            ))
        } else {
            Ok(ActionResult::failed(
                &action.id,
                format!("`{command}` failed on {}", target.host),
                output.failure_detail(),
                started_at,
            ))
        }
    }

    async fn get_health(
        &self,
        resource_id: &str,
        timeout: Duration,
    ) -> Result<Option<HealthStatus>, ConnectorError> {
        let target = SshTarget::parse(resource_id)?;
        let unit = target.unit(resource_id)?;
        let output = self
            .dispatch(&target.host, &format!("systemctl is-active {unit}"), timeout)
            .await?;

        let state = output.stdout.trim().to_string();
        let healthy = match state.as_str() {
            "active" => true,
            "inactive" | "failed" | "deactivating" => false,
            // activating, reloading, unknown: not settled yet
            _ => return Ok(None),
        };
        let mut status = HealthStatus::new(resource_id, healthy, state);
        if let Some(code) = output.exit_code {
            status = status.with_metric("exit_code", f64::from(code));
        }
        Ok(Some(status))
    }

    async fn rollback(&self, snapshot_id: &str) -> Result<ActionResult, ConnectorError> {
        let started_at = Utc::now();
        let snapshot = self
            .snapshots
            .get(snapshot_id)
            .map(|s| s.clone())
            .ok_or_else(|| ConnectorError::SnapshotNotFound(snapshot_id.to_string()))?;

        let target = SshTarget::parse(&snapshot.resource_id)?;
        let unit = target.unit(&snapshot.resource_id)?;
        let previous = snapshot.state["properties"]["ActiveState"]
            .as_str()
            .unwrap_or("unknown");
        let verb = match previous {
            "active" | "activating" | "reloading" => "restart",
            _ => "stop",
        };
        let command = format!("systemctl {verb} {unit}");
        let output = self
            .dispatch(&target.host, &command, self.command_timeout)
            .await?;

        if output.success() {
            self.snapshots.remove(snapshot_id);
            Ok(ActionResult::success(
                snapshot_id,
                format!("restored {unit} on {} to {previous}", target.host),
                started_at,
            ))
        } else {
            Ok(ActionResult::failed(
                snapshot_id,
                format!("could not restore {unit} on {}", target.host),
                output.failure_detail(),
                started_at,
            ))
        }
    }

    async fn release_snapshot(&self, snapshot_id: &str) -> Result<(), ConnectorError> {
        if self.snapshots.remove(snapshot_id).is_some() {
            tracing::debug!(%snapshot_id, "released snapshot");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use remedy_core::{Environment, COMMAND_PARAMETER};

    /// Shell answering by command prefix, recording every call
    #[derive(Default)]
    struct ScriptedShell {
        replies: Vec<(&'static str, CommandOutput)>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedShell {
        fn reply(mut self, prefix: &'static str, exit: i32, stdout: &str) -> Self {
            self.replies.push((
                prefix,
                CommandOutput {
                    exit_code: Some(exit),
                    stdout: stdout.to_string(),
                    stderr: if exit == 0 { String::new() } else { "unit failed".into() },
                },
            ));
            self
        }

        fn commands(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(_, c)| c.clone()).collect()
        }
    }

    #[async_trait::async_trait]
    impl RemoteShell for ScriptedShell {
        async fn run(
            &self,
            host: &str,
            command: &str,
            _timeout: Duration,
        ) -> Result<CommandOutput, ConnectorError> {
            self.calls.lock().push((host.to_string(), command.to_string()));
            self.replies
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix))
                .map(|(_, out)| out.clone())
                .ok_or_else(|| ConnectorError::Transport("no route to host".into()))
        }
    }

    fn connector(shell: ScriptedShell) -> (Arc<ScriptedShell>, SshConnector) {
        let shell = Arc::new(shell);
        let conn = SshConnector::new(shell.clone(), Duration::from_secs(5));
        (shell, conn)
    }

    const SHOW_ACTIVE: &str = "ActiveState=active\nSubState=running\nMainPID=4242\n";

    #[tokio::test]
    async fn snapshot_captures_unit_properties() {
        let (shell, conn) = connector(ScriptedShell::default().reply("systemctl show", 0, SHOW_ACTIVE));

        let snapshot = conn.create_snapshot("web-01/nginx.service").await.unwrap();

        assert_eq!(snapshot.kind, SYSTEMD_SNAPSHOT_KIND);
        assert_eq!(snapshot.state["properties"]["ActiveState"], "active");
        assert_eq!(snapshot.state["host"], "web-01");
        assert_eq!(conn.snapshot_count(), 1);
        assert_eq!(shell.calls.lock()[0].0, "web-01");
    }

    #[tokio::test]
    async fn restart_service_maps_to_systemctl() {
        let (shell, conn) = connector(ScriptedShell::default().reply("systemctl restart", 0, ""));
        let action = RemediationAction::new("restart_service", "web-01/nginx", Environment::Staging);

        let result = conn.execute_action(&action).await.unwrap();

        assert!(result.is_success());
        assert_eq!(shell.commands(), vec!["systemctl restart nginx"]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed_result_not_error() {
        let (_, conn) = connector(ScriptedShell::default().reply("systemctl restart", 1, ""));
        let action = RemediationAction::new("restart_service", "web-01/nginx", Environment::Staging);

        let result = conn.execute_action(&action).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("unit failed"));
    }

    #[tokio::test]
    async fn forbidden_command_never_reaches_shell() {
        let (shell, conn) = connector(ScriptedShell::default().reply("", 0, ""));
        let action = RemediationAction::new("run_command", "db-01", Environment::Development)
            .with_parameter(COMMAND_PARAMETER, "psql -c 'DROP TABLE users'");

        let err = conn.execute_action(&action).await.unwrap_err();

        assert!(matches!(err, ConnectorError::ForbiddenCommand { .. }));
        assert!(shell.commands().is_empty());
    }

    #[tokio::test]
    async fn run_command_requires_parameter() {
        let (_, conn) = connector(ScriptedShell::default());
        let action = RemediationAction::new("run_command", "db-01", Environment::Development);

        let err = conn.execute_action(&action).await.unwrap_err();
        assert_eq!(err, ConnectorError::MissingParameter("command".into()));
    }

    #[tokio::test]
    async fn rejects_shell_metacharacters_in_resource() {
        let (shell, conn) = connector(ScriptedShell::default().reply("", 0, ""));

        let err = conn.create_snapshot("web-01/nginx;reboot").await.unwrap_err();

        assert!(matches!(err, ConnectorError::InvalidResource { .. }));
        assert!(shell.commands().is_empty());
    }

    #[tokio::test]
    async fn unsupported_action_type() {
        let (_, conn) = connector(ScriptedShell::default());
        let action = RemediationAction::new("scale_deployment", "web-01/nginx", Environment::Staging);

        let err = conn.execute_action(&action).await.unwrap_err();
        assert!(matches!(err, ConnectorError::UnsupportedAction { .. }));
    }

    #[tokio::test]
    async fn health_states() {
        let (_, conn) = connector(ScriptedShell::default().reply("systemctl is-active", 0, "active\n"));
        let health = conn
            .get_health("web-01/nginx", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert!(health.healthy);
        assert_eq!(health.metrics.get("exit_code"), Some(&0.0));

        let (_, conn) = connector(ScriptedShell::default().reply("systemctl is-active", 3, "failed\n"));
        let health = conn
            .get_health("web-01/nginx", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert!(!health.healthy);

        let (_, conn) =
            connector(ScriptedShell::default().reply("systemctl is-active", 3, "activating\n"));
        let health = conn
            .get_health("web-01/nginx", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(health.is_none());
    }

    #[tokio::test]
    async fn rollback_restores_active_state() {
        let (shell, conn) = connector(
            ScriptedShell::default()
                .reply("systemctl show", 0, SHOW_ACTIVE)
                .reply("systemctl restart", 0, ""),
        );
        let snapshot = conn.create_snapshot("web-01/nginx").await.unwrap();

        let result = conn.rollback(&snapshot.id).await.unwrap();

        assert!(result.is_success());
        assert_eq!(shell.commands().last().unwrap(), "systemctl restart nginx");
        assert_eq!(conn.snapshot_count(), 0);
    }

    #[tokio::test]
    async fn successful_runs_release_their_snapshots() {
        let (_, conn) = connector(
            ScriptedShell::default()
                .reply("systemctl show", 0, SHOW_ACTIVE)
                .reply("systemctl restart", 0, "")
                .reply("systemctl is-active", 0, "active\n"),
        );
        let action = RemediationAction::new("restart_service", "web-01/nginx", Environment::Staging);

        for _ in 0..100 {
            let snapshot = conn.create_snapshot("web-01/nginx").await.unwrap();
            assert!(conn.execute_action(&action).await.unwrap().is_success());
            let health = conn
                .get_health("web-01/nginx", Duration::from_secs(1))
                .await
                .unwrap()
                .unwrap();
            assert!(health.healthy);
            conn.release_snapshot(&snapshot.id).await.unwrap();
        }

        assert_eq!(conn.snapshot_count(), 0);
        conn.release_snapshot("never-taken").await.unwrap();
    }

    #[tokio::test]
    async fn rollback_of_inactive_unit_stops_it() {
        let (shell, conn) = connector(
            ScriptedShell::default()
                .reply("systemctl show", 0, "ActiveState=inactive\n")
                .reply("systemctl stop", 0, ""),
        );
        let snapshot = conn.create_snapshot("web-01/worker").await.unwrap();

        conn.rollback(&snapshot.id).await.unwrap();
        assert_eq!(shell.commands().last().unwrap(), "systemctl stop worker");
    }

    #[tokio::test]
    async fn rollback_unknown_snapshot() {
        let (_, conn) = connector(ScriptedShell::default());
        let err = conn.rollback("missing").await.unwrap_err();
        assert_eq!(err, ConnectorError::SnapshotNotFound("missing".into()));
    }

    #[test]
    fn openssh_args() {
        let shell = OpenSshShell::new(SshConfig {
            identity_file: Some("/etc/remedy/id_ed25519".into()),
            ..SshConfig::default()
        });
        let args = shell.args("web-01", "systemctl is-active nginx");

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"/etc/remedy/id_ed25519".to_string()));
        assert_eq!(args[args.len() - 2], "remedy@web-01");
        assert_eq!(args.last().unwrap(), "systemctl is-active nginx");
    }
}
