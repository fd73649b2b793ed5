//! Remedy configuration
//!
//! Loaded from TOML. Every field has a default so a partial file (or none at
//! all) yields a usable configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemedyConfig {
    /// Policy decision service
    pub policy: PolicyConfig,
    /// Rate tracker window
    pub rate: RateConfig,
    /// Approval coordination
    pub approval: ApprovalConfig,
    /// State machine behavior
    pub engine: EngineConfig,
    /// SSH reference connector
    pub ssh: SshConfig,
    /// Action type to provider mappings
    pub playbooks: Vec<PlaybookConfig>,
}

impl RemedyConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] when the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.policy.endpoint.trim();
        let is_http_url = reqwest::Url::parse(endpoint).is_ok_and(|url| {
            matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
        });
        if !is_http_url {
            return Err(ConfigError::Invalid(format!(
                "policy.endpoint must be an http(s) URL, got '{endpoint}'"
            )));
        }
        let non_zero = [
            ("policy.timeout_ms", self.policy.timeout_ms),
            ("rate.window_secs", self.rate.window_secs),
            ("approval.timeout_secs", self.approval.timeout_secs),
            ("engine.health_timeout_secs", self.engine.health_timeout_secs),
            ("engine.connector_timeout_secs", self.engine.connector_timeout_secs),
            ("ssh.command_timeout_secs", self.ssh.command_timeout_secs),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be non-zero")));
            }
        }
        if self.engine.max_steps == 0 {
            return Err(ConfigError::Invalid("engine.max_steps must be non-zero".into()));
        }
        for playbook in &self.playbooks {
            if playbook.action_type.trim().is_empty() || playbook.provider.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "playbooks entries need action_type and provider".into(),
                ));
            }
            if playbook.health_timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "playbooks.health_timeout_secs for '{}' must be non-zero",
                    playbook.action_type
                )));
            }
        }
        Ok(())
    }
}

/// Policy decision service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Decision endpoint URL
    pub endpoint: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Caller identity sent with each request
    pub agent_id: String,
}

impl PolicyConfig {
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8181/v1/data/remediation/decision".to_string(),
            timeout_ms: 2000,
            agent_id: "remedy".to_string(),
        }
    }
}

/// Rate tracker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Counting window length in seconds
    pub window_secs: u64,
    /// Upper bound on tracked window keys
    pub max_tracked_keys: u64,
}

impl RateConfig {
    #[inline]
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            max_tracked_keys: 10_000,
        }
    }
}

/// Approval coordination configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// How long a run waits for approvers
    pub timeout_secs: u64,
    /// Resolved requests remembered for replay answers
    pub resolved_history: u64,
    /// Optional webhook for escalations
    pub escalation_webhook: Option<String>,
}

impl ApprovalConfig {
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            resolved_history: 1024,
            escalation_webhook: None,
        }
    }
}

/// What to do when post-execution health cannot be determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndeterminateHealthPolicy {
    /// End the run as a success
    #[default]
    Succeed,
    /// Treat as unhealthy and roll back
    Rollback,
}

/// State machine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Provider used when no playbook matches
    pub default_provider: String,
    /// Health probe timeout in seconds
    pub health_timeout_secs: u64,
    /// Upper bound on any single connector call, in seconds
    pub connector_timeout_secs: u64,
    /// Behavior on indeterminate health
    pub on_indeterminate_health: IndeterminateHealthPolicy,
    /// Driver loop guard
    pub max_steps: u32,
}

impl EngineConfig {
    #[inline]
    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    #[inline]
    #[must_use]
    pub fn connector_timeout(&self) -> Duration {
        Duration::from_secs(self.connector_timeout_secs)
    }

    /// With indeterminate-health policy
    #[inline]
    #[must_use]
    pub fn with_indeterminate_health(mut self, policy: IndeterminateHealthPolicy) -> Self {
        self.on_indeterminate_health = policy;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_provider: "ssh".to_string(),
            health_timeout_secs: 30,
            connector_timeout_secs: 120,
            on_indeterminate_health: IndeterminateHealthPolicy::default(),
            max_steps: 32,
        }
    }
}

/// SSH connector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote login user
    pub user: String,
    /// Remote port
    pub port: u16,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Per-command timeout in seconds
    pub command_timeout_secs: u64,
    /// Private key path
    pub identity_file: Option<String>,
    /// Refuse unknown host keys
    pub strict_host_key_checking: bool,
}

impl SshConfig {
    #[inline]
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "remedy".to_string(),
            port: 22,
            connect_timeout_secs: 10,
            command_timeout_secs: 60,
            identity_file: None,
            strict_host_key_checking: true,
        }
    }
}

/// Playbook entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookConfig {
    /// Action type handled
    pub action_type: String,
    /// Connector provider
    pub provider: String,
    /// Health probe timeout override
    #[serde(default)]
    pub health_timeout_secs: Option<u64>,
    /// Operator-facing description
    #[serde(default)]
    pub description: String,
}
