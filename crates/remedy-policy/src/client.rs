//! Policy decision service client
//!
//! Wire format: `POST {"input": {"action", "agent_id", "context"}}`, answered
//! with `{"result": {"allow": bool, "reasons": [..]}}` or `{"result": bool}`.

use crate::error::PolicyError;
use remedy_core::{PolicyConfig, RemediationAction};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Decision request input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyInput {
    pub action: RemediationAction,
    pub agent_id: String,
    pub context: Map<String, Value>,
}

/// Decision returned by the service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub allow: bool,
    pub reasons: Vec<String>,
}

impl PolicyVerdict {
    #[inline]
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allow: true,
            reasons: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reasons: vec![reason.into()],
        }
    }
}

/// External policy decision service
#[async_trait::async_trait]
pub trait PolicyClient: Send + Sync {
    /// Ask whether the action may proceed
    async fn decide(&self, input: &PolicyInput) -> Result<PolicyVerdict, PolicyError>;
}

#[derive(Serialize)]
struct DecisionRequest<'a> {
    input: &'a PolicyInput,
}

#[derive(Deserialize)]
struct DecisionEnvelope {
    result: DecisionBody,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DecisionBody {
    Flag(bool),
    Detailed {
        allow: bool,
        #[serde(default)]
        reasons: Vec<String>,
    },
}

/// Parse a decision response body
///
/// # Errors
/// Returns [`PolicyError::InvalidResponse`] when the body is not a decision.
pub fn parse_decision(body: &[u8]) -> Result<PolicyVerdict, PolicyError> {
    let envelope: DecisionEnvelope = serde_json::from_slice(body).map_err(|e| {
        PolicyError::InvalidResponse(format!(
            "{e}: {}",
            String::from_utf8_lossy(body).chars().take(200).collect::<String>()
        ))
    })?;
    Ok(match envelope.result {
        DecisionBody::Flag(allow) => PolicyVerdict {
            allow,
            reasons: Vec::new(),
        },
        DecisionBody::Detailed { allow, reasons } => PolicyVerdict { allow, reasons },
    })
}

/// [`PolicyClient`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpPolicyClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpPolicyClient {
    /// Create client for a decision endpoint
    ///
    /// # Errors
    /// Returns [`PolicyError::Config`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PolicyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PolicyError::Config(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    /// Create client from configuration
    ///
    /// # Errors
    /// See [`HttpPolicyClient::new`].
    pub fn from_config(config: &PolicyConfig) -> Result<Self, PolicyError> {
        Self::new(config.endpoint.clone(), config.timeout())
    }

    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_transport_error(&self, err: &reqwest::Error) -> PolicyError {
        if err.is_timeout() {
            PolicyError::Timeout(self.timeout)
        } else {
            PolicyError::Transport(format!("{}: {err}", self.endpoint))
        }
    }
}

#[async_trait::async_trait]
impl PolicyClient for HttpPolicyClient {
    async fn decide(&self, input: &PolicyInput) -> Result<PolicyVerdict, PolicyError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&DecisionRequest { input })
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PolicyError::Status(status.as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(&e))?;
        parse_decision(&body)
    }
}
