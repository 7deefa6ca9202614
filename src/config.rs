//! Connection configuration and the provider seam that supplies it.
//!
//! [`ConnectionConfig`] is immutable for one orchestration attempt. The
//! orchestrator never reads ambient settings itself; it asks an injected
//! [`ConfigProvider`] once per attempt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How requests authenticate against the backend.
///
/// Deserialises from an object tagged by `type`:
///
/// ```
/// use gen_orchestrator::config::AuthCredential;
///
/// let auth: AuthCredential =
///     serde_json::from_str(r#"{"type": "bearer", "token": "abc"}"#).unwrap();
/// assert!(matches!(auth, AuthCredential::Bearer { .. }));
/// ```
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthCredential {
    #[default]
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl AuthCredential {
    /// Scheme name, for logs and reports.
    pub fn scheme(&self) -> &'static str {
        match self {
            AuthCredential::None => "none",
            AuthCredential::Basic { .. } => "basic",
            AuthCredential::Bearer { .. } => "bearer",
        }
    }
}

impl fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthCredential::None => f.write_str("None"),
            AuthCredential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            AuthCredential::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Per-step deadlines, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutHints {
    /// Submission and poll reads.
    pub request_ms: u64,
    /// Health probe on the submission path.
    pub probe_ms: u64,
    /// Reachability step of diagnostics.
    pub reachability_ms: u64,
    /// Each auxiliary endpoint check in diagnostics.
    pub endpoint_ms: u64,
}

impl Default for TimeoutHints {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            probe_ms: 10_000,
            reachability_ms: 5_000,
            endpoint_ms: 3_000,
        }
    }
}

impl TimeoutHints {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    pub fn reachability(&self) -> Duration {
        Duration::from_millis(self.reachability_ms)
    }

    pub fn endpoint(&self) -> Duration {
        Duration::from_millis(self.endpoint_ms)
    }
}

/// Path table for the backend API. `{id}` in `history` is replaced by the
/// job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub health: String,
    pub submit: String,
    pub history: String,
    pub queue: String,
    pub catalog: String,
    pub view: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            health: "/health".into(),
            submit: "/jobs".into(),
            history: "/jobs/{id}/history".into(),
            queue: "/jobs/queue".into(),
            catalog: "/objects".into(),
            view: "/view".into(),
        }
    }
}

impl Endpoints {
    /// Paths used by ComfyUI-style node-graph servers.
    pub fn comfyui() -> Self {
        Self {
            health: "/system_stats".into(),
            submit: "/prompt".into(),
            history: "/history/{id}".into(),
            queue: "/queue".into(),
            catalog: "/object_info".into(),
            view: "/view".into(),
        }
    }

    /// History path for one job.
    pub fn history_for(&self, job_id: &str) -> String {
        self.history.replace("{id}", job_id)
    }
}

/// Everything needed to talk to one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URL, e.g. `http://127.0.0.1:8188`.
    pub server_url: String,
    #[serde(default)]
    pub authentication: AuthCredential,
    #[serde(default)]
    pub timeouts: TimeoutHints,
    #[serde(default)]
    pub endpoints: Endpoints,
    /// Sent alongside submissions when set; some backends use it to route
    /// websocket updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ConnectionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            authentication: AuthCredential::None,
            timeouts: TimeoutHints::default(),
            endpoints: Endpoints::default(),
            client_id: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthCredential) -> Self {
        self.authentication = auth;
        self
    }

    pub fn with_basic_auth(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.with_auth(AuthCredential::Basic {
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        self.with_auth(AuthCredential::Bearer {
            token: token.into(),
        })
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutHints) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Parse from a JSON document.
    pub fn from_json_str(s: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parse from a YAML document.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(s: &str) -> crate::error::Result<Self> {
        serde_yaml::from_str(s).map_err(|e| crate::OrchestratorError::Config(e.to_string()))
    }

    /// Join `path` onto the base URL without doubling slashes.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server_url.trim().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Supplies the connection configuration for an attempt.
///
/// Settings storage lives with the application; the orchestrator only sees
/// this trait.
pub trait ConfigProvider: Send + Sync {
    fn connection_config(&self) -> anyhow::Result<ConnectionConfig>;
}

impl ConfigProvider for ConnectionConfig {
    fn connection_config(&self) -> anyhow::Result<ConnectionConfig> {
        Ok(self.clone())
    }
}

/// A [`ConfigProvider`] backed by a closure.
///
/// ```
/// use gen_orchestrator::config::{ConnectionConfig, FnConfigProvider, ConfigProvider};
///
/// let provider = FnConfigProvider(|| Ok(ConnectionConfig::new("http://127.0.0.1:8188")));
/// assert!(provider.connection_config().is_ok());
/// ```
pub struct FnConfigProvider<F>(pub F)
where
    F: Fn() -> anyhow::Result<ConnectionConfig> + Send + Sync;

impl<F> ConfigProvider for FnConfigProvider<F>
where
    F: Fn() -> anyhow::Result<ConnectionConfig> + Send + Sync,
{
    fn connection_config(&self) -> anyhow::Result<ConnectionConfig> {
        (self.0)()
    }
}
