//! Connection prober: one bounded health check against the backend.
//!
//! Classification is exhaustive and ordered:
//!
//! 1. deadline abort → [`OrchestratorError::Timeout`]
//! 2. transport failure → [`OrchestratorError::Unreachable`]
//! 3. 401/403 → [`OrchestratorError::Auth`]
//! 4. 404 → [`OrchestratorError::VersionMismatch`]
//! 5. other non-2xx → [`OrchestratorError::Server`]
//! 6. 2xx with an unexpected body → [`OrchestratorError::MalformedResponse`]
//! 7. 2xx that parses → [`ServerInfo`]
//!
//! There are no retries here; retry policy belongs to the caller.

use crate::config::ConnectionConfig;
use crate::error::{OrchestratorError, Result};
use crate::transport::{HttpResponse, Transport};
use crate::validate::validate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Backend metadata returned by a successful probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub system: SystemInfo,
    pub devices: Vec<DeviceInfo>,
}

/// Host-level facts, all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default, alias = "comfyui_version")]
    pub version: Option<String>,
    #[serde(default)]
    pub ram_total: Option<u64>,
    #[serde(default)]
    pub ram_free: Option<u64>,
}

/// One compute device (usually a GPU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub vram_total: u64,
    #[serde(default)]
    pub vram_free: u64,
}

impl ServerInfo {
    /// Name of the first reported device.
    pub fn primary_device(&self) -> Option<&str> {
        self.devices.first().map(|d| d.name.as_str())
    }

    /// Sum of VRAM across devices, in bytes.
    pub fn total_vram(&self) -> u64 {
        self.devices.iter().map(|d| d.vram_total).sum()
    }

    /// Sum of free VRAM across devices, in bytes.
    pub fn free_vram(&self) -> u64 {
        self.devices.iter().map(|d| d.vram_free).sum()
    }
}

/// Probe the health endpoint once, bounded by `deadline`.
///
/// The config is validated first, so a malformed URL never reaches the
/// network.
pub async fn probe(
    transport: &dyn Transport,
    config: &ConnectionConfig,
    deadline: Duration,
) -> Result<ServerInfo> {
    validate(config)?;
    let endpoint = config.endpoints.health.as_str();
    let resp = request_endpoint(transport, config, endpoint, deadline).await?;

    let info: ServerInfo = resp.json().map_err(|e| {
        warn!(endpoint, error = %e, "health response did not match schema");
        OrchestratorError::MalformedResponse(format!(
            "{} returned an unexpected body: {} ({})",
            endpoint,
            e,
            resp.body_preview()
        ))
    })?;

    debug!(
        endpoint,
        device = info.primary_device().unwrap_or("<none>"),
        vram_total = info.total_vram(),
        "probe succeeded"
    );
    Ok(info)
}

/// GET `path` and apply steps 1–5 of the classification. Returns the
/// successful response for the caller to parse.
pub(crate) async fn request_endpoint(
    transport: &dyn Transport,
    config: &ConnectionConfig,
    path: &str,
    deadline: Duration,
) -> Result<HttpResponse> {
    let url = config.url_for(path);
    let resp = transport
        .get(&url, &config.authentication, deadline)
        .await
        .map_err(|e| {
            debug!(url = %url, error = %e, "transport failure");
            e.into_orchestrator(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX))
        })?;
    classify_status(resp, path)
}

/// Steps 3–5: map a non-2xx status onto the taxonomy.
pub(crate) fn classify_status(resp: HttpResponse, endpoint: &str) -> Result<HttpResponse> {
    if resp.is_success() {
        return Ok(resp);
    }
    if resp.is_auth_failure() {
        return Err(OrchestratorError::Auth {
            status: resp.status,
        });
    }
    if resp.status == 404 {
        return Err(OrchestratorError::VersionMismatch {
            endpoint: endpoint.to_string(),
        });
    }
    Err(OrchestratorError::Server {
        status: resp.status,
        body: resp.body_preview(),
    })
}
