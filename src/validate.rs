//! Connection validator: static checks on a [`ConnectionConfig`].
//!
//! Runs before any network attempt on both the submission and the
//! diagnostics path. Performs no I/O.

use crate::config::{AuthCredential, ConnectionConfig};
use crate::error::{OrchestratorError, Result};
use reqwest::Url;

/// Check that the URL parses, uses `http`/`https`, names a host, and that
/// the credentials are complete.
///
/// ```
/// use gen_orchestrator::{config::ConnectionConfig, validate::validate};
///
/// assert!(validate(&ConnectionConfig::new("http://127.0.0.1:8188")).is_ok());
/// assert!(validate(&ConnectionConfig::new("not-a-url")).is_err());
/// ```
pub fn validate(config: &ConnectionConfig) -> Result<()> {
    parse_server_url(&config.server_url)?;
    validate_auth(&config.authentication)
}

/// Parse and check the base URL, returning it on success.
pub fn parse_server_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(OrchestratorError::Config("server URL is empty".into()));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| OrchestratorError::Config(format!("server URL '{}' is invalid: {}", trimmed, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(OrchestratorError::Config(format!(
                "server URL must use http or https, got '{}'",
                other
            )))
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(OrchestratorError::Config(format!(
            "server URL '{}' has no host",
            trimmed
        )));
    }

    Ok(url)
}

/// Basic needs a username; bearer needs a token.
pub fn validate_auth(auth: &AuthCredential) -> Result<()> {
    match auth {
        AuthCredential::None => Ok(()),
        AuthCredential::Basic { username, .. } if username.trim().is_empty() => Err(
            OrchestratorError::Config("basic authentication requires a username".into()),
        ),
        AuthCredential::Bearer { token } if token.trim().is_empty() => Err(
            OrchestratorError::Config("bearer authentication requires a token".into()),
        ),
        _ => Ok(()),
    }
}
