//! Connection diagnostics for "test connection" style checks.
//!
//! [`diagnose`] runs validation, a reachability probe, and targeted endpoint
//! probes, then folds the results into a [`DiagnosticsReport`]. Deeper checks
//! are gated on earlier ones: an invalid URL skips the network entirely, and
//! the protected endpoints are only probed once the health check succeeded,
//! which is the only answer that confirms our credentials. Independent checks never short-circuit each
//! other.

use crate::config::ConnectionConfig;
use crate::error::OrchestratorError;
use crate::probe::{request_endpoint, ServerInfo};
use crate::transport::Transport;
use crate::validate::{parse_server_url, validate_auth};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const SUGGEST_START_BACKEND: &str = "check that the backend is running";
pub const SUGGEST_CHECK_CREDENTIALS: &str = "check your username/password or token";

/// Outcome of one [`diagnose`] run. Built fresh every time.
///
/// # Example
///
/// ```
/// use gen_orchestrator::diagnostics::DiagnosticsReport;
///
/// let report = DiagnosticsReport::default();
/// assert!(!report.is_healthy());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    pub url_valid: bool,
    pub server_reachable: bool,
    pub authentication_valid: bool,
    /// Availability per endpoint name (`health`, `submit`, `catalog`).
    /// Endpoints that were not probed are absent.
    pub endpoints: BTreeMap<String, bool>,
    /// Present when the health endpoint answered with a parseable body.
    pub server_info: Option<ServerInfo>,
    /// Human-actionable next steps, one per distinct problem.
    pub suggestions: Vec<String>,
}

impl DiagnosticsReport {
    /// Every check ran and passed.
    pub fn is_healthy(&self) -> bool {
        self.url_valid
            && self.server_reachable
            && self.authentication_valid
            && !self.endpoints.is_empty()
            && self.endpoints.values().all(|ok| *ok)
    }

    fn suggest(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !self.suggestions.contains(&text) {
            self.suggestions.push(text);
        }
    }
}

/// Run every applicable check against the backend.
///
/// Never fails: problems are reported as `false` flags plus suggestions.
/// Each network step is bounded by the config's reachability or endpoint
/// deadline.
pub async fn diagnose(transport: &dyn Transport, config: &ConnectionConfig) -> DiagnosticsReport {
    let mut report = DiagnosticsReport::default();

    if let Err(e) = parse_server_url(&config.server_url) {
        debug!(url = %config.server_url, error = %e, "diagnostics: invalid URL");
        report.suggest(format!("fix the server URL ({})", e));
        return report;
    }
    report.url_valid = true;

    let credentials_complete = match validate_auth(&config.authentication) {
        Ok(()) => true,
        Err(e) => {
            report.suggest(format!("complete the credentials ({})", e));
            false
        }
    };

    check_reachability(transport, config, &mut report).await;
    report.authentication_valid &= credentials_complete;

    if report.server_reachable && report.authentication_valid {
        for (name, path) in [
            ("submit", config.endpoints.submit.as_str()),
            ("catalog", config.endpoints.catalog.as_str()),
        ] {
            check_endpoint(transport, config, name, path, &mut report).await;
        }
    }

    info!(
        url = %config.server_url,
        reachable = report.server_reachable,
        auth_ok = report.authentication_valid,
        suggestions = report.suggestions.len(),
        "diagnostics complete"
    );
    report
}

async fn check_reachability(
    transport: &dyn Transport,
    config: &ConnectionConfig,
    report: &mut DiagnosticsReport,
) {
    let path = config.endpoints.health.as_str();
    let deadline = config.timeouts.reachability();

    match request_endpoint(transport, config, path, deadline).await {
        Ok(resp) => {
            report.server_reachable = true;
            report.authentication_valid = true;
            report.endpoints.insert("health".into(), true);
            match resp.json::<ServerInfo>() {
                Ok(info) => report.server_info = Some(info),
                Err(_) => report.suggest(format!(
                    "{} answered with an unexpected body; check the endpoint paths",
                    path
                )),
            }
        }
        Err(OrchestratorError::Auth { status }) => {
            debug!(path, status, "diagnostics: credentials rejected");
            report.server_reachable = true;
            report.endpoints.insert("health".into(), true);
            report.suggest(SUGGEST_CHECK_CREDENTIALS);
        }
        // Auth stays unconfirmed below, so the endpoint checks are skipped.
        Err(OrchestratorError::VersionMismatch { endpoint }) => {
            report.server_reachable = true;
            report.endpoints.insert("health".into(), false);
            report.suggest(format!(
                "server does not expose {}; check the backend version or endpoint paths",
                endpoint
            ));
        }
        Err(OrchestratorError::Server { status, .. }) => {
            report.server_reachable = true;
            report.endpoints.insert("health".into(), false);
            report.suggest(format!("server answered HTTP {}; check the backend logs", status));
        }
        Err(OrchestratorError::Timeout { elapsed_ms }) => {
            debug!(path, elapsed_ms, "diagnostics: reachability timed out");
            report.suggest(SUGGEST_START_BACKEND);
            report.suggest(format!(
                "no answer within {} ms; check the URL, firewall and network",
                elapsed_ms
            ));
        }
        Err(e) => {
            debug!(path, error = %e, "diagnostics: unreachable");
            report.suggest(SUGGEST_START_BACKEND);
            report.suggest("check the host name and port in the server URL");
        }
    }
}

/// Probe one protected endpoint with GET. A 405 still proves the route
/// exists.
async fn check_endpoint(
    transport: &dyn Transport,
    config: &ConnectionConfig,
    name: &str,
    path: &str,
    report: &mut DiagnosticsReport,
) {
    let result = request_endpoint(transport, config, path, config.timeouts.endpoint()).await;
    let available = match result {
        Ok(_) => true,
        Err(OrchestratorError::Server { status: 405, .. }) => true,
        Err(OrchestratorError::Auth { .. }) => {
            report.authentication_valid = false;
            report.suggest(SUGGEST_CHECK_CREDENTIALS);
            false
        }
        Err(e) => {
            report.suggest(format!("{} endpoint {} is unavailable: {}", name, path, e));
            false
        }
    };
    debug!(endpoint = name, path, available, "diagnostics: endpoint probed");
    report.endpoints.insert(name.to_string(), available);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthCredential;
    use crate::transport::{MockReply, MockTransport};

    const STATS: &str = r#"{"system": {"os": "posix"}, "devices": [{"name": "cuda:0", "type": "cuda"}]}"#;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("http://gpu:8188")
    }

    fn healthy_mock() -> MockTransport {
        MockTransport::new()
            .on_get("/health", MockReply::json(200, STATS))
            .on_get("/jobs", MockReply::json(405, "method not allowed"))
            .on_get("/objects", MockReply::json(200, "{}"))
    }

    #[tokio::test]
    async fn test_healthy_backend() {
        let report = diagnose(&healthy_mock(), &config()).await;
        assert!(report.is_healthy(), "{:?}", report);
        assert_eq!(report.endpoints.len(), 3);
        assert_eq!(
            report.server_info.as_ref().and_then(|i| i.primary_device()),
            Some("cuda:0")
        );
        assert!(report.suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_skips_network() {
        let mock = healthy_mock();
        let report = diagnose(&mock, &ConnectionConfig::new("ftp://gpu")).await;
        assert!(!report.url_valid);
        assert!(!report.server_reachable);
        assert_eq!(mock.request_count(), 0);
        assert_eq!(report.suggestions.len(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_gates_endpoint_probes() {
        let mock = MockTransport::new().on_get("/health", MockReply::json(401, ""));
        let report = diagnose(&mock, &config().with_bearer_token("stale")).await;

        assert!(report.url_valid);
        assert!(report.server_reachable);
        assert!(!report.authentication_valid);
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.contains("username/password or token")));
        assert_eq!(mock.count_for("/jobs"), 0);
        assert_eq!(mock.count_for("/objects"), 0);
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let mock = MockTransport::new().on_get("/health", MockReply::Unreachable);
        let report = diagnose(&mock, &config()).await;
        assert!(!report.server_reachable);
        assert!(report.suggestions.iter().any(|s| s == SUGGEST_START_BACKEND));
        assert!(report.endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_broken_health_skips_endpoint_checks() {
        for status in [500, 404] {
            let mock = MockTransport::new()
                .on_get("/health", MockReply::json(status, "boom"))
                .on_get("/jobs", MockReply::json(200, "{}"))
                .on_get("/objects", MockReply::json(200, "{}"));
            let report = diagnose(&mock, &config()).await;

            assert!(report.server_reachable);
            assert!(!report.authentication_valid);
            assert_eq!(report.endpoints.get("health"), Some(&false));
            assert_eq!(mock.count_for("/jobs"), 0);
            assert_eq!(mock.count_for("/objects"), 0);
            assert!(!report.suggestions.iter().any(|s| s == SUGGEST_CHECK_CREDENTIALS));
        }
    }

    #[tokio::test]
    async fn test_one_missing_endpoint_does_not_hide_the_other() {
        let mock = MockTransport::new()
            .on_get("/health", MockReply::json(200, STATS))
            .on_get("/jobs", MockReply::json(200, "{}"));
        let report = diagnose(&mock, &config()).await;
        assert_eq!(report.endpoints.get("submit"), Some(&true));
        assert_eq!(report.endpoints.get("catalog"), Some(&false));
        assert!(!report.is_healthy());
        assert!(report.suggestions[0].contains("/objects"));
    }

    #[tokio::test]
    async fn test_incomplete_credentials_flagged() {
        let config = config().with_auth(AuthCredential::Bearer {
            token: String::new(),
        });
        let report = diagnose(&healthy_mock(), &config).await;
        assert!(report.server_reachable);
        assert!(!report.authentication_valid);
        assert!(!report.endpoints.contains_key("submit"));
    }

    #[tokio::test]
    async fn test_reports_are_not_cached() {
        let mock = MockTransport::new()
            .on_get("/health", MockReply::Unreachable)
            .on_get("/health", MockReply::json(200, STATS))
            .on_get("/jobs", MockReply::json(200, "{}"))
            .on_get("/objects", MockReply::json(200, "{}"));
        let first = diagnose(&mock, &config()).await;
        let second = diagnose(&mock, &config()).await;
        assert!(!first.server_reachable);
        assert!(second.is_healthy());
    }
}
