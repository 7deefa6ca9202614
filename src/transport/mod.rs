//! Transport trait and the normalized response type.
//!
//! The [`Transport`] trait is the only place the orchestrator touches the
//! network. Every component takes an `Arc<dyn Transport>`, so tests swap in
//! [`MockTransport`] without global state.
//!
//! ## Architecture
//!
//! ```text
//! Prober / Submitter / Poll loop / Diagnostics
//!                    │
//!          Transport::get() / post_json()
//!                    │
//!        ┌───────────┴───────────┐
//!   HttpTransport           MockTransport
//!   reqwest::Client         scripted replies
//!   (shared pool)           per (method, path)
//! ```

pub mod http;
pub mod mock;

pub use http::HttpTransport;
pub use mock::{MockReply, MockTransport};

use crate::config::AuthCredential;
use crate::error::TransportError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// A normalized HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body text.
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx?
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 401 or 403.
    pub fn is_auth_failure(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    /// Deserialize the body.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }

    /// First 200 characters of the body, for error messages.
    pub fn body_preview(&self) -> String {
        let trimmed = self.body.trim();
        let mut preview: String = trimmed.chars().take(200).collect();
        if preview.len() < trimmed.len() {
            preview.push_str("...");
        }
        preview
    }
}

/// Abstraction over the HTTP stack.
///
/// Implementations apply `auth` to every request and enforce `timeout` as a
/// hard per-request deadline. A deadline abort must surface as
/// [`TransportError::Timeout`] so callers can tell it apart from an
/// unreachable host.
///
/// This trait is object-safe and designed to be used as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET.
    async fn get(
        &self,
        url: &str,
        auth: &AuthCredential,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;

    /// POST a JSON body.
    async fn post_json(
        &self,
        url: &str,
        auth: &AuthCredential,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_status_helpers() {
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(301, "").is_success());
        assert!(HttpResponse::new(401, "").is_auth_failure());
        assert!(HttpResponse::new(403, "").is_auth_failure());
        assert!(!HttpResponse::new(404, "").is_auth_failure());
    }

    #[test]
    fn test_body_preview_truncates() {
        let resp = HttpResponse::new(500, "x".repeat(500));
        let preview = resp.body_preview();
        assert!(preview.ends_with("..."));
        assert_eq!(preview.len(), 203);

        assert_eq!(HttpResponse::new(500, "  short  ").body_preview(), "short");
    }
}
