//! Mock transport for testing without a live backend.
//!
//! [`MockTransport`] serves scripted replies per `(method, path)`, allowing
//! downstream consumers to write deterministic tests against this crate.
//!
//! # Example
//!
//! ```
//! use gen_orchestrator::transport::{MockReply, MockTransport};
//!
//! let mock = MockTransport::new()
//!     .on_get("/health", MockReply::json(200, r#"{"devices": []}"#))
//!     .on_get("/jobs/queue", MockReply::Unreachable);
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use super::{HttpResponse, Transport};
use crate::config::AuthCredential;
use crate::error::TransportError;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// An HTTP response.
    Respond(HttpResponse),
    /// The request deadline elapses.
    Timeout,
    /// Connection refused.
    Unreachable,
}

impl MockReply {
    /// A response with the given status and body.
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        MockReply::Respond(HttpResponse::new(status, body))
    }

    /// A response whose body is a JSON value.
    pub fn value(status: u16, body: &Value) -> Self {
        MockReply::Respond(HttpResponse::new(status, body.to_string()))
    }
}

/// A request the mock observed.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub auth_scheme: &'static str,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct Route {
    replies: Vec<MockReply>,
    served: usize,
}

/// A test transport with per-route reply scripts.
///
/// Replies for a route are served in order; once exhausted the last one
/// repeats. Unscripted routes answer 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(&'static str, String), Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reply to the script for `GET path`.
    pub fn on_get(self, path: impl Into<String>, reply: MockReply) -> Self {
        self.push("GET", path.into(), reply);
        self
    }

    /// Append a reply to the script for `POST path`.
    pub fn on_post(self, path: impl Into<String>, reply: MockReply) -> Self {
        self.push("POST", path.into(), reply);
        self
    }

    /// Append a reply after construction (e.g. from a shared `Arc`).
    pub fn push(&self, method: &'static str, path: String, reply: MockReply) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.entry((method, path)).or_default().replies.push(reply);
    }

    /// Every request observed so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests observed so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of requests to one path.
    pub fn count_for(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    fn path_of(url: &str) -> String {
        Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string())
    }

    fn serve(
        &self,
        method: &'static str,
        url: &str,
        auth: &AuthCredential,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError> {
        let path = Self::path_of(url);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                method,
                path: path.clone(),
                auth_scheme: auth.scheme(),
                body: body.cloned(),
            });

        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let reply = match routes.get_mut(&(method, path)) {
            Some(route) if !route.replies.is_empty() => {
                let idx = route.served.min(route.replies.len() - 1);
                route.served += 1;
                route.replies[idx].clone()
            }
            _ => MockReply::json(404, "not found"),
        };

        match reply {
            MockReply::Respond(resp) => Ok(resp),
            MockReply::Timeout => Err(TransportError::Timeout),
            MockReply::Unreachable => Err(TransportError::Unreachable(
                "connection refused".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(
        &self,
        url: &str,
        auth: &AuthCredential,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.serve("GET", url, auth, None)
    }

    async fn post_json(
        &self,
        url: &str,
        auth: &AuthCredential,
        body: &Value,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.serve("POST", url, auth, Some(body))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_mock_serves_in_order_then_repeats_last() {
        let mock = MockTransport::new()
            .on_get("/a", MockReply::json(200, "first"))
            .on_get("/a", MockReply::json(200, "second"));
        let auth = AuthCredential::None;

        let r1 = mock.get("http://h/a", &auth, T).await.unwrap();
        let r2 = mock.get("http://h/a", &auth, T).await.unwrap();
        let r3 = mock.get("http://h/a", &auth, T).await.unwrap();
        assert_eq!(r1.body, "first");
        assert_eq!(r2.body, "second");
        assert_eq!(r3.body, "second");
    }

    #[tokio::test]
    async fn test_mock_unscripted_is_404() {
        let mock = MockTransport::new();
        let resp = mock
            .get("http://h/missing", &AuthCredential::None, T)
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_mock_transport_failures() {
        let mock = MockTransport::new()
            .on_get("/slow", MockReply::Timeout)
            .on_get("/down", MockReply::Unreachable);
        let auth = AuthCredential::None;
        assert_eq!(
            mock.get("http://h/slow", &auth, T).await.unwrap_err(),
            TransportError::Timeout
        );
        assert!(matches!(
            mock.get("http://h/down", &auth, T).await.unwrap_err(),
            TransportError::Unreachable(_)
        ));
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let mock = MockTransport::new().on_post("/jobs", MockReply::json(200, "{}"));
        let auth = AuthCredential::Bearer { token: "t".into() };
        mock.post_json("http://h/jobs", &auth, &serde_json::json!({"x": 1}), T)
            .await
            .unwrap();

        let reqs = mock.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, "POST");
        assert_eq!(reqs[0].path, "/jobs");
        assert_eq!(reqs[0].auth_scheme, "bearer");
        assert_eq!(reqs[0].body.as_ref().unwrap()["x"], 1);
        assert_eq!(mock.count_for("/jobs"), 1);
    }
}
