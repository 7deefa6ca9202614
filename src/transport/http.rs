//! Transport over a shared `reqwest::Client`.
//!
//! The client owns a connection pool, so one [`HttpTransport`] should be
//! shared across every job the orchestrator tracks.

use super::{HttpResponse, Transport};
use crate::config::AuthCredential;
use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

/// Production transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with a fresh client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an existing client (and its pool).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn authorize(builder: RequestBuilder, auth: &AuthCredential) -> RequestBuilder {
        match auth {
            AuthCredential::None => builder,
            AuthCredential::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            AuthCredential::Bearer { token } => builder.bearer_auth(token),
        }
    }

    /// Map a reqwest failure onto the transport taxonomy.
    fn classify(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Unreachable(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }

    async fn send(builder: RequestBuilder) -> Result<HttpResponse, TransportError> {
        let resp = builder.send().await.map_err(Self::classify)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(Self::classify)?;
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        auth: &AuthCredential,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let builder = Self::authorize(self.client.get(url), auth).timeout(timeout);
        Self::send(builder).await
    }

    async fn post_json(
        &self,
        url: &str,
        auth: &AuthCredential,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let builder = Self::authorize(self.client.post(url), auth)
            .json(body)
            .timeout(timeout);
        Self::send(builder).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
