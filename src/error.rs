use std::fmt;
use thiserror::Error;

/// A node-level validation error returned by the backend on submission.
///
/// The orchestrator does not interpret these; they are carried verbatim so
/// the caller can point at the offending node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeError {
    /// Id of the node the backend rejected.
    pub node_id: String,
    /// Node class, when the backend reports it.
    pub class_type: Option<String>,
    /// One entry per reported problem.
    pub messages: Vec<String>,
}

/// Errors produced by the orchestrator and its components.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Connection configuration is malformed (bad URL, unsupported scheme,
    /// incomplete credentials). Never involves I/O.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The backend rejected our credentials (HTTP 401/403).
    #[error("Authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    /// DNS failure, connection refused, or any other transport failure
    /// that is not a deadline.
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// The server answered 404 on an endpoint it should expose.
    #[error("Backend does not expose {endpoint} (API version mismatch?)")]
    VersionMismatch { endpoint: String },

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Server { status: u16, body: String },

    /// A 2xx response whose body does not match the expected schema.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The backend refused the submitted graph.
    #[error("Submission rejected (HTTP {status}): {message}")]
    Submit {
        status: u16,
        message: String,
        node_errors: Vec<NodeError>,
    },

    /// A deadline or job budget ran out.
    #[error("Timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// The caller cancelled the job.
    #[error("Job was cancelled")]
    Cancelled,

    /// The backend executed the job and reported a failure.
    #[error("Job {job_id} failed: {}", messages.join("; "))]
    JobFailed {
        job_id: String,
        messages: Vec<String>,
    },

    /// No graph strategy is registered under this template name.
    #[error("Unknown template '{0}'")]
    UnknownTemplate(String),

    /// A template needs a request field that was not supplied.
    #[error("Template '{template}' requires field '{field}'")]
    MissingField {
        template: String,
        field: &'static str,
    },

    /// A strategy produced a graph with broken wiring.
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    /// JSON (de)serialisation failed at the serde level.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status } | Self::Server { status, .. } | Self::Submit { status, .. } => {
                Some(*status)
            }
            Self::VersionMismatch { .. } => Some(404),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Config(format!("{:#}", err))
    }
}

/// Failure at the transport seam, before any HTTP status exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The per-request deadline elapsed.
    #[error("request deadline exceeded")]
    Timeout,

    /// Name resolution or connection establishment failed.
    #[error("connection failed: {0}")]
    Unreachable(String),

    /// Anything else the HTTP stack reported.
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Classify into the orchestrator taxonomy. `deadline_ms` is reported as
    /// the elapsed time for deadline aborts.
    pub fn into_orchestrator(self, deadline_ms: u64) -> OrchestratorError {
        match self {
            TransportError::Timeout => OrchestratorError::Timeout {
                elapsed_ms: deadline_ms,
            },
            TransportError::Unreachable(msg) | TransportError::Other(msg) => {
                OrchestratorError::Unreachable(msg)
            }
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.class_type {
            Some(class) => write!(f, "node {} ({}): ", self.node_id, class)?,
            None => write!(f, "node {}: ", self.node_id)?,
        }
        f.write_str(&self.messages.join("; "))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_accessor() {
        assert_eq!(OrchestratorError::Auth { status: 403 }.status(), Some(403));
        assert_eq!(
            OrchestratorError::Server {
                status: 502,
                body: String::new()
            }
            .status(),
            Some(502)
        );
        assert_eq!(OrchestratorError::Cancelled.status(), None);
    }

    #[test]
    fn test_transport_error_classification() {
        assert!(matches!(
            TransportError::Timeout.into_orchestrator(10_000),
            OrchestratorError::Timeout { elapsed_ms: 10_000 }
        ));
        assert!(matches!(
            TransportError::Unreachable("refused".into()).into_orchestrator(0),
            OrchestratorError::Unreachable(_)
        ));
    }

    #[test]
    fn test_node_error_display() {
        let err = NodeError {
            node_id: "3".into(),
            class_type: Some("KSampler".into()),
            messages: vec!["steps must be > 0".into()],
        };
        assert_eq!(err.to_string(), "node 3 (KSampler): steps must be > 0");
    }

    #[test]
    fn test_anyhow_becomes_config_error() {
        let err: OrchestratorError = anyhow::anyhow!("settings file missing").into();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }
}
