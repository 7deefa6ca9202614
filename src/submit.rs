//! Job submitter: one POST of the workflow graph.

use crate::budget::Budget;
use crate::config::ConnectionConfig;
use crate::error::{NodeError, OrchestratorError, Result};
use crate::graph::WorkflowGraph;
use crate::job::JobHandle;
use crate::transport::{HttpResponse, Transport};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Submission body: `{"prompt": <graph>, "client_id": ..}`.
pub fn submission_body(graph: &WorkflowGraph, config: &ConnectionConfig) -> Value {
    let mut body = json!({ "prompt": graph.to_json() });
    if let Some(ref client_id) = config.client_id {
        body["client_id"] = json!(client_id);
    }
    body
}

/// POST the graph and wrap the returned id in a [`JobHandle`] carrying
/// `budget`.
///
/// Non-2xx answers become [`OrchestratorError::Submit`] with whatever
/// node-level errors the backend listed, uninterpreted.
pub async fn submit(
    transport: &dyn Transport,
    config: &ConnectionConfig,
    graph: &WorkflowGraph,
    budget: Budget,
) -> Result<JobHandle> {
    let url = config.url_for(&config.endpoints.submit);
    let timeout = config.timeouts.request();
    let body = submission_body(graph, config);

    let resp = transport
        .post_json(&url, &config.authentication, &body, timeout)
        .await
        .map_err(|e| e.into_orchestrator(config.timeouts.request_ms))?;

    if !resp.is_success() {
        let err = rejection(&resp);
        warn!(url = %url, status = resp.status, error = %err, "submission rejected");
        return Err(err);
    }

    let parsed: Value = resp.json().map_err(|e| {
        OrchestratorError::MalformedResponse(format!(
            "submission response is not JSON: {} ({})",
            e,
            resp.body_preview()
        ))
    })?;
    let job_id = extract_job_id(&parsed).ok_or_else(|| {
        OrchestratorError::MalformedResponse(format!(
            "submission response has no job id: {}",
            resp.body_preview()
        ))
    })?;

    info!(
        job_id = %job_id,
        nodes = graph.len(),
        budget_ms = budget.as_millis(),
        "job submitted"
    );
    Ok(JobHandle::new(job_id, budget))
}

/// `job_id` or `prompt_id`, string or number.
fn extract_job_id(v: &Value) -> Option<String> {
    ["job_id", "prompt_id"].iter().find_map(|key| match v.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn rejection(resp: &HttpResponse) -> OrchestratorError {
    let parsed: Option<Value> = resp.json().ok();

    let message = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| match e {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => e.get("message").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .unwrap_or_else(|| resp.body_preview());

    let node_errors = parsed
        .as_ref()
        .and_then(|v| v.get("node_errors"))
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(node_id, entry)| parse_node_error(node_id, entry))
                .collect()
        })
        .unwrap_or_default();

    OrchestratorError::Submit {
        status: resp.status,
        message,
        node_errors,
    }
}

fn parse_node_error(node_id: &str, entry: &Value) -> NodeError {
    let messages = entry
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    let message = e.get("message").and_then(Value::as_str).unwrap_or("error");
                    match e.get("details").and_then(Value::as_str) {
                        Some(details) if !details.is_empty() => format!("{}: {}", message, details),
                        _ => message.to_string(),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    NodeError {
        node_id: node_id.to_string(),
        class_type: entry
            .get("class_type")
            .and_then(Value::as_str)
            .map(str::to_string),
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::request::GenerationRequest;
    use crate::transport::{MockReply, MockTransport};

    fn graph() -> WorkflowGraph {
        GraphBuilder::default()
            .build(&GenerationRequest::image("txt2img", "fox").with_seed(3))
            .unwrap()
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("http://gpu:8188")
    }

    #[tokio::test]
    async fn test_submit_returns_handle() {
        let mock = MockTransport::new().on_post("/jobs", MockReply::json(200, r#"{"job_id": "abc"}"#));
        let handle = submit(&mock, &config(), &graph(), Budget::from_millis(300_000))
            .await
            .unwrap();
        assert_eq!(handle.job_id(), "abc");
        assert_eq!(handle.budget().as_millis(), 300_000);

        let sent = mock.requests()[0].body.clone().unwrap();
        assert_eq!(sent["prompt"]["1"]["class_type"], "CheckpointLoaderSimple");
        assert!(sent.get("client_id").is_none());
    }

    #[tokio::test]
    async fn test_submit_accepts_prompt_id_and_sends_client_id() {
        let mock = MockTransport::new().on_post(
            "/prompt",
            MockReply::json(200, r#"{"prompt_id": "p-1", "number": 4, "node_errors": {}}"#),
        );
        let config = config()
            .with_endpoints(crate::config::Endpoints::comfyui())
            .with_client_id("studio-ui");
        let handle = submit(&mock, &config, &graph(), Budget::from_millis(1))
            .await
            .unwrap();
        assert_eq!(handle.job_id(), "p-1");
        assert_eq!(mock.requests()[0].body.as_ref().unwrap()["client_id"], "studio-ui");
    }

    #[tokio::test]
    async fn test_submit_rejection_carries_node_errors() {
        let body = r#"{
            "error": {"type": "prompt_outputs_failed_validation", "message": "Prompt outputs failed validation"},
            "node_errors": {
                "1": {
                    "class_type": "CheckpointLoaderSimple",
                    "errors": [{"message": "Value not in list", "details": "ckpt_name: 'x' not in []"}]
                }
            }
        }"#;
        let mock = MockTransport::new().on_post("/jobs", MockReply::json(400, body));
        let err = submit(&mock, &config(), &graph(), Budget::from_millis(1))
            .await
            .unwrap_err();

        match err {
            OrchestratorError::Submit {
                status,
                message,
                node_errors,
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Prompt outputs failed validation");
                assert_eq!(node_errors.len(), 1);
                assert_eq!(node_errors[0].node_id, "1");
                assert_eq!(
                    node_errors[0].class_type.as_deref(),
                    Some("CheckpointLoaderSimple")
                );
                assert_eq!(
                    node_errors[0].messages,
                    vec!["Value not in list: ckpt_name: 'x' not in []"]
                );
            }
            other => panic!("expected Submit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_rejection_plain_text() {
        let mock = MockTransport::new().on_post("/jobs", MockReply::json(500, "boom"));
        let err = submit(&mock, &config(), &graph(), Budget::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Submit { status: 500, ref message, ref node_errors }
                if message == "boom" && node_errors.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_submit_missing_id_is_malformed() {
        let mock = MockTransport::new().on_post("/jobs", MockReply::json(200, r#"{"ok": true}"#));
        let err = submit(&mock, &config(), &graph(), Budget::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_submit_unreachable() {
        let mock = MockTransport::new().on_post("/jobs", MockReply::Unreachable);
        let err = submit(&mock, &config(), &graph(), Budget::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Unreachable(_)));
    }
}
