//! Lenient readers for the history and queue endpoints.
//!
//! Both accept the two shapes seen in the wild: the generic
//! `running`/`pending` form and the node-graph server's
//! `queue_running`/`queue_pending` form.

use crate::error::{OrchestratorError, Result};
use crate::job::OutputRef;
use serde_json::{Map, Value};

/// Output collections a history entry may carry per node.
const OUTPUT_KEYS: [&str; 3] = ["images", "gifs", "videos"];

/// What the history endpoint says about a job.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryStatus {
    /// No artifact yet.
    Pending,
    /// At least one artifact exists.
    Completed {
        primary: OutputRef,
        all: Vec<OutputRef>,
    },
    /// The backend recorded an execution error.
    Failed(Vec<String>),
}

/// Where the job sits in the execution queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    Running,
    Pending,
    /// Listed in neither collection.
    Absent,
}

/// Interpret a history body for `job_id`.
///
/// The body may be keyed by job id (`{"<id>": {"outputs": ..}}`) or be the
/// entry itself. Artifacts win over a recorded error.
pub fn parse_history(body: &Value, job_id: &str) -> Result<HistoryStatus> {
    let root = body.as_object().ok_or_else(|| {
        OrchestratorError::MalformedResponse("history body is not an object".to_string())
    })?;

    let entry = match root.get(job_id) {
        Some(entry) => entry,
        None if root.contains_key("outputs") || root.contains_key("status") => body,
        None => return Ok(HistoryStatus::Pending),
    };

    let all = entry
        .get("outputs")
        .and_then(Value::as_object)
        .map(collect_outputs)
        .unwrap_or_default();
    if let Some(primary) = all.first().cloned() {
        return Ok(HistoryStatus::Completed { primary, all });
    }

    match entry.get("status") {
        Some(status) if status.get("status_str").and_then(Value::as_str) == Some("error") => {
            Ok(HistoryStatus::Failed(failure_messages(status)))
        }
        _ => Ok(HistoryStatus::Pending),
    }
}

fn collect_outputs(outputs: &Map<String, Value>) -> Vec<OutputRef> {
    let mut found = Vec::new();
    for (node_id, node) in outputs {
        for key in OUTPUT_KEYS {
            let Some(items) = node.get(key).and_then(Value::as_array) else {
                continue;
            };
            for item in items {
                let Some(filename) = item.get("filename").and_then(Value::as_str) else {
                    continue;
                };
                found.push(OutputRef {
                    node_id: node_id.clone(),
                    filename: filename.to_string(),
                    subfolder: item
                        .get("subfolder")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    media_type: item
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("output")
                        .to_string(),
                });
            }
        }
    }
    found
}

/// Pull `execution_error` details out of `status.messages`, which is a list
/// of `[event_name, data]` pairs.
fn failure_messages(status: &Value) -> Vec<String> {
    let messages: Vec<String> = status
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|m| {
            let pair = m.as_array()?;
            let (name, data) = (pair.first()?.as_str()?, pair.get(1)?);
            match name {
                "execution_error" => {
                    let text = data
                        .get("exception_message")
                        .and_then(Value::as_str)
                        .unwrap_or("execution error")
                        .trim();
                    Some(match data.get("node_type").and_then(Value::as_str) {
                        Some(node_type) => format!("{}: {}", node_type, text),
                        None => text.to_string(),
                    })
                }
                "execution_interrupted" => Some("execution interrupted".to_string()),
                _ => None,
            }
        })
        .collect();

    if messages.is_empty() {
        vec!["backend reported an execution error".to_string()]
    } else {
        messages
    }
}

/// Interpret a queue body for `job_id`.
pub fn parse_queue(body: &Value, job_id: &str) -> Result<QueuePosition> {
    let root = body.as_object().ok_or_else(|| {
        OrchestratorError::MalformedResponse("queue body is not an object".to_string())
    })?;

    let running = list(root, &["running", "queue_running"]);
    let pending = list(root, &["pending", "queue_pending"]);
    if running.is_none() && pending.is_none() {
        return Err(OrchestratorError::MalformedResponse(
            "queue body lists neither running nor pending jobs".to_string(),
        ));
    }

    if running.is_some_and(|entries| contains(entries, job_id)) {
        Ok(QueuePosition::Running)
    } else if pending.is_some_and(|entries| contains(entries, job_id)) {
        Ok(QueuePosition::Pending)
    } else {
        Ok(QueuePosition::Absent)
    }
}

fn list<'a>(root: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|k| root.get(*k).and_then(Value::as_array))
}

/// Entries are bare ids, `[number, id, ...]` tuples, or objects with an id
/// field.
fn contains(entries: &[Value], job_id: &str) -> bool {
    entries.iter().any(|entry| match entry {
        Value::String(id) => id == job_id,
        Value::Array(tuple) => tuple
            .iter()
            .take(2)
            .any(|v| v.as_str() == Some(job_id)),
        Value::Object(obj) => ["job_id", "prompt_id", "id"]
            .iter()
            .any(|k| obj.get(*k).and_then(Value::as_str) == Some(job_id)),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_history_keyed_by_id_with_outputs() {
        let body = json!({
            "abc": {
                "outputs": {
                    "9": {"images": [{"filename": "studio_00001_.png", "subfolder": "", "type": "output"}]},
                    "12": {"gifs": [{"filename": "clip.webp", "subfolder": "anim"}]}
                },
                "status": {"status_str": "success", "completed": true}
            }
        });
        match parse_history(&body, "abc").unwrap() {
            HistoryStatus::Completed { primary, all } => {
                assert_eq!(all.len(), 2);
                // Map keys iterate in sorted order.
                assert_eq!(primary.node_id, "12");
                assert_eq!(primary.subfolder, "anim");
                assert_eq!(primary.media_type, "output");
                assert_eq!(all[1].filename, "studio_00001_.png");
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[test]
    fn test_history_flat_entry_and_empty() {
        let flat = json!({"outputs": {"7": {"videos": [{"filename": "v.mp4"}]}}});
        assert!(matches!(
            parse_history(&flat, "abc").unwrap(),
            HistoryStatus::Completed { .. }
        ));
        assert_eq!(parse_history(&json!({}), "abc").unwrap(), HistoryStatus::Pending);
        assert_eq!(
            parse_history(&json!({"abc": {"outputs": {}}}), "abc").unwrap(),
            HistoryStatus::Pending
        );
    }

    #[test]
    fn test_history_error_status() {
        let body = json!({
            "abc": {
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [
                        ["execution_start", {"prompt_id": "abc"}],
                        ["execution_error", {"node_type": "KSampler", "exception_message": "CUDA out of memory\n"}]
                    ]
                }
            }
        });
        assert_eq!(
            parse_history(&body, "abc").unwrap(),
            HistoryStatus::Failed(vec!["KSampler: CUDA out of memory".to_string()])
        );

        let bare = json!({"abc": {"status": {"status_str": "error"}}});
        assert!(matches!(
            parse_history(&bare, "abc").unwrap(),
            HistoryStatus::Failed(ref m) if m.len() == 1
        ));
    }

    #[test]
    fn test_history_not_an_object() {
        assert!(parse_history(&json!([1, 2]), "abc").is_err());
    }

    #[test]
    fn test_queue_shapes() {
        let generic = json!({"running": ["abc"], "pending": ["def"]});
        assert_eq!(parse_queue(&generic, "abc").unwrap(), QueuePosition::Running);
        assert_eq!(parse_queue(&generic, "def").unwrap(), QueuePosition::Pending);
        assert_eq!(parse_queue(&generic, "zzz").unwrap(), QueuePosition::Absent);

        let tuples = json!({
            "queue_running": [[3, "abc", {"1": {}}, {}, ["9"]]],
            "queue_pending": [[4, "def", {}, {}, []]]
        });
        assert_eq!(parse_queue(&tuples, "abc").unwrap(), QueuePosition::Running);
        assert_eq!(parse_queue(&tuples, "def").unwrap(), QueuePosition::Pending);

        let objects = json!({"running": [], "pending": [{"job_id": "def"}]});
        assert_eq!(parse_queue(&objects, "def").unwrap(), QueuePosition::Pending);
    }

    #[test]
    fn test_queue_malformed() {
        assert!(parse_queue(&json!({"jobs": []}), "abc").is_err());
        assert!(parse_queue(&json!("busy"), "abc").is_err());
    }
}
