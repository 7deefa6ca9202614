//! Workflow graph model and the strategy registry that builds graphs.
//!
//! A [`WorkflowGraph`] is a set of typed nodes whose inputs are either
//! literal parameters or links to another node's output slot. The
//! [`GraphBuilder`] dispatches a request to the [`GraphStrategy`] named by
//! `request.template`; adding a template means registering a strategy, with
//! no change to submission or polling.
//!
//! ```text
//! GenerationRequest ──► GraphBuilder ──► strategy["txt2img"] ──► WorkflowGraph
//!                                   ├──► strategy["img2img"]
//!                                   └──► strategy["txt2video"]
//! ```

pub mod strategies;

pub use strategies::{ImageToImage, TextToImage, TextToVideo};

use crate::error::{OrchestratorError, Result};
use crate::request::GenerationRequest;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Reference to one output slot of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub node_id: String,
    pub slot: u32,
}

impl NodeRef {
    /// The same node, another output slot.
    pub fn slot(&self, slot: u32) -> NodeRef {
        NodeRef {
            node_id: self.node_id.clone(),
            slot,
        }
    }
}

/// A node input: literal value or link.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInput {
    Literal(Value),
    Link(NodeRef),
}

impl From<NodeRef> for NodeInput {
    fn from(r: NodeRef) -> Self {
        NodeInput::Link(r)
    }
}

impl From<&NodeRef> for NodeInput {
    fn from(r: &NodeRef) -> Self {
        NodeInput::Link(r.clone())
    }
}

impl From<Value> for NodeInput {
    fn from(v: Value) -> Self {
        NodeInput::Literal(v)
    }
}

/// One typed computation node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub class_type: String,
    pub inputs: BTreeMap<String, NodeInput>,
}

impl Node {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: BTreeMap::new(),
        }
    }

    /// Add an input (builder style).
    pub fn input(mut self, name: impl Into<String>, value: impl Into<NodeInput>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }
}

/// A backend execution graph. Node ids are assigned in insertion order
/// (`"1"`, `"2"`, ...), so the same build steps always give the same ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowGraph {
    nodes: BTreeMap<String, Node>,
    next_id: u32,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node and return a reference to its output slot 0.
    pub fn add(&mut self, node: Node) -> NodeRef {
        self.next_id += 1;
        let node_id = self.next_id.to_string();
        self.nodes.insert(node_id.clone(), node);
        NodeRef { node_id, slot: 0 }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(id, n)| (id.as_str(), n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of nodes with the given class.
    pub fn find_class<'a>(&'a self, class_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.nodes
            .iter()
            .filter(move |(_, n)| n.class_type == class_type)
            .map(|(id, _)| id.as_str())
    }

    /// Every link must point at an existing node.
    pub fn check_links(&self) -> Result<()> {
        for (id, node) in &self.nodes {
            for (name, input) in &node.inputs {
                if let NodeInput::Link(target) = input {
                    if !self.nodes.contains_key(&target.node_id) {
                        return Err(OrchestratorError::InvalidGraph(format!(
                            "node {} input '{}' links to missing node {}",
                            id, name, target.node_id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Serialize as `{ "<id>": { "class_type": .., "inputs": { .. } } }`
    /// with links encoded as `["<node_id>", slot]`.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for (id, node) in &self.nodes {
            let mut inputs = Map::new();
            for (name, input) in &node.inputs {
                let value = match input {
                    NodeInput::Literal(v) => v.clone(),
                    NodeInput::Link(r) => json!([r.node_id, r.slot]),
                };
                inputs.insert(name.clone(), value);
            }
            out.insert(
                id.clone(),
                json!({ "class_type": node.class_type, "inputs": Value::Object(inputs) }),
            );
        }
        Value::Object(out)
    }
}

/// Turns a request into a graph for one template.
///
/// Strategies receive the already-resolved seed and must be pure: same
/// request and seed, same graph.
pub trait GraphStrategy: Send + Sync {
    /// Template name this strategy answers to.
    fn name(&self) -> &str;

    /// Build the graph.
    fn build(&self, request: &GenerationRequest, seed: u64) -> Result<WorkflowGraph>;
}

/// Registry of graph strategies, keyed by template name.
///
/// # Example
///
/// ```
/// use gen_orchestrator::graph::GraphBuilder;
/// use gen_orchestrator::request::GenerationRequest;
///
/// let builder = GraphBuilder::default();
/// let request = GenerationRequest::image("txt2img", "a red fox").with_seed(1);
/// let graph = builder.build(&request).unwrap();
/// assert!(graph.find_class("KSampler").next().is_some());
/// ```
pub struct GraphBuilder {
    strategies: HashMap<String, Arc<dyn GraphStrategy>>,
}

impl GraphBuilder {
    /// A builder with no strategies.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Add or replace a strategy under its own name.
    pub fn register(&mut self, strategy: Arc<dyn GraphStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    /// Add a strategy (builder style).
    pub fn with(mut self, strategy: Arc<dyn GraphStrategy>) -> Self {
        self.register(strategy);
        self
    }

    /// Registered template names, sorted.
    pub fn templates(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the graph for `request`. A missing seed is drawn here; resolve
    /// it beforehand with
    /// [`with_resolved_seed`](GenerationRequest::with_resolved_seed) when the
    /// caller needs to know it.
    pub fn build(&self, request: &GenerationRequest) -> Result<WorkflowGraph> {
        let strategy = self
            .strategies
            .get(&request.template)
            .ok_or_else(|| OrchestratorError::UnknownTemplate(request.template.clone()))?;

        if request.prompt.trim().is_empty() {
            return Err(OrchestratorError::MissingField {
                template: request.template.clone(),
                field: "prompt",
            });
        }

        let seed = match request.seed {
            Some(seed) => seed,
            None => request.clone().with_resolved_seed().seed.unwrap_or_default(),
        };

        let graph = strategy.build(request, seed)?;
        graph.check_links()?;
        Ok(graph)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::empty()
            .with(Arc::new(TextToImage))
            .with(Arc::new(ImageToImage))
            .with(Arc::new(TextToVideo))
    }
}

impl std::fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("templates", &self.templates())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Single;

    impl GraphStrategy for Single {
        fn name(&self) -> &str {
            "single"
        }
        fn build(&self, request: &GenerationRequest, seed: u64) -> Result<WorkflowGraph> {
            let mut g = WorkflowGraph::new();
            g.add(
                Node::new("Echo")
                    .input("text", json!(request.prompt))
                    .input("seed", json!(seed)),
            );
            Ok(g)
        }
    }

    struct Dangling;

    impl GraphStrategy for Dangling {
        fn name(&self) -> &str {
            "dangling"
        }
        fn build(&self, _request: &GenerationRequest, _seed: u64) -> Result<WorkflowGraph> {
            let mut g = WorkflowGraph::new();
            g.add(Node::new("Sink").input(
                "src",
                NodeRef {
                    node_id: "99".into(),
                    slot: 0,
                },
            ));
            Ok(g)
        }
    }

    #[test]
    fn test_node_ids_are_sequential() {
        let mut g = WorkflowGraph::new();
        let a = g.add(Node::new("A"));
        let b = g.add(Node::new("B").input("x", &a));
        assert_eq!(a.node_id, "1");
        assert_eq!(b.node_id, "2");
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_to_json_encodes_links() {
        let mut g = WorkflowGraph::new();
        let loader = g.add(Node::new("Loader").input("name", json!("m.safetensors")));
        g.add(Node::new("Use").input("clip", loader.slot(1)));

        let v = g.to_json();
        assert_eq!(v["1"]["class_type"], "Loader");
        assert_eq!(v["1"]["inputs"]["name"], "m.safetensors");
        assert_eq!(v["2"]["inputs"]["clip"], json!(["1", 1]));
    }

    #[test]
    fn test_unknown_template() {
        let builder = GraphBuilder::default();
        let err = builder
            .build(&GenerationRequest::image("nope", "x"))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTemplate(ref t) if t == "nope"));
    }

    #[test]
    fn test_empty_prompt_is_missing_field() {
        let builder = GraphBuilder::default();
        let err = builder
            .build(&GenerationRequest::image("txt2img", "   "))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingField { field: "prompt", .. }));
    }

    #[test]
    fn test_custom_strategy_registration() {
        let builder = GraphBuilder::empty().with(Arc::new(Single));
        assert_eq!(builder.templates(), vec!["single"]);

        let graph = builder
            .build(&GenerationRequest::image("single", "hi").with_seed(5))
            .unwrap();
        assert_eq!(graph.to_json()["1"]["inputs"]["seed"], 5);
    }

    #[test]
    fn test_dangling_links_rejected() {
        let builder = GraphBuilder::empty().with(Arc::new(Dangling));
        let err = builder
            .build(&GenerationRequest::image("dangling", "hi"))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidGraph(_)));
    }

    #[test]
    fn test_default_templates() {
        assert_eq!(
            GraphBuilder::default().templates(),
            vec!["img2img", "txt2img", "txt2video"]
        );
    }
}
