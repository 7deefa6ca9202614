//! Built-in graph strategies for node-graph diffusion backends.
//!
//! All three share the same spine (checkpoint → prompt encoders → sampler →
//! decoder); they differ in where the latent comes from and how the result
//! is saved.

use super::{GraphStrategy, Node, NodeRef, WorkflowGraph};
use crate::error::{OrchestratorError, Result};
use crate::request::{Dimensions, GenerationRequest};
use serde_json::json;

/// Checkpoint used when the request names none.
pub const DEFAULT_CHECKPOINT: &str = "v1-5-pruned-emaonly.safetensors";

const DEFAULT_DIMENSIONS: Dimensions = Dimensions {
    width: 512,
    height: 512,
};
const DEFAULT_FPS: u32 = 8;
const FILENAME_PREFIX: &str = "studio";

/// Nodes every strategy needs before sampling.
struct Spine {
    model: NodeRef,
    vae: NodeRef,
    positive: NodeRef,
    negative: NodeRef,
}

fn spine(graph: &mut WorkflowGraph, request: &GenerationRequest) -> Spine {
    let checkpoint = graph.add(Node::new("CheckpointLoaderSimple").input(
        "ckpt_name",
        json!(request.model.as_deref().unwrap_or(DEFAULT_CHECKPOINT)),
    ));
    let clip = checkpoint.slot(1);
    let positive = graph.add(
        Node::new("CLIPTextEncode")
            .input("text", json!(request.prompt))
            .input("clip", &clip),
    );
    let negative = graph.add(
        Node::new("CLIPTextEncode")
            .input("text", json!(request.negative_prompt))
            .input("clip", &clip),
    );
    Spine {
        model: checkpoint.slot(0),
        vae: checkpoint.slot(2),
        positive,
        negative,
    }
}

/// Sampler and decoder; returns the decoded image batch.
fn sample_and_decode(
    graph: &mut WorkflowGraph,
    request: &GenerationRequest,
    spine: &Spine,
    latent: NodeRef,
    seed: u64,
    denoise: f64,
) -> NodeRef {
    let s = &request.sampling;
    let sampled = graph.add(
        Node::new("KSampler")
            .input("model", &spine.model)
            .input("positive", &spine.positive)
            .input("negative", &spine.negative)
            .input("latent_image", latent)
            .input("seed", json!(seed))
            .input("steps", json!(s.steps))
            .input("cfg", json!(s.cfg_scale))
            .input("sampler_name", json!(s.sampler))
            .input("scheduler", json!(s.scheduler))
            .input("denoise", json!(denoise)),
    );
    graph.add(
        Node::new("VAEDecode")
            .input("samples", sampled)
            .input("vae", &spine.vae),
    )
}

fn empty_latent(graph: &mut WorkflowGraph, dims: Dimensions, batch_size: u32) -> NodeRef {
    graph.add(
        Node::new("EmptyLatentImage")
            .input("width", json!(dims.width))
            .input("height", json!(dims.height))
            .input("batch_size", json!(batch_size.max(1))),
    )
}

fn save_image(graph: &mut WorkflowGraph, images: NodeRef) {
    graph.add(
        Node::new("SaveImage")
            .input("images", images)
            .input("filename_prefix", json!(FILENAME_PREFIX)),
    );
}

/// Text prompt to image.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextToImage;

impl GraphStrategy for TextToImage {
    fn name(&self) -> &str {
        "txt2img"
    }

    fn build(&self, request: &GenerationRequest, seed: u64) -> Result<WorkflowGraph> {
        let mut graph = WorkflowGraph::new();
        let spine = spine(&mut graph, request);
        let dims = request.dimensions.unwrap_or(DEFAULT_DIMENSIONS);
        let latent = empty_latent(&mut graph, dims, request.batch_size);
        let images = sample_and_decode(
            &mut graph,
            request,
            &spine,
            latent,
            seed,
            request.sampling.denoise,
        );
        save_image(&mut graph, images);
        Ok(graph)
    }
}

/// Source image plus prompt to image. Requires `source_image`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageToImage;

impl GraphStrategy for ImageToImage {
    fn name(&self) -> &str {
        "img2img"
    }

    fn build(&self, request: &GenerationRequest, seed: u64) -> Result<WorkflowGraph> {
        let source = request
            .source_image
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| OrchestratorError::MissingField {
                template: self.name().to_string(),
                field: "source_image",
            })?;

        let mut graph = WorkflowGraph::new();
        let spine = spine(&mut graph, request);
        let loaded = graph.add(Node::new("LoadImage").input("image", json!(source)));
        let latent = graph.add(
            Node::new("VAEEncode")
                .input("pixels", loaded)
                .input("vae", &spine.vae),
        );
        let images = sample_and_decode(
            &mut graph,
            request,
            &spine,
            latent,
            seed,
            request.sampling.denoise,
        );
        save_image(&mut graph, images);
        Ok(graph)
    }
}

/// Text prompt to a short animated clip. Requires `frames`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextToVideo;

impl GraphStrategy for TextToVideo {
    fn name(&self) -> &str {
        "txt2video"
    }

    fn build(&self, request: &GenerationRequest, seed: u64) -> Result<WorkflowGraph> {
        let frames = request
            .frames
            .filter(|f| *f > 0)
            .ok_or_else(|| OrchestratorError::MissingField {
                template: self.name().to_string(),
                field: "frames",
            })?;

        let mut graph = WorkflowGraph::new();
        let spine = spine(&mut graph, request);
        let dims = request.dimensions.unwrap_or(DEFAULT_DIMENSIONS);
        let latent = empty_latent(&mut graph, dims, frames);
        let images = sample_and_decode(
            &mut graph,
            request,
            &spine,
            latent,
            seed,
            request.sampling.denoise,
        );
        graph.add(
            Node::new("SaveAnimatedWEBP")
                .input("images", images)
                .input("filename_prefix", json!(FILENAME_PREFIX))
                .input("fps", json!(request.fps.unwrap_or(DEFAULT_FPS)))
                .input("lossless", json!(false))
                .input("quality", json!(80))
                .input("method", json!("default")),
        );
        Ok(graph)
    }
}
