use serde::{Deserialize, Serialize};

/// What the job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Image,
    Video,
}

/// Output size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// width × height / 1e6.
    pub fn megapixels(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height) / 1_000_000.0
    }
}

/// Sampler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub steps: u32,
    pub cfg_scale: f64,
    pub sampler: String,
    pub scheduler: String,
    /// 1.0 regenerates from noise; lower values keep more of a source image.
    pub denoise: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            steps: 20,
            cfg_scale: 7.0,
            sampler: "euler".to_string(),
            scheduler: "normal".to_string(),
            denoise: 1.0,
        }
    }
}

/// A backend-agnostic generation request.
///
/// `template` names the graph strategy that turns this request into a
/// workflow graph (see [`GraphBuilder`](crate::graph::GraphBuilder)).
///
/// # Example
///
/// ```
/// use gen_orchestrator::request::{Dimensions, GenerationRequest};
///
/// let request = GenerationRequest::image("txt2img", "a lighthouse at dusk")
///     .with_negative_prompt("blurry")
///     .with_dimensions(Dimensions::new(768, 512))
///     .with_seed(42);
/// assert_eq!(request.seed, Some(42));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    pub template: String,
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Checkpoint / model file name on the backend.
    #[serde(default)]
    pub model: Option<String>,
    /// Source image reference for image-to-image templates.
    #[serde(default)]
    pub source_image: Option<String>,
    /// Frame count for video templates.
    #[serde(default)]
    pub frames: Option<u32>,
    /// Frame rate for video templates.
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_batch_size() -> u32 {
    1
}

/// Upper bound for drawn seeds; keeps them exact in JSON consumers that
/// store numbers as doubles.
const MAX_DRAWN_SEED: u64 = 1 << 53;

impl GenerationRequest {
    fn new(kind: GenerationKind, template: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            template: template.into(),
            prompt: prompt.into(),
            negative_prompt: String::new(),
            dimensions: None,
            sampling: SamplingParams::default(),
            seed: None,
            model: None,
            source_image: None,
            frames: None,
            fps: None,
            batch_size: default_batch_size(),
        }
    }

    /// An image request.
    pub fn image(template: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(GenerationKind::Image, template, prompt)
    }

    /// A video request.
    pub fn video(template: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(GenerationKind::Video, template, prompt)
    }

    pub fn with_negative_prompt(mut self, text: impl Into<String>) -> Self {
        self.negative_prompt = text.into();
        self
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_source_image(mut self, image: impl Into<String>) -> Self {
        self.source_image = Some(image.into());
        self
    }

    pub fn with_frames(mut self, frames: u32) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Fix the seed: keep an explicit one, otherwise draw one now.
    ///
    /// After this the request is fully deterministic; building it twice
    /// yields identical graphs.
    pub fn with_resolved_seed(mut self) -> Self {
        if self.seed.is_none() {
            self.seed = Some(fastrand::u64(..MAX_DRAWN_SEED));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_megapixels() {
        assert!((Dimensions::new(512, 512).megapixels() - 0.262144).abs() < 1e-9);
        assert!((Dimensions::new(1600, 1000).megapixels() - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_resolved_seed_keeps_explicit() {
        let r = GenerationRequest::image("txt2img", "cat").with_seed(7).with_resolved_seed();
        assert_eq!(r.seed, Some(7));
    }

    #[test]
    fn test_resolved_seed_draws_once() {
        let r = GenerationRequest::image("txt2img", "cat").with_resolved_seed();
        let seed = r.seed.expect("seed drawn");
        assert!(seed < MAX_DRAWN_SEED);
        // A second resolve leaves the drawn seed alone.
        assert_eq!(r.clone().with_resolved_seed().seed, Some(seed));
    }

    #[test]
    fn test_deserialize_request_defaults() {
        let r: GenerationRequest = serde_json::from_str(
            r#"{"kind": "video", "template": "txt2video", "prompt": "waves"}"#,
        )
        .unwrap();
        assert_eq!(r.kind, GenerationKind::Video);
        assert_eq!(r.batch_size, 1);
        assert_eq!(r.sampling.steps, 20);
        assert!(r.dimensions.is_none());
    }
}
