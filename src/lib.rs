//! # Generation Orchestrator
//!
//! Drives image and video generation jobs on a remote diffusion backend:
//! validates the connection, builds the backend's node graph from a generic
//! request, submits it, and tracks the job to completion by polling.
//!
//! The backend offers no push notifications, so progress is inferred from
//! queue membership and the time budget grows while the job shows signs of
//! life. Every failure is classified into [`OrchestratorError`] so a UI can
//! tell a typo in the URL from a rejected password from a crashed server.
//!
//! ## Core Concepts
//!
//! - **[`Orchestrator`]**: the service. Built once with an injected
//!   [`ConfigProvider`], [`Transport`], strategy registry and event handler.
//! - **[`GenerationRequest`]**: what to generate, backend-agnostic.
//! - **[`GraphStrategy`]**: turns a request into a [`WorkflowGraph`];
//!   `txt2img`, `img2img` and `txt2video` ship by default.
//! - **[`JobTask`]**: a tracked job. Cancel it, stream its progress, or
//!   `wait()` for the [`JobOutcome`].
//! - **[`DiagnosticsReport`]**: the "test connection" answer.
//!
//! ## Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use gen_orchestrator::{ConnectionConfig, Dimensions, GenerationRequest, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("http://127.0.0.1:8188")
//!         .with_endpoints(gen_orchestrator::Endpoints::comfyui());
//!     let orchestrator = Orchestrator::builder(config).build();
//!
//!     let request = GenerationRequest::image("txt2img", "a lighthouse at dusk")
//!         .with_dimensions(Dimensions::new(768, 512));
//!     let mut task = orchestrator.generate(&request).await?;
//!
//!     let mut progress = Box::pin(task.progress_stream());
//!     tokio::spawn(async move {
//!         while let Some(p) = progress.next().await {
//!             println!("{:?} {}%", p.phase, p.percent);
//!         }
//!     });
//!
//!     let outcome = task.wait().await?;
//!     println!("{}", outcome.output.filename);
//!     Ok(())
//! }
//! ```

pub mod budget;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod graph;
pub mod job;
pub mod orchestrator;
pub mod poll;
pub mod probe;
pub mod request;
pub mod submit;
pub mod transport;
pub mod validate;

pub use budget::{AdaptiveBudget, Budget};
pub use config::{
    AuthCredential, ConfigProvider, ConnectionConfig, Endpoints, FnConfigProvider, TimeoutHints,
};
pub use diagnostics::{diagnose, DiagnosticsReport};
pub use error::{NodeError, OrchestratorError, Result, TransportError};
pub use events::{Event, EventHandler, FnEventHandler};
pub use graph::{GraphBuilder, GraphStrategy, Node, NodeInput, NodeRef, WorkflowGraph};
pub use job::{JobHandle, JobOutcome, JobState, OutputRef, Phase, ProgressEvent};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use poll::{JobTask, JobTracker, PollConfig, PollSignals};
pub use probe::{probe, DeviceInfo, ServerInfo, SystemInfo};
pub use request::{Dimensions, GenerationKind, GenerationRequest, SamplingParams};
pub use transport::{HttpResponse, HttpTransport, MockReply, MockTransport, Transport};
pub use validate::validate;
