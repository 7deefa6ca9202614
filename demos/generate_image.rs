//! Example: generate one image on a real backend.
//!
//! Run with:
//! `cargo run --example generate_image -- http://127.0.0.1:8188 "a red fox in snow"`
//!
//! `GEN_SERVER_URL` is used when no URL argument is given. Set
//! `GEN_BEARER_TOKEN` for servers behind a token proxy.

use futures::StreamExt;
use gen_orchestrator::{
    ConnectionConfig, Dimensions, Endpoints, GenerationRequest, Orchestrator, OrchestratorError,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gen_orchestrator=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .or_else(|| std::env::var("GEN_SERVER_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:8188".to_string());
    let prompt = args
        .next()
        .unwrap_or_else(|| "a lighthouse at dusk, oil painting".to_string());

    let mut config = ConnectionConfig::new(url).with_endpoints(Endpoints::comfyui());
    if let Ok(token) = std::env::var("GEN_BEARER_TOKEN") {
        config = config.with_bearer_token(token);
    }

    let orchestrator = Orchestrator::builder(config.clone()).build();

    let info = orchestrator.probe().await?;
    println!(
        "Backend: {} ({} MiB VRAM free)",
        info.primary_device().unwrap_or("unknown device"),
        info.free_vram() / (1024 * 1024)
    );

    let request = GenerationRequest::image("txt2img", prompt)
        .with_dimensions(Dimensions::new(512, 512))
        .with_resolved_seed();
    println!("Seed: {}", request.seed.unwrap_or_default());

    let mut task = orchestrator.generate(&request).await?;
    println!("Job {} submitted", task.job_id());

    let mut progress = Box::pin(task.progress_stream());
    tokio::spawn(async move {
        while let Some(p) = progress.next().await {
            println!("  {:>3}%  {}", p.percent, p.message);
        }
    });

    let cancel = task.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    match task.wait().await {
        Ok(outcome) => {
            println!("Done in {} ms", outcome.elapsed_ms);
            for output in &outcome.all_outputs {
                println!("  {}", output.view_url(&config)?);
            }
        }
        Err(OrchestratorError::Cancelled) => println!("Cancelled"),
        Err(OrchestratorError::Timeout { elapsed_ms }) => {
            println!("Gave up after {} ms; the job may still finish on the server", elapsed_ms)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
