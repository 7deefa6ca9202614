//! Example: a full job against MockTransport, no backend needed.
//!
//! Run with: `RUST_LOG=gen_orchestrator=debug cargo run --example mock_job`

use futures::StreamExt;
use gen_orchestrator::{
    ConnectionConfig, Dimensions, Event, FnEventHandler, GenerationRequest, MockReply,
    MockTransport, Orchestrator, PollConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Queued for two polls, running for two, then done.
    let mock = MockTransport::new()
        .on_get(
            "/health",
            MockReply::value(200, &json!({"devices": [{"name": "cuda:0 (mock)", "type": "cuda"}]})),
        )
        .on_post("/jobs", MockReply::json(200, r#"{"job_id": "demo-1"}"#))
        .on_get("/jobs/queue", MockReply::value(200, &json!({"pending": ["demo-1"]})))
        .on_get("/jobs/queue", MockReply::value(200, &json!({"pending": ["demo-1"]})))
        .on_get("/jobs/queue", MockReply::value(200, &json!({"running": ["demo-1"]})));
    for _ in 0..4 {
        mock.push("GET", "/jobs/demo-1/history".into(), MockReply::json(200, "{}"));
    }
    mock.push(
        "GET",
        "/jobs/demo-1/history".into(),
        MockReply::value(
            200,
            &json!({"demo-1": {"outputs": {"7": {"images": [
                {"filename": "studio_00001_.png", "subfolder": "", "type": "output"}
            ]}}}}),
        ),
    );

    let config = ConnectionConfig::new("http://mock.local:8188");
    let orchestrator = Orchestrator::builder(config.clone())
        .transport(Arc::new(mock))
        .poll_config(PollConfig::default().with_interval(Duration::from_millis(100)))
        .event_handler(Arc::new(FnEventHandler(|event: Event| {
            if let Event::JobFinished { job_id, state, elapsed_ms } = event {
                println!("[{}] {} after {} ms", job_id, state, elapsed_ms);
            }
        })))
        .build();

    let request = GenerationRequest::image("txt2img", "a lighthouse at dusk, oil painting")
        .with_negative_prompt("blurry")
        .with_dimensions(Dimensions::new(768, 512))
        .with_seed(42);

    let mut task = orchestrator.generate(&request).await?;
    let mut progress = Box::pin(task.progress_stream());
    let printer = tokio::spawn(async move {
        while let Some(p) = progress.next().await {
            println!("  {:?} {:>3}%  {}", p.phase, p.percent, p.message);
        }
    });

    let outcome = task.wait().await?;
    printer.await?;

    println!("Output: {}", outcome.output.filename);
    println!("View URL: {}", outcome.output.view_url(&config)?);
    println!("Budget: {} ms", outcome.final_budget.as_millis());
    Ok(())
}
