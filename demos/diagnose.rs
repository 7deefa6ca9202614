//! Example: "test connection" against a backend.
//!
//! Run with: `cargo run --example diagnose -- http://127.0.0.1:8188 [user] [password]`

use gen_orchestrator::{ConnectionConfig, Endpoints, Orchestrator};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let url = args
        .first()
        .cloned()
        .unwrap_or_else(|| "http://127.0.0.1:8188".to_string());

    let mut config = ConnectionConfig::new(url).with_endpoints(Endpoints::comfyui());
    if let (Some(user), Some(password)) = (args.get(1), args.get(2)) {
        config = config.with_basic_auth(user.as_str(), password.as_str());
    }

    let report = Orchestrator::builder(config).build().diagnose().await;

    println!("URL valid:       {}", report.url_valid);
    println!("Reachable:       {}", report.server_reachable);
    println!("Authenticated:   {}", report.authentication_valid);
    for (name, ok) in &report.endpoints {
        println!("Endpoint {:<8} {}", name, if *ok { "ok" } else { "unavailable" });
    }
    if let Some(info) = &report.server_info {
        println!("Device:          {}", info.primary_device().unwrap_or("unknown"));
    }
    for suggestion in &report.suggestions {
        println!("-> {}", suggestion);
    }

    println!("\n{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
