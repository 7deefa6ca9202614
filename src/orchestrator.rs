//! The orchestration service: one entry point wiring every component.
//!
//! [`Orchestrator`] is constructed once with its collaborators injected
//! (config provider, transport, graph strategies, poll tuning, event
//! handler) and shared across every job it runs. It holds no per-job state;
//! each tracked job owns its own budget and lifecycle on its own task.

use crate::budget::Budget;
use crate::config::{ConfigProvider, ConnectionConfig};
use crate::diagnostics::{self, DiagnosticsReport};
use crate::error::Result;
use crate::events::{emit, Event, EventHandler};
use crate::graph::{GraphBuilder, GraphStrategy, WorkflowGraph};
use crate::job::{JobHandle, JobOutcome};
use crate::poll::{JobTask, JobTracker, PollConfig, PollSignals};
use crate::probe::{self, ServerInfo};
use crate::request::GenerationRequest;
use crate::submit;
use crate::transport::{HttpTransport, Transport};
use crate::validate;
use std::sync::Arc;
use tracing::{debug, warn};

/// Generation job orchestrator.
///
/// # Example
///
/// ```no_run
/// use gen_orchestrator::{ConnectionConfig, GenerationRequest, Orchestrator};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Orchestrator::builder(ConnectionConfig::new("http://127.0.0.1:8188"))
///         .build();
///
///     let task = orchestrator
///         .generate(&GenerationRequest::image("txt2img", "a lighthouse at dusk"))
///         .await?;
///     let outcome = task.wait().await?;
///     println!("{}", outcome.output.filename);
///     Ok(())
/// }
/// ```
pub struct Orchestrator {
    provider: Arc<dyn ConfigProvider>,
    transport: Arc<dyn Transport>,
    graphs: GraphBuilder,
    poll: PollConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Orchestrator {
    /// Start building an orchestrator around a config provider.
    pub fn builder(provider: impl ConfigProvider + 'static) -> OrchestratorBuilder {
        OrchestratorBuilder {
            provider: Arc::new(provider),
            transport: None,
            graphs: None,
            extra_strategies: Vec::new(),
            poll: None,
            event_handler: None,
        }
    }

    /// Read the connection config for one attempt.
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        Ok(self.provider.connection_config()?)
    }

    /// Static checks on the current config. No I/O.
    pub fn validate(&self) -> Result<()> {
        validate::validate(&self.connection_config()?)
    }

    /// Validate, then probe the health endpoint.
    pub async fn probe(&self) -> Result<ServerInfo> {
        let config = self.connection_config()?;
        probe::probe(self.transport.as_ref(), &config, config.timeouts.probe()).await
    }

    /// Build the workflow graph for `request` without submitting it.
    pub fn build_graph(&self, request: &GenerationRequest) -> Result<WorkflowGraph> {
        self.graphs.build(request)
    }

    /// Registered template names.
    pub fn templates(&self) -> Vec<&str> {
        self.graphs.templates()
    }

    /// Validate, probe, build, and submit. The returned handle is not yet
    /// tracked; pass it to [`track`](Self::track).
    pub async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle> {
        let config = self.connection_config()?;
        self.submit_with(&config, request).await
    }

    /// Poll an already-submitted job on its own task.
    pub fn track(&self, handle: JobHandle) -> Result<JobTask> {
        let config = self.connection_config()?;
        Ok(self.tracker(config).spawn(handle))
    }

    /// Submit, then track. One config read covers both.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<JobTask> {
        let config = self.connection_config()?;
        let handle = self.submit_with(&config, request).await?;
        Ok(self.tracker(config).spawn(handle))
    }

    /// Drive the poll loop on the caller's task.
    pub async fn poll_until_done(
        &self,
        handle: &JobHandle,
        signals: &PollSignals,
    ) -> Result<JobOutcome> {
        let config = self.connection_config()?;
        self.tracker(config).poll_until_done(handle, signals).await
    }

    /// Run the troubleshooting checks. Never fails; a config that cannot be
    /// read is reported as an invalid URL.
    pub async fn diagnose(&self) -> DiagnosticsReport {
        match self.connection_config() {
            Ok(config) => diagnostics::diagnose(self.transport.as_ref(), &config).await,
            Err(e) => {
                warn!(error = %e, "diagnostics: config unavailable");
                DiagnosticsReport {
                    suggestions: vec![format!("fix the connection settings ({})", e)],
                    ..Default::default()
                }
            }
        }
    }

    async fn submit_with(
        &self,
        config: &ConnectionConfig,
        request: &GenerationRequest,
    ) -> Result<JobHandle> {
        validate::validate(config)?;
        let graph = self.graphs.build(request)?;

        let info = probe::probe(self.transport.as_ref(), config, config.timeouts.probe()).await?;
        debug!(device = info.primary_device().unwrap_or("<none>"), "backend ready");

        let budget = Budget::for_request(request);
        let handle = submit::submit(self.transport.as_ref(), config, &graph, budget).await?;

        emit(
            &self.event_handler,
            Event::JobSubmitted {
                job_id: handle.job_id().to_string(),
                budget_ms: budget.as_millis(),
            },
        );
        Ok(handle)
    }

    fn tracker(&self, config: ConnectionConfig) -> JobTracker {
        JobTracker::new(Arc::clone(&self.transport), config)
            .with_poll_config(self.poll.clone())
            .with_event_handler(self.event_handler.clone())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("transport", &self.transport.name())
            .field("graphs", &self.graphs)
            .field("poll", &self.poll)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    provider: Arc<dyn ConfigProvider>,
    transport: Option<Arc<dyn Transport>>,
    graphs: Option<GraphBuilder>,
    extra_strategies: Vec<Arc<dyn GraphStrategy>>,
    poll: Option<PollConfig>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl OrchestratorBuilder {
    /// Set the transport. Default: [`HttpTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use [`HttpTransport`] over an existing client.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.transport = Some(Arc::new(HttpTransport::with_client(client)));
        self
    }

    /// Replace the strategy registry. Default: [`GraphBuilder::default`].
    pub fn graph_builder(mut self, graphs: GraphBuilder) -> Self {
        self.graphs = Some(graphs);
        self
    }

    /// Register one more strategy on top of the registry.
    pub fn strategy(mut self, strategy: Arc<dyn GraphStrategy>) -> Self {
        self.extra_strategies.push(strategy);
        self
    }

    /// Set poll tuning. Default: [`PollConfig::default`].
    pub fn poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = Some(poll);
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn build(self) -> Orchestrator {
        let mut graphs = self.graphs.unwrap_or_default();
        for strategy in self.extra_strategies {
            graphs.register(strategy);
        }
        Orchestrator {
            provider: self.provider,
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(HttpTransport::new())),
            graphs,
            poll: self.poll.unwrap_or_default(),
            event_handler: self.event_handler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FnConfigProvider;
    use crate::error::OrchestratorError;
    use crate::events::FnEventHandler;
    use crate::job::JobState;
    use crate::transport::{MockReply, MockTransport};
    use serde_json::json;
    use std::sync::Mutex;

    const STATS: &str = r#"{"system": {}, "devices": [{"name": "cuda:0", "type": "cuda"}]}"#;

    fn backend() -> MockTransport {
        MockTransport::new()
            .on_get("/health", MockReply::json(200, STATS))
            .on_post("/jobs", MockReply::json(200, r#"{"job_id": "j-1"}"#))
            .on_get("/jobs/j-1/history", MockReply::json(200, "{}"))
            .on_get(
                "/jobs/j-1/history",
                MockReply::value(
                    200,
                    &json!({"j-1": {"outputs": {"7": {"images": [{"filename": "j-1.png"}]}}}}),
                ),
            )
            .on_get("/jobs/queue", MockReply::value(200, &json!({"running": ["j-1"]})))
    }

    fn orchestrator(mock: Arc<MockTransport>) -> Orchestrator {
        Orchestrator::builder(ConnectionConfig::new("http://gpu:8188"))
            .transport(mock)
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_end_to_end() {
        let mock = Arc::new(backend());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let orchestrator = Orchestrator::builder(ConnectionConfig::new("http://gpu:8188"))
            .transport(mock.clone())
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                sink.lock().unwrap().push(e)
            })))
            .build();

        let request = GenerationRequest::image("txt2img", "a lighthouse");
        let task = orchestrator.generate(&request).await.unwrap();
        assert_eq!(task.job_id(), "j-1");
        let outcome = task.wait().await.unwrap();

        assert_eq!(outcome.output.filename, "j-1.png");
        assert_eq!(outcome.final_budget.as_millis(), 600_000);

        let requests = mock.requests();
        assert_eq!(requests[0].path, "/health");
        assert_eq!(requests[1].method, "POST");

        let events = seen.lock().unwrap();
        assert!(matches!(events[0], Event::JobSubmitted { budget_ms: 600_000, .. }));
        assert!(matches!(
            events.last(),
            Some(Event::JobFinished { state: JobState::Completed, .. })
        ));
    }

    #[tokio::test]
    async fn test_probe_failure_blocks_submission() {
        let mock = Arc::new(MockTransport::new().on_get("/health", MockReply::json(401, "")));
        let err = orchestrator(mock.clone())
            .submit(&GenerationRequest::image("txt2img", "fox"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Auth { status: 401 }));
        assert_eq!(mock.count_for("/jobs"), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_makes_no_request() {
        let mock = Arc::new(backend());
        let orchestrator = Orchestrator::builder(ConnectionConfig::new("gpu:8188"))
            .transport(mock.clone())
            .build();
        assert!(orchestrator.validate().is_err());
        let err = orchestrator
            .submit(&GenerationRequest::image("txt2img", "fox"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_template_never_posts() {
        let mock = Arc::new(backend());
        let err = orchestrator(mock.clone())
            .submit(&GenerationRequest::image("inpaint", "fox"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTemplate(ref t) if t == "inpaint"));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_template_reported_even_when_backend_is_down() {
        let mock = Arc::new(MockTransport::new().on_get("/health", MockReply::Unreachable));
        let err = orchestrator(mock.clone())
            .submit(&GenerationRequest::image("inpaint", "fox"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTemplate(ref t) if t == "inpaint"));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_surfaces_as_config() {
        let provider = FnConfigProvider(|| -> anyhow::Result<ConnectionConfig> {
            Err(anyhow::anyhow!("no settings saved"))
        });
        let orchestrator = Orchestrator::builder(provider)
            .transport(Arc::new(MockTransport::new()))
            .build();
        let err = orchestrator.probe().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(ref m) if m.contains("no settings")));

        let report = orchestrator.diagnose().await;
        assert!(!report.url_valid);
        assert_eq!(report.suggestions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_and_cancel() {
        let mock = Arc::new(
            MockTransport::new()
                .on_get("/jobs/j-2/history", MockReply::json(200, "{}"))
                .on_get("/jobs/queue", MockReply::value(200, &json!({"pending": ["j-2"]}))),
        );
        let orchestrator = orchestrator(mock);
        let task = orchestrator
            .track(JobHandle::new("j-2", Budget::from_millis(60_000)))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        task.cancel();
        let err = task.wait().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));
    }

    #[test]
    fn test_builder_registers_extra_strategy() {
        struct Upscale;
        impl GraphStrategy for Upscale {
            fn name(&self) -> &str {
                "upscale"
            }
            fn build(&self, _: &GenerationRequest, _: u64) -> Result<WorkflowGraph> {
                Ok(WorkflowGraph::new())
            }
        }

        let orchestrator = Orchestrator::builder(ConnectionConfig::new("http://gpu:8188"))
            .strategy(Arc::new(Upscale))
            .build();
        assert_eq!(
            orchestrator.templates(),
            vec!["img2img", "txt2img", "txt2video", "upscale"]
        );
        assert!(orchestrator
            .build_graph(&GenerationRequest::image("upscale", "x"))
            .unwrap()
            .is_empty());
    }
}
