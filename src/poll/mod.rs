//! Poll loop: drives one submitted job to a terminal state.
//!
//! Each cycle, in order:
//!
//! 1. cancelled? → [`JobState::Cancelled`]
//! 2. budget spent? → [`JobState::TimedOut`]
//! 3. history lists an artifact → [`JobState::Completed`]; an execution
//!    error → [`JobState::Failed`]
//! 4. queue lists the job as running → progress 50, maybe extend budget;
//!    as pending → progress 10
//! 5. sleep one interval
//!
//! Cancellation is checked before the budget, so a cancel that races a
//! timeout always reports `Cancelled`. Reads and the pause are raced
//! against both: a cancel or a spent budget abandons whatever is in flight
//! and goes straight back to steps 1 and 2. Each read's deadline is capped
//! at the budget left. Failed reads in steps 3 and 4 are logged and
//! skipped; only the outcomes above end the loop.

pub mod status;
pub mod task;

pub use status::{parse_history, parse_queue, HistoryStatus, QueuePosition};
pub use task::JobTask;

use crate::budget::AdaptiveBudget;
use crate::config::ConnectionConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::job::{JobHandle, JobOutcome, JobState, Phase, ProgressEvent};
use crate::probe::request_endpoint;
use crate::transport::Transport;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// Buffered progress values per job before slow subscribers lag.
const PROGRESS_CAPACITY: usize = 64;

/// Tuning for the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between cycles. Default: 1s.
    pub interval: Duration,
    /// Progress reported while the job waits in the queue. Default: 10.
    pub pending_percent: u8,
    /// Progress reported while the job executes. Default: 50.
    pub running_percent: u8,
    /// Budget added per extension. Default: 30s.
    pub extension_step: Duration,
    /// Minimum time between extensions. Default: 5s.
    pub min_extension_gap: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            pending_percent: 10,
            running_percent: 50,
            extension_step: Duration::from_secs(30),
            min_extension_gap: Duration::from_secs(5),
        }
    }
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_extension_step(mut self, step: Duration) -> Self {
        self.extension_step = step;
        self
    }

    pub fn with_min_extension_gap(mut self, gap: Duration) -> Self {
        self.min_extension_gap = gap;
        self
    }

    /// Progress markers for the pending and running phases.
    pub fn with_markers(mut self, pending: u8, running: u8) -> Self {
        self.pending_percent = pending.min(100);
        self.running_percent = running.min(100);
        self
    }
}

/// Per-job channels shared between the poll loop and its observers.
///
/// Cloning shares the same job: a cancel through any clone is seen by the
/// loop, and every clone subscribes to the same progress broadcast.
#[derive(Debug, Clone)]
pub struct PollSignals {
    cancel: Arc<AtomicBool>,
    wake: Arc<Notify>,
    progress: broadcast::Sender<ProgressEvent>,
    state: Arc<watch::Sender<JobState>>,
}

impl Default for PollSignals {
    fn default() -> Self {
        Self::with_cancel(Arc::new(AtomicBool::new(false)))
    }
}

impl PollSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing cancellation flag, e.g. one shared by a batch.
    pub fn with_cancel(cancel: Arc<AtomicBool>) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        let (state, _) = watch::channel(JobState::Queued);
        Self {
            cancel,
            wake: Arc::new(Notify::new()),
            progress,
            state: Arc::new(state),
        }
    }

    /// Request cancellation. Interrupts an in-flight read or pause.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.wake.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// The shared flag. Setting it directly skips the wake-up, so the loop
    /// notices within one poll interval instead of immediately.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Resolves once cancellation is requested. A flag set behind our back
    /// is picked up on the next `recheck` tick.
    async fn cancelled(&self, recheck: Duration) {
        // A zero interval would spin without yielding.
        let recheck = recheck.max(Duration::from_millis(1));
        loop {
            // Registered before the check so a concurrent cancel() is not lost.
            let notified = self.wake.notified();
            if self.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = sleep(recheck) => {}
            }
        }
    }

    /// Receive progress values published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: JobState) -> bool {
        self.state.send_if_modified(|s| s.transition(next))
    }
}

/// Publishes progress for one job, dropping values that would go backwards.
struct Reporter<'a> {
    job_id: &'a str,
    signals: &'a PollSignals,
    handler: &'a Option<Arc<dyn EventHandler>>,
    last_percent: Option<u8>,
}

impl Reporter<'_> {
    fn publish(&mut self, phase: Phase, percent: u8, message: &str) {
        if self.last_percent.is_some_and(|last| percent <= last) {
            return;
        }
        self.last_percent = Some(percent);
        let progress = ProgressEvent::new(phase, percent, message);
        debug!(job_id = self.job_id, percent, ?phase, "progress");
        // No subscribers is fine.
        let _ = self.signals.progress.send(progress.clone());
        emit(
            self.handler,
            Event::Progress {
                job_id: self.job_id.to_string(),
                progress,
            },
        );
    }
}

/// Tracks submitted jobs against one backend.
///
/// Cheap to clone; every job spawned from it shares the transport.
#[derive(Clone)]
pub struct JobTracker {
    transport: Arc<dyn Transport>,
    config: Arc<ConnectionConfig>,
    poll: PollConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker")
            .field("transport", &self.transport.name())
            .field("server_url", &self.config.server_url)
            .field("poll", &self.poll)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

impl JobTracker {
    pub fn new(transport: Arc<dyn Transport>, config: impl Into<Arc<ConnectionConfig>>) -> Self {
        Self {
            transport,
            config: config.into(),
            poll: PollConfig::default(),
            event_handler: None,
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_event_handler(mut self, handler: Option<Arc<dyn EventHandler>>) -> Self {
        self.event_handler = handler;
        self
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    /// Start polling `handle` on a background task.
    pub fn spawn(&self, handle: JobHandle) -> JobTask {
        self.spawn_with(handle, PollSignals::new())
    }

    /// Like [`spawn`](Self::spawn), with caller-supplied signals.
    pub fn spawn_with(&self, handle: JobHandle, signals: PollSignals) -> JobTask {
        let first_rx = signals.subscribe();
        let tracker = self.clone();
        let loop_signals = signals.clone();
        let job_id = handle.job_id().to_string();
        let join =
            tokio::spawn(async move { tracker.poll_until_done(&handle, &loop_signals).await });
        JobTask::new(job_id, signals, first_rx, join)
    }

    /// Poll until the job completes, fails, times out, or is cancelled.
    ///
    /// The budget is measured from [`JobHandle::submitted_at`] and may be
    /// extended while the job shows progress. Progress goes to every
    /// subscriber of `signals`.
    pub async fn poll_until_done(
        &self,
        handle: &JobHandle,
        signals: &PollSignals,
    ) -> Result<JobOutcome> {
        let job_id = handle.job_id();
        let started = handle.submitted_at();
        let history_path = self.config.endpoints.history_for(job_id);
        let queue_path = self.config.endpoints.queue.as_str();
        let mut adaptive = AdaptiveBudget::new(
            handle.budget(),
            self.poll.extension_step,
            self.poll.min_extension_gap,
            started,
        );
        let mut reporter = Reporter {
            job_id,
            signals,
            handler: &self.event_handler,
            last_percent: None,
        };

        reporter.publish(Phase::Queued, 0, "submitted");

        loop {
            if signals.is_cancelled() {
                self.finish(job_id, signals, JobState::Cancelled, started);
                return Err(OrchestratorError::Cancelled);
            }

            let elapsed = started.elapsed();
            if adaptive.budget().is_exhausted(elapsed) {
                let elapsed_ms = millis(elapsed);
                warn!(
                    job_id,
                    elapsed_ms,
                    budget_ms = adaptive.budget().as_millis(),
                    extensions = adaptive.extensions(),
                    "job budget exhausted"
                );
                self.finish(job_id, signals, JobState::TimedOut, started);
                return Err(OrchestratorError::Timeout { elapsed_ms });
            }

            let deadline = self.read_deadline(&adaptive, started);
            let history = self.read_history(&history_path, job_id, deadline);
            let Some(history) = self.interruptible(signals, &adaptive, started, history).await
            else {
                continue;
            };
            match history {
                Ok(HistoryStatus::Completed { primary, all }) => {
                    reporter.publish(Phase::Complete, 100, "complete");
                    let elapsed_ms = self.finish(job_id, signals, JobState::Completed, started);
                    return Ok(JobOutcome {
                        job_id: job_id.to_string(),
                        output: primary,
                        all_outputs: all,
                        final_budget: adaptive.budget(),
                        elapsed_ms,
                    });
                }
                Ok(HistoryStatus::Failed(messages)) => {
                    self.finish(job_id, signals, JobState::Failed, started);
                    return Err(OrchestratorError::JobFailed {
                        job_id: job_id.to_string(),
                        messages,
                    });
                }
                Ok(HistoryStatus::Pending) => {}
                Err(e) => self.hiccup(job_id, "history", &e),
            }

            let deadline = self.read_deadline(&adaptive, started);
            let queue = self.read_queue(queue_path, job_id, deadline);
            let Some(queue) = self.interruptible(signals, &adaptive, started, queue).await else {
                continue;
            };
            match queue {
                Ok(QueuePosition::Running) => {
                    signals.set_state(JobState::Running);
                    let percent = self.poll.running_percent;
                    reporter.publish(Phase::Running, percent, "generating");
                    if adaptive.observe(percent, Instant::now()) {
                        let budget_ms = adaptive.budget().as_millis();
                        debug!(job_id, budget_ms, "budget extended");
                        emit(
                            &self.event_handler,
                            Event::BudgetExtended {
                                job_id: job_id.to_string(),
                                budget_ms,
                            },
                        );
                    }
                }
                Ok(QueuePosition::Pending) => {
                    reporter.publish(Phase::Queued, self.poll.pending_percent, "waiting in queue");
                }
                Ok(QueuePosition::Absent) => {
                    debug!(job_id, "job not listed in queue");
                }
                Err(e) => self.hiccup(job_id, "queue", &e),
            }

            self.interruptible(signals, &adaptive, started, sleep(self.poll.interval))
                .await;
        }
    }

    /// Run `fut` unless cancellation or the end of the budget comes first,
    /// in which case `None` sends the loop back to its checks.
    async fn interruptible<F: Future>(
        &self,
        signals: &PollSignals,
        adaptive: &AdaptiveBudget,
        started: Instant,
        fut: F,
    ) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = signals.cancelled(self.poll.interval) => None,
            _ = sleep_until(budget_deadline(started, adaptive)) => None,
            out = fut => Some(out),
        }
    }

    /// The per-request timeout, capped at what is left of the budget.
    fn read_deadline(&self, adaptive: &AdaptiveBudget, started: Instant) -> Duration {
        let left = adaptive.budget().as_duration().saturating_sub(started.elapsed());
        self.config.timeouts.request().min(left)
    }

    async fn read_history(
        &self,
        path: &str,
        job_id: &str,
        deadline: Duration,
    ) -> Result<HistoryStatus> {
        let body = self.read_json(path, deadline).await?;
        parse_history(&body, job_id)
    }

    async fn read_queue(
        &self,
        path: &str,
        job_id: &str,
        deadline: Duration,
    ) -> Result<QueuePosition> {
        let body = self.read_json(path, deadline).await?;
        parse_queue(&body, job_id)
    }

    async fn read_json(&self, path: &str, deadline: Duration) -> Result<Value> {
        let resp = request_endpoint(self.transport.as_ref(), &self.config, path, deadline).await?;
        resp.json().map_err(|e| {
            OrchestratorError::MalformedResponse(format!("{} returned invalid JSON: {}", path, e))
        })
    }

    fn hiccup(&self, job_id: &str, source: &'static str, err: &OrchestratorError) {
        warn!(job_id, source, error = %err, "poll read failed; continuing");
        emit(
            &self.event_handler,
            Event::PollHiccup {
                job_id: job_id.to_string(),
                source,
                reason: err.to_string(),
            },
        );
    }

    /// Record a terminal state; returns elapsed milliseconds.
    fn finish(&self, job_id: &str, signals: &PollSignals, state: JobState, started: Instant) -> u64 {
        let elapsed_ms = millis(started.elapsed());
        signals.set_state(state);
        info!(job_id, %state, elapsed_ms, "job finished");
        emit(
            &self.event_handler,
            Event::JobFinished {
                job_id: job_id.to_string(),
                state,
                elapsed_ms,
            },
        );
        elapsed_ms
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// When the current budget runs out. Budgets too large for the clock are
/// treated as a year out.
fn budget_deadline(started: Instant, adaptive: &AdaptiveBudget) -> Instant {
    started
        .checked_add(adaptive.budget().as_duration())
        .unwrap_or_else(|| Instant::now() + Duration::from_secs(365 * 24 * 60 * 60))
}
