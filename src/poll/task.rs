//! Handle to a job being polled on a background task.

use super::PollSignals;
use crate::error::{OrchestratorError, Result};
use crate::job::{JobOutcome, JobState, ProgressEvent};
use futures::Stream;
use std::sync::{atomic::AtomicBool, Arc};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// A job whose poll loop runs on its own tokio task.
///
/// Dropping a `JobTask` does not stop the loop; call [`cancel`](Self::cancel)
/// for that.
///
/// # Example
///
/// ```no_run
/// # async fn run(task: gen_orchestrator::JobTask) -> gen_orchestrator::Result<()> {
/// use futures::StreamExt;
///
/// let mut task = task;
/// let mut progress = Box::pin(task.progress_stream());
/// tokio::spawn(async move {
///     while let Some(p) = progress.next().await {
///         println!("{}%", p.percent);
///     }
/// });
/// let outcome = task.wait().await?;
/// println!("{}", outcome.output.filename);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct JobTask {
    job_id: String,
    signals: PollSignals,
    first_rx: Option<broadcast::Receiver<ProgressEvent>>,
    join: JoinHandle<Result<JobOutcome>>,
}

impl JobTask {
    pub(crate) fn new(
        job_id: String,
        signals: PollSignals,
        first_rx: broadcast::Receiver<ProgressEvent>,
        join: JoinHandle<Result<JobOutcome>>,
    ) -> Self {
        Self {
            job_id,
            signals,
            first_rx: Some(first_rx),
            join,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Request cancellation. The loop abandons any in-flight read or pause
    /// and [`wait`](Self::wait) returns [`OrchestratorError::Cancelled`].
    pub fn cancel(&self) {
        self.signals.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals.is_cancelled()
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.signals.cancel_flag()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.signals.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.signals.watch_state()
    }

    /// A raw receiver for progress published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.signals.subscribe()
    }

    /// Progress as a stream.
    ///
    /// The first call replays everything since the job was spawned; later
    /// calls start from the present. The stream ends once the job reaches a
    /// terminal state and every value published before it was yielded.
    pub fn progress_stream(&mut self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let rx = self
            .first_rx
            .take()
            .unwrap_or_else(|| self.signals.subscribe());
        receiver_stream(self.job_id.clone(), rx, self.signals.watch_state())
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> Result<JobOutcome> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(OrchestratorError::Cancelled),
        }
    }
}

/// Ends when the broadcast closes or, failing that, once the job reaches a
/// terminal state and the buffered values have been drained. The second
/// rule covers callers still holding a [`PollSignals`] clone.
fn receiver_stream(
    job_id: String,
    rx: broadcast::Receiver<ProgressEvent>,
    state: watch::Receiver<JobState>,
) -> impl Stream<Item = ProgressEvent> + Send + 'static {
    let init = StreamState {
        job_id,
        rx,
        state,
        terminal: false,
    };
    futures::stream::unfold(init, |mut st| async move {
        loop {
            if st.terminal {
                match st.rx.try_recv() {
                    Ok(progress) => return Some((progress, st)),
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(job_id = %st.job_id, skipped, "progress subscriber lagged");
                    }
                    Err(_) => return None,
                }
                continue;
            }

            tokio::select! {
                biased;
                received = st.rx.recv() => match received {
                    Ok(progress) => return Some((progress, st)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(job_id = %st.job_id, skipped, "progress subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                },
                _ = reached_terminal(&mut st.state) => st.terminal = true,
            }
        }
    })
}

struct StreamState {
    job_id: String,
    rx: broadcast::Receiver<ProgressEvent>,
    state: watch::Receiver<JobState>,
    terminal: bool,
}

/// Resolves once the state is terminal or its sender is gone.
async fn reached_terminal(state: &mut watch::Receiver<JobState>) {
    let _ = state.wait_for(|s| s.is_terminal()).await.map(|_| ());
}
