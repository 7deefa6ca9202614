//! Event system for job lifecycle hooks.
//!
//! Provides an optional, non-intrusive way to observe orchestration.
//! Progress values also flow through each job's broadcast channel (see
//! [`JobTask`](crate::poll::JobTask)); handlers registered here additionally
//! see submission, budget extensions, swallowed poll failures, and terminal
//! states across every job.

use crate::job::{JobState, ProgressEvent};
use std::sync::Arc;

/// Events emitted during orchestration.
#[derive(Debug, Clone)]
pub enum Event {
    /// A job was accepted by the backend.
    JobSubmitted {
        job_id: String,
        /// Initial budget in milliseconds.
        budget_ms: u64,
    },
    /// A progress value was published for a job.
    Progress {
        job_id: String,
        progress: ProgressEvent,
    },
    /// Evidence of progress bought the job more time.
    BudgetExtended {
        job_id: String,
        /// Budget after the extension, in milliseconds.
        budget_ms: u64,
    },
    /// One poll read failed and was ignored.
    PollHiccup {
        job_id: String,
        /// Which read failed (`"history"` or `"queue"`).
        source: &'static str,
        reason: String,
    },
    /// The job reached a terminal state.
    JobFinished {
        job_id: String,
        state: JobState,
        elapsed_ms: u64,
    },
}

/// Handler for orchestration events.
///
/// This is entirely optional -- orchestration works without an event handler.
///
/// # Example
///
/// ```
/// use gen_orchestrator::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::Progress { job_id, progress } => {
///                 println!("[{}] {}%", job_id, progress.percent)
///             }
///             Event::JobFinished { job_id, state, .. } => println!("[{}] {}", job_id, state),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when the orchestrator emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use gen_orchestrator::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::BudgetExtended { budget_ms, .. } = event {
///         println!("budget now {} ms", budget_ms);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
