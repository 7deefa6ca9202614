//! Job handle, lifecycle state, progress values, and outputs.

use crate::budget::Budget;
use crate::config::ConnectionConfig;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Lifecycle of one job.
///
/// ```text
/// Queued ──► Running ──► Completed | Failed | TimedOut | Cancelled
///    └──────────────────► (terminal states reachable from either)
/// ```
///
/// Transitions only move forward; a terminal state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Queued | JobState::Running)
    }

    fn rank(self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Running => 1,
            _ => 2,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward step.
    /// Staying put in a non-terminal state is allowed.
    pub fn can_transition_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }

    /// Move to `next` if legal; returns whether the state changed.
    pub fn transition(&mut self, next: JobState) -> bool {
        if *self == next || !self.can_transition_to(next) {
            return false;
        }
        *self = next;
        true
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A submitted job. Created once per submission; only the poll loop
/// touches its budget.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job_id: String,
    budget: Budget,
    submitted_at: Instant,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, budget: Budget) -> Self {
        Self {
            job_id: job_id.into(),
            budget,
            submitted_at: Instant::now(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}

/// Coarse phase reported alongside progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Queued,
    Running,
    Complete,
}

/// One progress observation. `percent` is non-decreasing within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub percent: u8,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(phase: Phase, percent: u8, message: impl Into<String>) -> Self {
        Self {
            phase,
            percent: percent.min(100),
            message: message.into(),
        }
    }
}

/// A generated artifact on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    /// Graph node that produced it.
    pub node_id: String,
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage bucket the backend filed it under (`output`, `temp`, ...).
    #[serde(default = "default_media_type")]
    pub media_type: String,
}

fn default_media_type() -> String {
    "output".to_string()
}

impl OutputRef {
    /// Download URL on the backend's view endpoint.
    pub fn view_url(&self, config: &ConnectionConfig) -> crate::error::Result<String> {
        let base = config.url_for(&config.endpoints.view);
        let mut url = Url::parse(&base)
            .map_err(|e| crate::OrchestratorError::Config(format!("bad view URL {}: {}", base, e)))?;
        url.query_pairs_mut()
            .append_pair("filename", &self.filename)
            .append_pair("subfolder", &self.subfolder)
            .append_pair("type", &self.media_type);
        Ok(url.into())
    }
}

/// Successful terminal result of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    /// First artifact found; the one UIs display.
    pub output: OutputRef,
    /// Every artifact the history listed.
    pub all_outputs: Vec<OutputRef>,
    /// Budget in force when the job finished.
    pub final_budget: Budget,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut s = JobState::Queued;
        assert!(s.transition(JobState::Running));
        assert!(!s.transition(JobState::Queued));
        assert_eq!(s, JobState::Running);
        assert!(s.transition(JobState::Completed));
        assert!(s.is_terminal());
    }

    #[test]
    fn test_terminal_is_final() {
        for terminal in [
            JobState::Completed,
            JobState::Failed,
            JobState::TimedOut,
            JobState::Cancelled,
        ] {
            let mut s = terminal;
            for next in [JobState::Queued, JobState::Running, JobState::Completed, JobState::Failed] {
                assert!(!s.transition(next));
            }
            assert_eq!(s, terminal);
        }
    }

    #[test]
    fn test_queued_may_skip_running() {
        let mut s = JobState::Queued;
        assert!(s.transition(JobState::Completed));
    }

    #[test]
    fn test_progress_percent_clamped() {
        assert_eq!(ProgressEvent::new(Phase::Running, 250, "").percent, 100);
    }

    #[test]
    fn test_view_url_escapes() {
        let config = ConnectionConfig::new("http://gpu:8188/");
        let out = OutputRef {
            node_id: "7".into(),
            filename: "studio 00001_.png".into(),
            subfolder: "".into(),
            media_type: "output".into(),
        };
        assert_eq!(
            out.view_url(&config).unwrap(),
            "http://gpu:8188/view?filename=studio+00001_.png&subfolder=&type=output"
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(JobState::TimedOut.to_string(), "timed_out");
    }
}
