//! Job time budget and the adaptive extension rule.
//!
//! A [`Budget`] is an elapsed-time deadline measured from job submission.
//! It only grows. [`AdaptiveBudget`] wraps it with the progress heuristic
//! that decides when to grow it.

use crate::request::{GenerationKind, GenerationRequest};
use std::time::Duration;
use tokio::time::Instant;

const MINUTE_MS: u64 = 60_000;

/// Base budget for jobs of at most 1 MP.
pub const SMALL_JOB_MS: u64 = 5 * MINUTE_MS;
/// Base budget for jobs of at most 2 MP.
pub const MEDIUM_JOB_MS: u64 = 8 * MINUTE_MS;
/// Base budget for larger jobs, and for jobs whose size is unknown.
pub const LARGE_JOB_MS: u64 = 10 * MINUTE_MS;

/// Elapsed-time deadline for one job. Never shrinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    elapsed_deadline_ms: u64,
}

impl Budget {
    pub fn from_millis(ms: u64) -> Self {
        Self {
            elapsed_deadline_ms: ms,
        }
    }

    /// Initial budget for a request.
    ///
    /// Image jobs with known dimensions are weighed in megapixels:
    /// ≤1 MP → 5 min, ≤2 MP → 8 min, larger → 10 min. Everything else gets
    /// the 10 min default, as do dimensions with a zero side.
    pub fn for_request(request: &GenerationRequest) -> Self {
        match (request.kind, request.dimensions) {
            (GenerationKind::Image, Some(dims)) => {
                Self::for_megapixels(Some(dims.megapixels()).filter(|mp| *mp > 0.0))
            }
            _ => Self::for_megapixels(None),
        }
    }

    /// Base budget for a job weight in megapixels.
    pub fn for_megapixels(megapixels: Option<f64>) -> Self {
        let ms = match megapixels {
            Some(mp) if mp <= 1.0 => SMALL_JOB_MS,
            Some(mp) if mp <= 2.0 => MEDIUM_JOB_MS,
            _ => LARGE_JOB_MS,
        };
        Self::from_millis(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.elapsed_deadline_ms
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.elapsed_deadline_ms)
    }

    /// Grow the deadline. Saturates instead of wrapping.
    pub fn extend(&mut self, by: Duration) {
        let by_ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.elapsed_deadline_ms = self.elapsed_deadline_ms.saturating_add(by_ms);
    }

    /// Whether `elapsed` has used up the budget.
    pub fn is_exhausted(&self, elapsed: Duration) -> bool {
        elapsed >= self.as_duration()
    }
}

/// Budget plus the bookkeeping for the progress-based extension rule.
///
/// An extension fires only when the observed progress is higher than the
/// last observed value and at least `min_gap` has passed since the last
/// extension (or since tracking began).
#[derive(Debug, Clone)]
pub struct AdaptiveBudget {
    budget: Budget,
    step: Duration,
    min_gap: Duration,
    last_progress: u8,
    last_extension: Instant,
    extensions: u32,
}

impl AdaptiveBudget {
    pub fn new(budget: Budget, step: Duration, min_gap: Duration, started: Instant) -> Self {
        Self {
            budget,
            step,
            min_gap,
            last_progress: 0,
            last_extension: started,
            extensions: 0,
        }
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn extensions(&self) -> u32 {
        self.extensions
    }

    /// Record a progress observation; returns `true` if the budget grew.
    pub fn observe(&mut self, progress: u8, now: Instant) -> bool {
        let increased = progress > self.last_progress;
        if increased {
            self.last_progress = progress;
        }
        if increased && now.saturating_duration_since(self.last_extension) >= self.min_gap {
            self.budget.extend(self.step);
            self.last_extension = now;
            self.extensions += 1;
            return true;
        }
        false
    }
}
