//! Per-step timeout policies for supervised build commands.
//!
//! Two independent policies exist because build steps stress different
//! resources: dependency downloads may legitimately run long but should
//! never go silent, while compute-bound compilation keeps printing but must
//! respect a wall-clock budget. Callers pick one policy per step.
//!
//! The governor's slot watchdog is a separate, coarser mechanism; the two
//! are a defense-in-depth pair, not a single deadline.

use std::time::{Duration, Instant};

use crate::error::TimeoutKind;

/// Deadline policy for one supervised process.
#[derive(Debug, Clone, Copy)]
pub enum TimeoutPolicy {
    /// Kill when elapsed time since spawn exceeds the duration.
    AbsoluteFromStart(Duration),
    /// Kill when time since the most recent output chunk exceeds the
    /// duration, regardless of total runtime.
    InactivityWindow(Duration),
}

impl TimeoutPolicy {
    /// The configured limit, whichever variant.
    pub fn limit(&self) -> Duration {
        match self {
            TimeoutPolicy::AbsoluteFromStart(d) => *d,
            TimeoutPolicy::InactivityWindow(d) => *d,
        }
    }

    /// Which timeout kind this policy reports when it fires.
    pub fn kind(&self) -> TimeoutKind {
        match self {
            TimeoutPolicy::AbsoluteFromStart(_) => TimeoutKind::Absolute,
            TimeoutPolicy::InactivityWindow(_) => TimeoutKind::Inactivity,
        }
    }

    /// Check the policy against the process's start and last-output times.
    ///
    /// Returns `Some(kind)` when the deadline is breached.
    pub fn check(&self, started_at: Instant, last_output: Instant, now: Instant) -> Option<TimeoutKind> {
        match self {
            TimeoutPolicy::AbsoluteFromStart(limit) => {
                if now.duration_since(started_at) > *limit {
                    Some(TimeoutKind::Absolute)
                } else {
                    None
                }
            }
            TimeoutPolicy::InactivityWindow(limit) => {
                if now.duration_since(last_output) > *limit {
                    Some(TimeoutKind::Inactivity)
                } else {
                    None
                }
            }
        }
    }
}
