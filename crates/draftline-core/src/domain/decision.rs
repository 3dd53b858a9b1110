//! Decision model: what to do with a task after a failed attempt.

use std::time::Duration;

use super::outcome::{AgentFailure, FailureKind};
use super::task::Task;
use crate::app::retry::RetryPolicy;

/// Next action for a task whose attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Put the task back to Waiting; eligible again after `delay`.
    Retry { delay: Duration, reason: String },

    /// Mark the task Skipped; dependents proceed without it.
    Skip { reason: String },

    /// Mark the task Failed and fail the job.
    Fail { reason: String },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Retry { .. } => "retry",
            Decision::Skip { .. } => "skip",
            Decision::Fail { .. } => "fail",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Decision::Retry { reason, .. }
            | Decision::Skip { reason }
            | Decision::Fail { reason } => reason,
        }
    }
}

/// Decides the next action for a failed task.
///
/// Deciders are pure: they look at the task (stage, attempts) and the failure
/// and return a decision. Applying it is the scheduler's job.
pub trait Decider: Send + Sync {
    fn decide(&self, task: &Task, failure: &AgentFailure) -> Decision;
}

/// Retry transient failures with exponential backoff up to `max_retries`
/// retries, skip skippable stages, fail everything else.
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
    max_retries: u32,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy, max_retries: u32) -> Self {
        Self {
            retry_policy,
            max_retries,
        }
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &Task, failure: &AgentFailure) -> Decision {
        if failure.kind == FailureKind::Fatal {
            return Decision::Fail {
                reason: format!("fatal failure in {}: {}", task.stage, failure.detail),
            };
        }

        // `attempts` includes the attempt that just failed.
        if failure.is_retryable() && task.attempts <= self.max_retries {
            let delay = self.retry_policy.next_delay(task.attempts);
            return Decision::Retry {
                delay,
                reason: format!(
                    "retry {}/{} after {:?}: {}",
                    task.attempts, self.max_retries, delay, failure.detail
                ),
            };
        }

        let why = if failure.kind == FailureKind::Transient {
            format!("retries exhausted after {} attempts", task.attempts)
        } else {
            format!("{} failure", failure.kind)
        };

        if task.stage.is_skippable() {
            Decision::Skip {
                reason: format!("{why}: {}", failure.detail),
            }
        } else {
            Decision::Fail {
                reason: format!("{why}: {}", failure.detail),
            }
        }
    }
}
