//! Task: one stage instance inside a job's graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{JobId, TaskId};
use super::outcome::{AgentFailure, FailureKind};
use super::payload::StagePayload;
use super::stage::StageType;

/// Task status.
///
/// State transitions:
/// - Waiting -> Ready -> Running -> Succeeded
/// - Running -> Waiting (transient failure or expired lease, until the retry cap)
/// - Running -> Failed | Skipped
/// - Waiting | Ready -> Skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Dependents may run once a dependency is in one of these.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Skipped)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Waiting, Ready)
                | (Ready, Waiting)
                | (Ready, Running)
                | (Running, Succeeded)
                | (Running, Waiting)
                | (Running, Failed)
                | (Running, Skipped)
                | (Waiting, Skipped)
                | (Ready, Skipped)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Error detail kept on a task after a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub detail: String,
    pub attempt: u32,
}

impl TaskError {
    pub fn from_failure(failure: &AgentFailure, attempt: u32) -> Self {
        Self {
            kind: failure.kind,
            detail: failure.detail.clone(),
            attempt,
        }
    }
}

/// One node of a task graph.
///
/// Single source of truth for the stage's progress. Fields are public for
/// reading; state changes go through `TaskGraph::mark`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub stage: StageType,
    pub status: TaskStatus,

    /// Ordered ids of the tasks this one waits for.
    pub dependencies: Vec<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StagePayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    /// Number of dispatches so far (including the current one while Running).
    pub attempts: u32,

    /// When the current attempt was dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,

    /// Backoff: not eligible for the ready set before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: TaskId, job_id: JobId, stage: StageType) -> Self {
        Self {
            id,
            job_id,
            stage,
            status: TaskStatus::Waiting,
            dependencies: Vec::new(),
            result: None,
            error: None,
            attempts: 0,
            dispatched_at: None,
            not_before: None,
        }
    }

    /// Backoff has elapsed (or was never set).
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|t| t <= now)
    }
}
