//! Error types of the orchestrator core.
//!
//! Agent failures are not here: they are values (`AgentFailure`), never Rust
//! errors.

use super::ids::{JobId, TaskId};
use super::job::JobStatus;
use super::task::TaskStatus;

/// Task-graph construction and marking errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("dependency {task} -> {depends_on} would create a cycle")]
    Cycle { task: TaskId, depends_on: TaskId },

    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("task {0} already exists in the graph")]
    DuplicateTask(TaskId),

    #[error("task {task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task} is already {status}")]
    TerminalTask { task: TaskId, status: TaskStatus },
}

/// Persistence errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {job_id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        job_id: JobId,
        expected: u64,
        found: u64,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the orchestrator API.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {job_id} is already {status}")]
    AlreadyTerminal { job_id: JobId, status: JobStatus },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(job_id) => OrchestratorError::JobNotFound(job_id),
            other => OrchestratorError::Store(other),
        }
    }
}
