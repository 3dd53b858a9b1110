//! Job events published to notification and UI layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId, WorkerId};
use super::job::{JobStatus, RevisionTrigger};
use super::stage::StageType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    Submitted,
    StatusChanged {
        from: JobStatus,
        to: JobStatus,
    },
    TaskDispatched {
        task_id: TaskId,
        stage: StageType,
        attempt: u32,
        worker_id: WorkerId,
    },
    TaskSucceeded {
        task_id: TaskId,
        stage: StageType,
    },
    TaskRetryScheduled {
        task_id: TaskId,
        stage: StageType,
        attempt: u32,
        delay_ms: u64,
    },
    TaskFailed {
        task_id: TaskId,
        stage: StageType,
        error: String,
    },
    TaskSkipped {
        task_id: TaskId,
        stage: StageType,
        reason: String,
    },
    LeaseExpired {
        task_id: TaskId,
        stage: StageType,
        worker_id: WorkerId,
    },
    RevisionScheduled {
        revision: u32,
        trigger: RevisionTrigger,
        stages: Vec<StageType>,
    },
    LateResultDiscarded {
        task_id: TaskId,
        stage: StageType,
        reason: String,
    },
}

impl JobEvent {
    pub fn new(job_id: JobId, at: DateTime<Utc>, kind: JobEventKind) -> Self {
        Self { job_id, at, kind }
    }

    /// The status this event moved the job into, if it was a transition.
    pub fn new_status(&self) -> Option<JobStatus> {
        match self.kind {
            JobEventKind::StatusChanged { to, .. } => Some(to),
            _ => None,
        }
    }
}
