//! Job record: lifecycle status, owned task graph, revisions and history.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::history::{AttemptRecord, DecisionRecord};
use super::ids::{JobId, TaskId};
use super::lease::Lease;
use super::payload::RevisionContext;
use super::request::ProposalRequest;
use super::stage::StageType;
use super::task::TaskStatus;
use crate::graph::TaskGraph;

/// Most specific known reason a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Fatal agent failure, exhausted transient retries, or invalid input on a
    /// required stage.
    StageError,
    /// Quality gate still below threshold at the revision cap.
    QualityExhausted,
    /// Screening failed and could not (or may no longer) be revised.
    ScreeningRejected,
    /// Nothing left to run and no transition applies.
    Stalled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::StageError => "stage_error",
            FailureReason::QualityExhausted => "quality_exhausted",
            FailureReason::ScreeningRejected => "screening_rejected",
            FailureReason::Stalled => "stalled",
        };
        f.write_str(s)
    }
}

/// Job lifecycle.
///
/// ```text
/// Pending -> Running -> AwaitingGate -> Screening -> Completed
///               ^            |              |
///               |            v              v
///               +------- Revising <---------+
/// ```
/// `Failed` and `Cancelled` are reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    AwaitingGate,
    Revising,
    Screening,
    Completed,
    Failed(FailureReason),
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed(_) | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed(_))
                | (_, Cancelled)
                | (Pending, Running)
                | (Running, AwaitingGate)
                | (AwaitingGate, Screening)
                | (AwaitingGate, Revising)
                | (Screening, Completed)
                | (Screening, Revising)
                | (Revising, Running)
        )
    }

    /// Whether a task of `stage` may be dispatched while the job is in this
    /// status. Content stages run before the gate, the gate only while
    /// awaiting it, screening only while screening.
    pub fn admits(self, stage: StageType) -> bool {
        match stage {
            StageType::QualityGate => self == JobStatus::AwaitingGate,
            StageType::Screening => self == JobStatus::Screening,
            _ => matches!(self, JobStatus::Pending | JobStatus::Running),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("pending"),
            JobStatus::Running => f.write_str("running"),
            JobStatus::AwaitingGate => f.write_str("awaiting_gate"),
            JobStatus::Revising => f.write_str("revising"),
            JobStatus::Screening => f.write_str("screening"),
            JobStatus::Completed => f.write_str("completed"),
            JobStatus::Failed(reason) => write!(f, "failed({reason})"),
            JobStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Structured diagnostics for a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub reason: FailureReason,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    pub attempts: u32,
    pub last_error: String,
}

/// What triggered a revision round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionTrigger {
    QualityGate,
    Screening,
}

impl fmt::Display for RevisionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionTrigger::QualityGate => f.write_str("quality_gate"),
            RevisionTrigger::Screening => f.write_str("screening"),
        }
    }
}

/// One revision round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// 1-based.
    pub attempt: u32,
    pub trigger: RevisionTrigger,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_score: Option<f64>,

    pub requeued_stages: Vec<StageType>,

    /// Ids of the fresh task instances created for this round.
    pub requeued_tasks: Vec<TaskId>,

    /// Handed to the re-queued agents.
    pub context: RevisionContext,

    pub at: DateTime<Utc>,
}

/// A job: the unit the scheduler persists and updates atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub request: ProposalRequest,
    pub status: JobStatus,
    pub graph: TaskGraph,

    #[serde(default)]
    pub revisions: Vec<RevisionRecord>,

    /// Revision cap captured at submission.
    pub revision_cap: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,

    /// Live dispatch leases, by task.
    #[serde(default)]
    pub leases: BTreeMap<TaskId, Lease>,

    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,

    #[serde(default)]
    pub decisions: Vec<DecisionRecord>,

    pub created_at: DateTime<Utc>,

    /// Last status transition.
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token, bumped by every successful save.
    #[serde(default)]
    pub version: u64,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        request: ProposalRequest,
        graph: TaskGraph,
        revision_cap: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            request,
            status: JobStatus::Pending,
            graph,
            revisions: Vec::new(),
            revision_cap,
            quality_score: None,
            failure: None,
            leases: BTreeMap::new(),
            attempts: Vec::new(),
            decisions: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn revision_count(&self) -> u32 {
        self.revisions.len() as u32
    }

    /// Moves to `next` if the lifecycle allows it. Returns the previous status
    /// when applied.
    ///
    /// Entering a terminal status releases every lease and folds the revision
    /// history into a single `revision_summary` decision.
    pub fn transition_to(&mut self, next: JobStatus, now: DateTime<Utc>) -> Option<JobStatus> {
        if !self.status.can_transition_to(next) {
            return None;
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = now;

        if next.is_terminal() {
            self.leases.clear();
            self.decisions.push(DecisionRecord::new(
                now,
                None,
                "revision_summary",
                next.to_string(),
                serde_json::json!({
                    "revisions": self.revision_count(),
                    "cap": self.revision_cap,
                    "scores": self
                        .revisions
                        .iter()
                        .filter_map(|r| r.trigger_score)
                        .collect::<Vec<_>>(),
                    "triggers": self
                        .revisions
                        .iter()
                        .map(|r| r.trigger.to_string())
                        .collect::<Vec<_>>(),
                    "final_score": self.quality_score,
                }),
            ));
        }
        Some(previous)
    }

    /// Fails the job with diagnostics. Returns the previous status when applied.
    pub fn fail(&mut self, failure: JobFailure, now: DateTime<Utc>) -> Option<JobStatus> {
        let previous = self.transition_to(JobStatus::Failed(failure.reason), now)?;
        self.failure = Some(failure);
        Some(previous)
    }

    /// The revision round that created `task_id`, if any.
    pub fn revision_for(&self, task_id: TaskId) -> Option<&RevisionRecord> {
        self.revisions
            .iter()
            .rev()
            .find(|r| r.requeued_tasks.contains(&task_id))
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id,
            status: self.status,
            current_stage: self.current_stage(),
            progress_fraction: self.progress_fraction(),
            quality_score: self.quality_score,
            revision_count: self.revision_count(),
            failure: self.failure.clone(),
        }
    }

    /// Share of active tasks that are done (Succeeded or Skipped).
    pub fn progress_fraction(&self) -> f64 {
        if self.status == JobStatus::Completed {
            return 1.0;
        }
        let total = self.graph.len();
        if total == 0 {
            return 0.0;
        }
        let done = self
            .graph
            .tasks()
            .filter(|t| t.status.satisfies_dependents())
            .count();
        done as f64 / total as f64
    }

    /// Earliest in-progress stage in pipeline order, else the latest finished one.
    pub fn current_stage(&self) -> Option<StageType> {
        let in_progress = self
            .graph
            .tasks()
            .filter(|t| matches!(t.status, TaskStatus::Running | TaskStatus::Ready))
            .map(|t| t.stage)
            .min();
        in_progress.or_else(|| {
            self.graph
                .tasks()
                .filter(|t| t.status.is_terminal())
                .map(|t| t.stage)
                .max()
        })
    }
}

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<StageType>,

    pub progress_fraction: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,

    pub revision_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}
