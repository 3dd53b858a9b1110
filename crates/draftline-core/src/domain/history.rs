//! Attempt and decision history kept on the job record.
//!
//! Together they answer "what ran, what came back, and why the orchestrator
//! did what it did next".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{TaskId, WorkerId};
use super::outcome::OutcomeKind;
use super::stage::StageType;

/// One execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub task_id: TaskId,
    pub stage: StageType,

    /// 1-based attempt number.
    pub attempt: u32,

    pub worker_id: WorkerId,
    pub outcome: OutcomeKind,

    /// Failure detail, or a short note for discarded results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// The result arrived after the job went terminal or the lease moved on.
    #[serde(default)]
    pub discarded: bool,
}

/// A decision taken by the orchestrator.
///
/// `policy` names the rule that fired (`retry_policy`, `quality_gate`,
/// `lease_reaper`, ...), `decision` what it chose (`retry`, `skip`, `fail`,
/// `revise`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    pub policy: String,
    pub decision: String,

    #[serde(default)]
    pub detail: serde_json::Value,
}

impl DecisionRecord {
    pub fn new(
        at: DateTime<Utc>,
        task_id: Option<TaskId>,
        policy: impl Into<String>,
        decision: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            at,
            task_id,
            policy: policy.into(),
            decision: decision.into(),
            detail,
        }
    }
}
